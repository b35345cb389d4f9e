//! Argument packs for signal activation.
//!
//! A [`TeaCup`] holds the arguments of one `activate()` call. For synchronous
//! delivery it only borrows them; for queued delivery it is turned into an
//! owned deep copy that can cross threads and outlive the call.
//!
//! Argument lists are plain tuples. [`ArgPack`] is implemented for tuples of
//! up to eight elements, and [`TrimTo`] for every prefix of each tuple, so a
//! slot may take fewer parameters than the signal sends (never more).
//!
//! # Example
//!
//! ```
//! use horizon_relay::TeaCup;
//!
//! let args = (1, String::from("two"), 3.0f32);
//! let cup = TeaCup::borrowed(&args);
//! let first: (i32,) = cup.trim_to();
//! assert_eq!(first, (1,));
//!
//! let owned = cup.to_owned_cup();
//! assert!(owned.is_owned());
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

/// A tuple usable as a signal's argument list.
pub trait ArgPack: Clone + Send + 'static {
    /// Number of arguments in the pack.
    const ARITY: usize;
}

/// Produce the leading sub-pack `P` of an argument pack.
///
/// Implemented for every prefix of every [`ArgPack`] tuple, including the
/// empty tuple and the tuple itself.
pub trait TrimTo<P>: ArgPack {
    /// Clone the first `P::ARITY` elements into a new pack.
    fn trim(&self) -> P;
}

macro_rules! trim_impls {
    (@prefix [$($all:ident $aidx:tt),*] [$($pre:ident $pidx:tt),*] []) => {
        impl<$($all),*> TrimTo<($($pre,)*)> for ($($all,)*)
        where
            $($all: Clone + Send + 'static),*
        {
            #[inline]
            fn trim(&self) -> ($($pre,)*) {
                ($(self.$pidx.clone(),)*)
            }
        }
    };
    (@prefix [$($all:ident $aidx:tt),*] [$($pre:ident $pidx:tt),*]
        [$next:ident $nidx:tt $(, $rest:ident $ridx:tt)*]) => {
        impl<$($all),*> TrimTo<($($pre,)*)> for ($($all,)*)
        where
            $($all: Clone + Send + 'static),*
        {
            #[inline]
            fn trim(&self) -> ($($pre,)*) {
                ($(self.$pidx.clone(),)*)
            }
        }

        trim_impls!(@prefix [$($all $aidx),*] [$($pre $pidx,)* $next $nidx] [$($rest $ridx),*]);
    };
}

macro_rules! arg_pack_impls {
    ($($name:ident $idx:tt),*) => {
        impl<$($name),*> ArgPack for ($($name,)*)
        where
            $($name: Clone + Send + 'static),*
        {
            const ARITY: usize = 0 $(+ { let _ = $idx; 1 })*;
        }

        trim_impls!(@prefix [$($name $idx),*] [] [$($name $idx),*]);
    };
}

arg_pack_impls!();
arg_pack_impls!(A0 0);
arg_pack_impls!(A0 0, A1 1);
arg_pack_impls!(A0 0, A1 1, A2 2);
arg_pack_impls!(A0 0, A1 1, A2 2, A3 3);
arg_pack_impls!(A0 0, A1 1, A2 2, A3 3, A4 4);
arg_pack_impls!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
arg_pack_impls!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
arg_pack_impls!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);

/// The arguments of one activation, borrowed or owned.
///
/// A borrowed cup is valid only for the `activate()` call that created it and
/// is shared read-only by every synchronous slot. An owned cup is exclusively
/// held by one pending invocation.
pub struct TeaCup<'a, Args: ArgPack> {
    args: Cow<'a, Args>,
}

impl<'a, Args: ArgPack> TeaCup<'a, Args> {
    /// Wrap a reference to the caller's arguments without copying.
    pub fn borrowed(args: &'a Args) -> Self {
        Self {
            args: Cow::Borrowed(args),
        }
    }

    /// Take ownership of an argument pack.
    pub fn owned(args: Args) -> TeaCup<'static, Args> {
        TeaCup {
            args: Cow::Owned(args),
        }
    }

    /// The full argument pack.
    pub fn get(&self) -> &Args {
        &self.args
    }

    /// Whether the cup holds its own copy of the arguments.
    pub fn is_owned(&self) -> bool {
        matches!(self.args, Cow::Owned(_))
    }

    /// Number of arguments in the cup.
    pub fn arity(&self) -> usize {
        Args::ARITY
    }

    /// The first `P::ARITY` arguments.
    pub fn trim_to<P>(&self) -> P
    where
        Args: TrimTo<P>,
    {
        TrimTo::<P>::trim(self.get())
    }

    /// Deep-copy the arguments into a cup that owns them.
    pub fn to_owned_cup(&self) -> TeaCup<'static, Args> {
        TeaCup::owned(self.get().clone())
    }

    /// Consume the cup, yielding an owned argument pack.
    pub fn into_inner(self) -> Args {
        self.args.into_owned()
    }

    /// Deep-copy the arguments into a type-erased box for a pending invocation.
    pub fn to_erased(&self) -> Box<dyn Any + Send> {
        Box::new(self.get().clone())
    }

    /// The arguments as `&dyn Any`, for synchronous invocation.
    pub fn as_any(&self) -> &dyn Any {
        self.get()
    }
}

impl<Args: ArgPack> fmt::Debug for TeaCup<'_, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeaCup")
            .field("type", &std::any::type_name::<Args>())
            .field("arity", &Args::ARITY)
            .field("owned", &self.is_owned())
            .finish()
    }
}
