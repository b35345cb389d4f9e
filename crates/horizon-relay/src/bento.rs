//! Type-erased callables.
//!
//! A [`Bento`] wraps anything that can be connected as a slot (a receiver
//! method, a free function or a closure) behind one comparable, cloneable,
//! invocable handle. The concrete signature is resolved once at connect time:
//! the invoker stored inside a bento already knows the signal's argument type
//! and the slot's parameter prefix, so invoking never probes types beyond a
//! single downcast of the argument pack.
//!
//! # Identity
//!
//! Two bentos are equal when they have the same [`CallableKind`] and the same
//! identity:
//!
//! - Fn items (methods and free functions) are identified by their type, so
//!   `Label::set_text` always equals `Label::set_text`.
//! - Closures, even capture-less ones, and function pointers get a fresh
//!   instance id each time they are wrapped, and only compare equal to clones
//!   of that same bento. [`Closure`] carries its id
//!   so a closure connected once can later be disconnected with a clone of
//!   the same handle.
//!
//! Structural comparison of closures is never attempted.
//!
//! # Signals
//!
//! A signal is a method on the sender whose body calls
//! [`activate`](crate::activate). The method item itself is the signal
//! identity (see [`SignalFn`]), so no registration step or string name is
//! needed:
//!
//! ```
//! use horizon_relay::{Sender, SignalBase, activate};
//!
//! struct Button {
//!     base: SignalBase,
//! }
//!
//! impl Sender for Button {
//!     fn signal_base(&self) -> &SignalBase {
//!         &self.base
//!     }
//! }
//!
//! impl Button {
//!     fn clicked(&self, checked: bool) {
//!         activate(self, Self::clicked, (checked,));
//!     }
//! }
//! # let button = Button { base: SignalBase::new::<Button>() };
//! # button.clicked(true);
//! ```

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{BoxError, InvocationError};
use crate::teacup::{ArgPack, TrimTo};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_instance_id() -> u64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// What sort of callable a [`Bento`] wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallableKind {
    /// A free function with no receiver.
    Function,
    /// A method called on a receiver.
    Method,
    /// A closure.
    Closure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Identity {
    Item(TypeId),
    Instance(u64),
    Null,
}

impl Identity {
    /// Fn items compare by type. Closures, including capture-less ones, and
    /// anything carrying state get a fresh instance id.
    fn of<F: 'static>() -> Self {
        if size_of::<F>() == 0 && !is_closure_type::<F>() {
            Self::Item(TypeId::of::<F>())
        } else {
            Self::Instance(next_instance_id())
        }
    }
}

fn is_closure_type<F>() -> bool {
    type_name::<F>().contains("{{closure}}")
}

/// Resolved invocation path of a slot.
pub(crate) trait Invoke: Send + Sync {
    fn invoke(&self, args: &dyn Any, name: &'static str) -> Result<(), InvocationError>;
}

/// A type-erased, comparable, cloneable callable.
///
/// Cloning is cheap (the invoker is shared) and the clone is usable from any
/// thread, which is what queued delivery relies on.
///
/// # Related Types
///
/// - [`SignalFn`] - Turns a signal method into its identity bento
/// - [`IntoSlot`] - Turns a slot into an invocable bento
/// - [`crate::TeaCup`] - The argument pack a bento is invoked with
#[derive(Clone)]
pub struct Bento {
    kind: CallableKind,
    identity: Identity,
    name: &'static str,
    invoker: Option<Arc<dyn Invoke>>,
}

impl Bento {
    /// The null callable. Used as a wildcard in disconnect filters and
    /// rejected by connect.
    pub const fn null() -> Self {
        Self {
            kind: CallableKind::Function,
            identity: Identity::Null,
            name: "<null>",
            invoker: None,
        }
    }

    /// Whether this is the null callable.
    pub fn is_null(&self) -> bool {
        self.identity == Identity::Null
    }

    /// The kind of callable wrapped.
    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    /// Type name of the wrapped callable, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether [`invoke`](Self::invoke) can run anything.
    ///
    /// Identity-only bentos (signals, filter keys) are not invocable.
    pub fn is_invocable(&self) -> bool {
        self.invoker.is_some()
    }

    /// Invoke with a type-erased argument pack.
    ///
    /// `args` must be the full argument tuple of the signal this bento was
    /// connected to; it is trimmed to the slot's parameters internally. A
    /// panic inside the slot is caught here and returned as
    /// [`InvocationError::Panicked`].
    pub fn invoke(&self, args: &dyn Any) -> Result<(), InvocationError> {
        let Some(invoker) = &self.invoker else {
            return Err(InvocationError::NotInvocable);
        };
        match panic::catch_unwind(AssertUnwindSafe(|| invoker.invoke(args, self.name))) {
            Ok(result) => result,
            Err(payload) => Err(InvocationError::panicked(self.name, payload.as_ref())),
        }
    }

    /// Strip the invoker, keeping only the identity.
    pub fn identity(&self) -> Self {
        Self {
            kind: self.kind,
            identity: self.identity,
            name: self.name,
            invoker: None,
        }
    }

    fn with_invoker(
        kind: CallableKind,
        identity: Identity,
        name: &'static str,
        invoker: Arc<dyn Invoke>,
    ) -> Self {
        Self {
            kind,
            identity,
            name,
            invoker: Some(invoker),
        }
    }
}

impl Default for Bento {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Bento {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.identity == other.identity
    }
}

impl Eq for Bento {}

impl fmt::Debug for Bento {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bento")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("invocable", &self.is_invocable())
            .finish()
    }
}

/// A signal method: `fn(&S, A0, .., An)` whose body activates the signal.
///
/// Implemented for every zero-sized `Fn(&S, ...)` with up to eight
/// parameters. The method's type is the signal's identity.
pub trait SignalFn<S: ?Sized, Args: ArgPack>: Copy + Send + Sync + 'static {
    /// The identity bento of this signal.
    fn to_bento(&self) -> Bento {
        const {
            assert!(
                size_of::<Self>() == 0,
                "a signal must be a method item, not a capturing closure or fn pointer"
            )
        };
        Bento {
            kind: CallableKind::Method,
            identity: Identity::Item(TypeId::of::<Self>()),
            name: type_name::<Self>(),
            invoker: None,
        }
    }
}

/// Converts a slot's return value into a delivery outcome.
///
/// Slots may return `()` or `Result<(), E>`. An `Err` is reported through
/// [`Sender::on_invocation_error`](crate::Sender::on_invocation_error) for
/// direct delivery and returned from
/// [`PendingInvocation::run`](crate::PendingInvocation::run) for queued
/// delivery.
pub trait SlotResult {
    /// Convert into a uniform result.
    fn into_result(self) -> Result<(), BoxError>;
}

impl SlotResult for () {
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> SlotResult for Result<(), E>
where
    E: Into<BoxError>,
{
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// A receiver method `Fn(&R, P0, .., Pk) -> Ret` usable as a slot.
pub trait MethodSlot<R: ?Sized, Params, Ret>: Send + Sync + 'static {
    /// Call the method on `receiver`.
    fn call(&self, receiver: &R, params: Params) -> Ret;
}

/// A free callable `Fn(P0, .., Pk) -> Ret` usable as a slot.
pub trait FreeSlot<Params, Ret>: Send + Sync + 'static {
    /// Call with the given parameters.
    fn call(&self, params: Params) -> Ret;
}

macro_rules! callable_impls {
    ($($param:ident),*) => {
        impl<R, Ret, Func, $($param),*> MethodSlot<R, ($($param,)*), Ret> for Func
        where
            R: ?Sized,
            Func: Fn(&R $(, $param)*) -> Ret + Send + Sync + 'static,
        {
            #[inline]
            #[allow(non_snake_case)]
            fn call(&self, receiver: &R, ($($param,)*): ($($param,)*)) -> Ret {
                self(receiver $(, $param)*)
            }
        }

        impl<Ret, Func, $($param),*> FreeSlot<($($param,)*), Ret> for Func
        where
            Func: Fn($($param),*) -> Ret + Send + Sync + 'static,
        {
            #[inline]
            #[allow(non_snake_case)]
            fn call(&self, ($($param,)*): ($($param,)*)) -> Ret {
                self($($param),*)
            }
        }

        impl<S, Func, $($param),*> SignalFn<S, ($($param,)*)> for Func
        where
            S: ?Sized,
            Func: Fn(&S $(, $param)*) + Copy + Send + Sync + 'static,
            $($param: Clone + Send + 'static),*
        {
        }
    };
}

callable_impls!();
callable_impls!(A0);
callable_impls!(A0, A1);
callable_impls!(A0, A1, A2);
callable_impls!(A0, A1, A2, A3);
callable_impls!(A0, A1, A2, A3, A4);
callable_impls!(A0, A1, A2, A3, A4, A5);
callable_impls!(A0, A1, A2, A3, A4, A5, A6);
callable_impls!(A0, A1, A2, A3, A4, A5, A6, A7);

/// Wraps a free function or closure as a slot.
///
/// Free fn items compare by type. Closures and function pointers get a fresh
/// identity each time they are wrapped, so they never match another wrap.
#[derive(Clone, Copy, Debug)]
pub struct Function<F>(pub F);

/// Wraps a closure as a slot with a stable identity.
///
/// Every `Closure::new` is distinct; clones share the identity, so a clone
/// can later be used to disconnect the connection it made.
///
/// # Example
///
/// ```
/// use horizon_relay::Closure;
///
/// let a = Closure::new(|value: i32| println!("{value}"));
/// let b = a.clone();
/// let c = Closure::new(|value: i32| println!("{value}"));
/// assert!(a.same_as(&b));
/// assert!(!a.same_as(&c));
/// ```
pub struct Closure<F> {
    id: u64,
    f: Arc<F>,
}

impl<F> Closure<F> {
    /// Wrap a closure with a new identity.
    pub fn new(f: F) -> Self {
        Self {
            id: next_instance_id(),
            f: Arc::new(f),
        }
    }

    /// Whether two handles refer to the same closure.
    pub fn same_as<G>(&self, other: &Closure<G>) -> bool {
        self.id == other.id
    }
}

impl<F> Clone for Closure<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            f: self.f.clone(),
        }
    }
}

impl<F> fmt::Debug for Closure<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure").field("id", &self.id).finish()
    }
}

/// Marker for [`IntoSlot`] implementations on receiver methods.
#[doc(hidden)]
pub struct MethodMarker;

/// Marker for [`IntoSlot`] on [`Function`].
#[doc(hidden)]
pub struct FunctionMarker;

/// Marker for [`IntoSlot`] on [`Closure`].
#[doc(hidden)]
pub struct ClosureMarker;

/// Anything connectable as a slot of a receiver `R` for a signal with
/// arguments `Args`.
///
/// The `Marker` parameter only disambiguates the blanket implementations and
/// is always inferred.
pub trait IntoSlot<R, Args, Marker>: Send + Sync + 'static {
    /// Build the invocable bento, bound to `receiver`.
    fn into_bento(self, receiver: Weak<R>) -> Bento;

    /// Build an identity-only bento for matching existing connections.
    fn slot_identity(&self) -> Bento;
}

struct MethodInvoker<R, Args, Params, Ret, F> {
    receiver: Weak<R>,
    f: F,
    _marker: PhantomData<fn(Args, Params) -> Ret>,
}

impl<R, Args, Params, Ret, F> Invoke for MethodInvoker<R, Args, Params, Ret, F>
where
    R: Send + Sync + 'static,
    Args: TrimTo<Params>,
    Ret: SlotResult,
    F: MethodSlot<R, Params, Ret>,
{
    fn invoke(&self, args: &dyn Any, name: &'static str) -> Result<(), InvocationError> {
        // Receiver already gone: nothing to deliver to.
        let Some(receiver) = self.receiver.upgrade() else {
            return Ok(());
        };
        let args = args
            .downcast_ref::<Args>()
            .ok_or_else(|| InvocationError::argument_mismatch(name, type_name::<Args>()))?;
        MethodSlot::<R, Params, Ret>::call(&self.f, &receiver, TrimTo::<Params>::trim(args))
            .into_result()
            .map_err(|source| InvocationError::Failed { slot: name, source })
    }
}

struct FreeInvoker<Args, Params, Ret, F> {
    f: Arc<F>,
    _marker: PhantomData<fn(Args, Params) -> Ret>,
}

impl<Args, Params, Ret, F> Invoke for FreeInvoker<Args, Params, Ret, F>
where
    Args: TrimTo<Params>,
    Ret: SlotResult,
    F: FreeSlot<Params, Ret>,
{
    fn invoke(&self, args: &dyn Any, name: &'static str) -> Result<(), InvocationError> {
        let args = args
            .downcast_ref::<Args>()
            .ok_or_else(|| InvocationError::argument_mismatch(name, type_name::<Args>()))?;
        FreeSlot::<Params, Ret>::call(&*self.f, TrimTo::<Params>::trim(args))
            .into_result()
            .map_err(|source| InvocationError::Failed { slot: name, source })
    }
}

impl<R, Args, Params, Ret, F> IntoSlot<R, Args, (MethodMarker, Params, Ret)> for F
where
    R: Send + Sync + 'static,
    Args: TrimTo<Params>,
    Params: 'static,
    Ret: SlotResult + 'static,
    F: MethodSlot<R, Params, Ret>,
{
    fn into_bento(self, receiver: Weak<R>) -> Bento {
        let invoker = MethodInvoker::<R, Args, Params, Ret, F> {
            receiver,
            f: self,
            _marker: PhantomData,
        };
        Bento::with_invoker(
            CallableKind::Method,
            Identity::of::<F>(),
            type_name::<F>(),
            Arc::new(invoker),
        )
    }

    fn slot_identity(&self) -> Bento {
        Bento {
            kind: CallableKind::Method,
            identity: Identity::of::<F>(),
            name: type_name::<F>(),
            invoker: None,
        }
    }
}

impl<R, Args, Params, Ret, F> IntoSlot<R, Args, (FunctionMarker, Params, Ret)> for Function<F>
where
    Args: TrimTo<Params>,
    Params: 'static,
    Ret: SlotResult + 'static,
    F: FreeSlot<Params, Ret>,
{
    fn into_bento(self, _receiver: Weak<R>) -> Bento {
        let invoker = FreeInvoker::<Args, Params, Ret, F> {
            f: Arc::new(self.0),
            _marker: PhantomData,
        };
        Bento::with_invoker(
            CallableKind::Function,
            Identity::of::<F>(),
            type_name::<F>(),
            Arc::new(invoker),
        )
    }

    fn slot_identity(&self) -> Bento {
        Bento {
            kind: CallableKind::Function,
            identity: Identity::of::<F>(),
            name: type_name::<F>(),
            invoker: None,
        }
    }
}

impl<R, Args, Params, Ret, F> IntoSlot<R, Args, (ClosureMarker, Params, Ret)> for Closure<F>
where
    Args: TrimTo<Params>,
    Params: 'static,
    Ret: SlotResult + 'static,
    F: FreeSlot<Params, Ret>,
{
    fn into_bento(self, _receiver: Weak<R>) -> Bento {
        let id = self.id;
        let invoker = FreeInvoker::<Args, Params, Ret, F> {
            f: self.f,
            _marker: PhantomData,
        };
        Bento::with_invoker(
            CallableKind::Closure,
            Identity::Instance(id),
            type_name::<F>(),
            Arc::new(invoker),
        )
    }

    fn slot_identity(&self) -> Bento {
        Bento {
            kind: CallableKind::Closure,
            identity: Identity::Instance(self.id),
            name: type_name::<F>(),
            invoker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<i32>>,
    }

    impl Recorder {
        fn record(&self, value: i32) {
            self.seen.lock().push(value);
        }

        fn record_checked(&self, value: i32) -> Result<(), String> {
            if value < 0 {
                return Err(format!("negative value {value}"));
            }
            self.seen.lock().push(value);
            Ok(())
        }

        fn explode(&self) {
            panic!("slot exploded");
        }
    }

    fn free_slot(_value: i32) {}

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_method_bento_invokes_with_trimmed_args() {
        let target = recorder();
        let bento = IntoSlot::<Recorder, (i32, String, bool), _>::into_bento(
            Recorder::record,
            Arc::downgrade(&target),
        );
        assert_eq!(bento.kind(), CallableKind::Method);

        let args = (5, String::from("ignored"), true);
        bento.invoke(&args).unwrap();
        assert_eq!(*target.seen.lock(), vec![5]);
    }

    #[test]
    fn test_method_identity_by_type() {
        let target = recorder();
        let a =
            IntoSlot::<Recorder, (i32,), _>::into_bento(Recorder::record, Arc::downgrade(&target));
        let b = IntoSlot::<Recorder, (i32,), _>::slot_identity(&Recorder::record);
        let c = IntoSlot::<Recorder, (i32,), _>::slot_identity(&Recorder::record_checked);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.clone(), a);
        assert!(!b.is_invocable());
    }

    #[test]
    fn test_closure_identity_is_per_instance() {
        let first = Closure::new(|_: i32| {});
        let second = Closure::new(|_: i32| {});

        let a = IntoSlot::<(), (i32,), _>::slot_identity(&first);
        let b = IntoSlot::<(), (i32,), _>::slot_identity(&first.clone());
        let c = IntoSlot::<(), (i32,), _>::slot_identity(&second);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_capturing_closure_never_equal() {
        let offset = 3;
        let capture = move |value: i32| {
            let _ = value + offset;
        };
        let a = IntoSlot::<(), (i32,), _>::slot_identity(&Function(capture));
        let b = IntoSlot::<(), (i32,), _>::slot_identity(&Function(capture));
        assert_ne!(a, b);

        let f = IntoSlot::<(), (i32,), _>::slot_identity(&Function(free_slot));
        let g = IntoSlot::<(), (i32,), _>::slot_identity(&Function(free_slot));
        assert_eq!(f, g);
    }

    #[test]
    fn test_capture_less_closure_never_equal() {
        fn make() -> impl Fn(i32) + Copy + Send + Sync + 'static {
            |_: i32| {}
        }
        let a = IntoSlot::<(), (i32,), _>::slot_identity(&Function(make()));
        let b = IntoSlot::<(), (i32,), _>::slot_identity(&Function(make()));
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_failed_and_panicking_slots() {
        let target = recorder();
        let checked = IntoSlot::<Recorder, (i32,), _>::into_bento(
            Recorder::record_checked,
            Arc::downgrade(&target),
        );
        let err = checked.invoke(&(-1,)).unwrap_err();
        assert!(matches!(err, InvocationError::Failed { .. }));
        assert!(err.to_string().contains("negative value -1"));

        let explode =
            IntoSlot::<Recorder, (i32,), _>::into_bento(Recorder::explode, Arc::downgrade(&target));
        let err = explode.invoke(&(1,)).unwrap_err();
        assert!(matches!(
            err,
            InvocationError::Panicked { ref message, .. } if message == "slot exploded"
        ));
    }

    #[test]
    fn test_argument_mismatch() {
        let target = recorder();
        let bento =
            IntoSlot::<Recorder, (i32,), _>::into_bento(Recorder::record, Arc::downgrade(&target));
        let err = bento.invoke(&("wrong",)).unwrap_err();
        assert!(matches!(err, InvocationError::ArgumentMismatch { .. }));
    }

    #[test]
    fn test_dead_receiver_is_skipped() {
        let target = recorder();
        let bento =
            IntoSlot::<Recorder, (i32,), _>::into_bento(Recorder::record, Arc::downgrade(&target));
        drop(target);
        assert!(bento.invoke(&(1,)).is_ok());
    }

    #[test]
    fn test_null_bento() {
        let null = Bento::null();
        assert!(null.is_null());
        assert_eq!(null, Bento::default());
        assert!(matches!(null.invoke(&()), Err(InvocationError::NotInvocable)));
    }
}
