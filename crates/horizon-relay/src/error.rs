//! Error types for Horizon Relay.

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Boxed error produced by a fallible slot.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The umbrella error type for Horizon Relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A connection could not be established.
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// A slot invocation failed.
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// An execution context refused or failed a request.
    #[error("Execution context error: {0}")]
    Context(#[from] ContextError),
}

/// Reasons a connection request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The signal callable is null.
    #[error("Cannot connect a null signal")]
    NullSignal,

    /// The slot callable is null.
    #[error("Cannot connect a null slot")]
    NullSlot,

    /// The sender has already been torn down or dropped.
    #[error("Sender '{sender}' has been destroyed")]
    SenderDestroyed { sender: &'static str },

    /// The receiver is being destroyed.
    #[error("Receiver '{receiver}' is being destroyed")]
    ReceiverDestroyed { receiver: &'static str },

    /// An identical (signal, receiver, slot) connection already exists and the
    /// request asked for uniqueness.
    #[error("Connection from '{signal}' to '{slot}' already exists")]
    Duplicate {
        signal: &'static str,
        slot: &'static str,
    },
}

/// Failures while running a slot.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The argument pack handed to the slot was not the type it was bound to.
    #[error("Slot '{slot}' expected arguments of type '{expected}'")]
    ArgumentMismatch {
        slot: &'static str,
        expected: &'static str,
    },

    /// The slot panicked.
    #[error("Slot '{slot}' panicked: {message}")]
    Panicked { slot: &'static str, message: String },

    /// The slot returned an error.
    #[error("Slot '{slot}' failed: {source}")]
    Failed {
        slot: &'static str,
        #[source]
        source: BoxError,
    },

    /// The slot callable is null.
    #[error("Cannot invoke a null callable")]
    NotInvocable,
}

impl InvocationError {
    /// Create an argument mismatch error.
    pub fn argument_mismatch(slot: &'static str, expected: &'static str) -> Self {
        Self::ArgumentMismatch { slot, expected }
    }

    /// Create a panic error from a caught payload.
    pub fn panicked(slot: &'static str, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked { slot, message }
    }

    /// Name of the slot involved, if any.
    pub fn slot(&self) -> Option<&'static str> {
        match self {
            Self::ArgumentMismatch { slot, .. }
            | Self::Panicked { slot, .. }
            | Self::Failed { slot, .. } => Some(slot),
            Self::NotInvocable => None,
        }
    }
}

/// Failures of an execution context (a receiver's event loop or worker).
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The context has been stopped and accepts no more work.
    #[error("Execution context '{name}' has stopped")]
    Stopped { name: String },

    /// The context's queue is full.
    #[error("Execution context '{name}' queue is full")]
    QueueFull { name: String },

    /// The context's thread could not be spawned.
    #[error("Failed to spawn execution context '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The calling thread is not the context's owner.
    #[error("Execution context '{name}' may only be driven from its owning thread")]
    WrongThread { name: String },
}
