//! Error types for the off-chain payment protocol.

use std::fmt;

/// Top-level error returned by channel and processor operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A received or locally-built command failed structural validation.
    #[error("{0}")]
    Structure(#[from] StructureError),

    /// The executor rejected a command (wrong sequence, dependency miss, conflict).
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    /// The payment status machine rejected a transition.
    #[error("{0}")]
    PaymentLogic(#[from] PaymentLogicError),

    /// The business context collaborator raised an error.
    #[error("{0}")]
    Business(#[from] BusinessError),

    /// The storage layer failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// A request or response frame did not parse.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
}

/// A field, diff, or record failed structural validation.
#[derive(Debug, Clone)]
pub struct StructureError {
    /// Machine-readable reason.
    pub reason: String,
    /// The field path the violation occurred at, if any.
    pub field: Option<String>,
}

impl StructureError {
    /// Creates a new structure error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            field: None,
        }
    }

    /// Sets the offending field path.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "structure error at '{field}': {}", self.reason),
            None => write!(f, "structure error: {}", self.reason),
        }
    }
}

impl std::error::Error for StructureError {}

/// The executor could not sequence, commit, or look up a command.
#[derive(Debug, Clone)]
pub struct ExecutorError {
    /// Machine-readable reason.
    pub reason: String,
    /// The command identifier involved, if any.
    pub cid: Option<String>,
}

impl ExecutorError {
    /// Creates a new executor error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cid: None,
        }
    }

    /// Sets the command identifier.
    #[must_use]
    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cid {
            Some(cid) => write!(f, "executor error for command '{cid}': {}", self.reason),
            None => write!(f, "executor error: {}", self.reason),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Which class of payment-logic rule a [`PaymentLogicError`] violated,
/// used to pick a specific wire [`ErrorCode`](crate::wire::ErrorCode) for
/// the rejection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentLogicErrorKind {
    /// An actor's status transition was not a legal lattice edge, or broke
    /// the finality barrier.
    WrongStatus,
    /// The command's origin is not one of the two channel peers.
    WrongActor,
    /// A diff changed fields belonging to the non-originating actor.
    ChangedOtherActor,
}

/// A payment status transition was illegal under the status lattice, or a
/// command otherwise violated the payment-logic rules (as opposed to pure
/// structural validation).
#[derive(Debug, Clone)]
pub struct PaymentLogicError {
    /// Machine-readable reason.
    pub reason: String,
    /// Which rule this violates, for wire error-code selection.
    pub kind: PaymentLogicErrorKind,
}

impl PaymentLogicError {
    /// Creates a new status-transition error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: PaymentLogicErrorKind::WrongStatus,
        }
    }

    /// Creates an error for a command whose origin is not a channel peer.
    #[must_use]
    pub fn wrong_actor(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: PaymentLogicErrorKind::WrongActor,
        }
    }

    /// Creates an error for a diff that touched the non-originating
    /// actor's fields.
    #[must_use]
    pub fn changed_other_actor(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: PaymentLogicErrorKind::ChangedOtherActor,
        }
    }
}

impl fmt::Display for PaymentLogicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment logic error: {}", self.reason)
    }
}

impl std::error::Error for PaymentLogicError {}

/// The [`BusinessContext`](crate::hooks::BusinessContext) collaborator
/// rejected a command or progression step.
#[derive(Debug, Clone)]
pub enum BusinessError {
    /// The counterparty is not authorized to act on this payment.
    NotAuthorized(String),
    /// A field in the proposed diff failed business validation.
    ValidationFailure(String),
    /// The business context is unilaterally aborting the payment.
    ForceAbort(String),
}

impl fmt::Display for BusinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthorized(msg) => write!(f, "not authorized: {msg}"),
            Self::ValidationFailure(msg) => write!(f, "validation failure: {msg}"),
            Self::ForceAbort(msg) => write!(f, "forced abort: {msg}"),
        }
    }
}

impl std::error::Error for BusinessError {}

/// The storage layer failed to read, write, or recover state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying engine reported an I/O-level failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value failed to deserialize.
    #[error("corrupt stored value at key '{key}': {reason}")]
    Corrupted {
        /// The key whose value failed to decode.
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A transaction was committed outside of an open `atomic_writes` block.
    #[error("write attempted outside of a transaction")]
    NoActiveTransaction,
}

impl CoreError {
    /// Picks the specific wire [`ErrorCode`](crate::wire::ErrorCode) a
    /// [`crate::channel::Channel`] should report for this error.
    #[must_use]
    pub fn wire_code(&self) -> crate::wire::ErrorCode {
        use crate::wire::ErrorCode;
        match self {
            Self::Structure(_) => ErrorCode::PaymentWrongStructure,
            Self::Executor(_) => ErrorCode::PaymentDependencyError,
            Self::PaymentLogic(err) => match err.kind {
                PaymentLogicErrorKind::WrongStatus => ErrorCode::PaymentWrongStatus,
                PaymentLogicErrorKind::WrongActor => ErrorCode::PaymentWrongActor,
                PaymentLogicErrorKind::ChangedOtherActor => ErrorCode::PaymentChangedOtherActor,
            },
            Self::Business(_) | Self::Storage(_) => ErrorCode::CommandValidationError,
            Self::Protocol(_) => ErrorCode::Malformed,
        }
    }
}

/// A request or response frame was malformed or violated the wire protocol.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    /// A machine-readable error code (mirrors `wire::ErrorCode`).
    pub code: String,
    /// Human-readable message.
    pub message: Option<String>,
}

impl ProtocolError {
    /// Creates a new protocol error.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }

    /// Sets the human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ProtocolError {}
