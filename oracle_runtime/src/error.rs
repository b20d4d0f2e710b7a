//! Runtime error taxonomy.
//!
//! Every failure a caller can see is classified so it can branch on
//! retry-vs-fatal without string matching. Queue rejections keep the
//! numeric code the queue returned.

use oracle_program::error::ProgramError;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

/// Code the task queue returns when the queue or its authority record
/// does not exist.
pub const QUEUE_NOT_RECOGNIZED_CODE: u32 = 3012;

/// Code returned when the task account is already in use.
pub const TASK_ID_IN_USE_CODE: u32 = 0;

/// Code returned when a declared signer did not sign.
pub const MISSING_SIGNATURE_CODE: u32 = 2002;

/// Broad failure classes. Callers branch on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Operation invoked from the wrong lifecycle state. Never retry.
    ProtocolState,
    /// A prior asynchronous step has not visibly landed yet. Retry with backoff.
    PropagationDelay,
    /// A bounded wait ran out.
    ExternalNonResponse,
    /// The task queue refused the submission.
    QueueValidation,
    /// Network or RPC failure. Always retryable.
    Transport,
    /// Any other program failure.
    Program,
    Config,
    Journal,
}

/// Synchronous task-queue rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueRejection {
    #[error("queue or queue authority not recognized (code {QUEUE_NOT_RECOGNIZED_CODE})")]
    NotRecognized,
    #[error("task id {0} already in use")]
    TaskIdInUse(u16),
    #[error("task identity {0} did not sign")]
    MissingTaskSigner(Pubkey),
    #[error("queue rejected submission with code {code}: {message}")]
    Other { code: u32, message: String },
}

impl QueueRejection {
    pub fn code(&self) -> u32 {
        match self {
            QueueRejection::NotRecognized => QUEUE_NOT_RECOGNIZED_CODE,
            QueueRejection::TaskIdInUse(_) => TASK_ID_IN_USE_CODE,
            QueueRejection::MissingTaskSigner(_) => MISSING_SIGNATURE_CODE,
            QueueRejection::Other { code, .. } => *code,
        }
    }

    /// Classify a rejection code returned for a submission of `task_id`
    /// signed by `task`.
    pub fn from_code(code: u32, message: &str, task_id: u16, task: Pubkey) -> Self {
        match code {
            QUEUE_NOT_RECOGNIZED_CODE => QueueRejection::NotRecognized,
            TASK_ID_IN_USE_CODE => QueueRejection::TaskIdInUse(task_id),
            MISSING_SIGNATURE_CODE => QueueRejection::MissingTaskSigner(task),
            _ => QueueRejection::Other {
                code,
                message: message.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("cannot {operation} while record is {status:?}")]
    InvalidState {
        operation: &'static str,
        status: DelegationStatus,
    },

    #[error("record {0} already has an outstanding oracle request")]
    RequestOutstanding(Pubkey),

    #[error("record {0} is not yet writable on the ephemeral layer")]
    NotYetDelegated(Pubkey),

    #[error("record {0} is not tracked by this runtime")]
    UnknownRecord(Pubkey),

    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("task queue rejected submission: {0}")]
    QueueRejected(QueueRejection),

    /// A program failed the transaction. `program` is known when the layer
    /// reports which one.
    #[error("program error {code}: {message}")]
    Program {
        program: Option<Pubkey>,
        code: u32,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("kernel error: {0}")]
    Kernel(#[from] ProgramError),
}

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RuntimeError::InvalidState { .. } | RuntimeError::RequestOutstanding(_) => {
                ErrorClass::ProtocolState
            }
            RuntimeError::NotYetDelegated(_) => ErrorClass::PropagationDelay,
            RuntimeError::Timeout { .. } | RuntimeError::Cancelled(_) => {
                ErrorClass::ExternalNonResponse
            }
            RuntimeError::QueueRejected(_) => ErrorClass::QueueValidation,
            RuntimeError::Transport(_) => ErrorClass::Transport,
            RuntimeError::Program { code, .. } if ProgramError::is_lifecycle_code(*code) => ErrorClass::ProtocolState,
            RuntimeError::Kernel(e) if ProgramError::is_lifecycle_code(e.code()) => ErrorClass::ProtocolState,
            RuntimeError::Program { .. } | RuntimeError::Kernel(_) | RuntimeError::UnknownRecord(_) => {
                ErrorClass::Program
            }
            RuntimeError::Config(_) => ErrorClass::Config,
            RuntimeError::Journal(_) => ErrorClass::Journal,
        }
    }

    /// True only for propagation delays and transport failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::PropagationDelay | ErrorClass::Transport
        )
    }

    /// The numeric code a caller can branch on, when there is one.
    pub fn code(&self) -> Option<u32> {
        match self {
            RuntimeError::QueueRejected(r) => Some(r.code()),
            RuntimeError::Program { code, .. } => Some(*code),
            RuntimeError::Kernel(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Lift a kernel lifecycle violation into the runtime's protocol-state error.
pub(crate) fn lifecycle_error(e: ProgramError) -> RuntimeError {
    match e {
        ProgramError::InvalidDelegationState { operation, status } => {
            RuntimeError::InvalidState { operation, status }
        }
        other => RuntimeError::Kernel(other),
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Journal(e.to_string())
    }
}
