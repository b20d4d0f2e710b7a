//! Program error taxonomy with stable numeric codes.
//!
//! Codes below 6000 follow the framework's reserved ranges so callers that
//! branch on raw codes (e.g. 3012 for an uninitialized account) keep working.
//! Program-specific errors start at 6000.

use crate::lifecycle::DelegationStatus;
use crate::pubkey::Pubkey;
use crate::wire::WireError;

/// First custom error code.
pub const CUSTOM_ERROR_BASE: u32 = 6000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("instruction discriminator not recognized: {0}")]
    InstructionFallbackNotFound(String),

    #[error("instruction did not deserialize: {0}")]
    InstructionDidNotDeserialize(String),

    #[error("account {0} must be a signer")]
    ConstraintSigner(Pubkey),

    #[error("account {0} must be writable")]
    ConstraintMut(Pubkey),

    #[error("seeds constraint violated: expected {expected}, got {actual}")]
    ConstraintSeeds { expected: Pubkey, actual: Pubkey },

    #[error("address constraint violated: expected {expected}, got {actual}")]
    ConstraintAddress { expected: Pubkey, actual: Pubkey },

    #[error("account discriminator mismatch for {0}")]
    AccountDiscriminatorMismatch(Pubkey),

    #[error("account {account} did not deserialize: {reason}")]
    AccountDidNotDeserialize { account: Pubkey, reason: String },

    #[error("not enough account keys: expected {expected}, got {actual}")]
    AccountNotEnoughKeys { expected: usize, actual: usize },

    #[error("account {account} owned by {owner}, expected {expected}")]
    AccountOwnedByWrongProgram {
        account: Pubkey,
        owner: Pubkey,
        expected: Pubkey,
    },

    #[error("invalid program id {0}")]
    InvalidProgramId(Pubkey),

    #[error("account {0} not initialized")]
    AccountNotInitialized(Pubkey),

    #[error("derivation seeds exceed the maximum length")]
    MaxSeedLengthExceeded,

    // -- custom (6000+) --
    #[error("instruction {instruction} is not valid on the {layer} layer")]
    WrongLayer { instruction: String, layer: String },

    #[error("response of {len} bytes exceeds record capacity of {capacity} bytes")]
    ResponseTooLarge { len: usize, capacity: usize },

    #[error("invalid compiled transaction: {0}")]
    InvalidCompiledTransaction(String),

    #[error("oracle identity {0} is not authorized to deliver answers")]
    UnauthorizedOracleIdentity(Pubkey),

    #[error("account {0} already initialized")]
    AccountAlreadyInitialized(Pubkey),

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("cannot {operation} from {status:?}")]
    InvalidDelegationState {
        operation: &'static str,
        status: DelegationStatus,
    },
}

impl ProgramError {
    /// Stable numeric code surfaced in failed-transaction results.
    pub fn code(&self) -> u32 {
        match self {
            ProgramError::InstructionFallbackNotFound(_) => 101,
            ProgramError::InstructionDidNotDeserialize(_) => 102,
            ProgramError::ConstraintMut(_) => 2000,
            ProgramError::ConstraintSigner(_) => 2002,
            ProgramError::ConstraintSeeds { .. } => 2006,
            ProgramError::ConstraintAddress { .. } => 2012,
            ProgramError::AccountDiscriminatorMismatch(_) => 3002,
            ProgramError::AccountDidNotDeserialize { .. } => 3003,
            ProgramError::AccountNotEnoughKeys { .. } => 3005,
            ProgramError::AccountOwnedByWrongProgram { .. } => 3007,
            ProgramError::InvalidProgramId(_) => 3008,
            ProgramError::AccountNotInitialized(_) => 3012,
            ProgramError::MaxSeedLengthExceeded => 3013,
            ProgramError::WrongLayer { .. } => CUSTOM_ERROR_BASE,
            ProgramError::ResponseTooLarge { .. } => CUSTOM_ERROR_BASE + 1,
            ProgramError::InvalidCompiledTransaction(_) => CUSTOM_ERROR_BASE + 2,
            ProgramError::UnauthorizedOracleIdentity(_) => CUSTOM_ERROR_BASE + 3,
            ProgramError::AccountAlreadyInitialized(_) => CUSTOM_ERROR_BASE + 4,
            ProgramError::InsufficientFunds { .. } => CUSTOM_ERROR_BASE + 5,
            ProgramError::InvalidDelegationState { .. } => CUSTOM_ERROR_BASE + 6,
        }
    }

    /// Whether `code` reports an instruction sent to the wrong layer or
    /// from the wrong lifecycle state.
    pub fn is_lifecycle_code(code: u32) -> bool {
        code == CUSTOM_ERROR_BASE || code == CUSTOM_ERROR_BASE + 6
    }
}

impl From<WireError> for ProgramError {
    fn from(err: WireError) -> Self {
        ProgramError::InstructionDidNotDeserialize(err.to_string())
    }
}
