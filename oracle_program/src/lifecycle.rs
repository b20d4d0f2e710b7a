/// Delegation lifecycle of a record.
///
///   BaseResident → Delegating → EphemeralResident → Undelegating → BaseResident
///
/// Writes are accepted only in the two resident states. Transitions from the
/// wrong state are programming errors and fail immediately.

use serde::{Deserialize, Serialize};

use crate::domain::{Identities, Layer};
use crate::error::ProgramError;
use crate::pubkey::Pubkey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    #[default]
    BaseResident,
    Delegating,
    EphemeralResident,
    Undelegating,
}

impl DelegationStatus {
    pub fn begin_delegate(self) -> Result<Self, ProgramError> {
        self.step("delegate", DelegationStatus::BaseResident, DelegationStatus::Delegating)
    }

    pub fn complete_delegate(self) -> Result<Self, ProgramError> {
        self.step(
            "complete delegation",
            DelegationStatus::Delegating,
            DelegationStatus::EphemeralResident,
        )
    }

    pub fn begin_undelegate(self) -> Result<Self, ProgramError> {
        self.step(
            "undelegate",
            DelegationStatus::EphemeralResident,
            DelegationStatus::Undelegating,
        )
    }

    pub fn complete_undelegate(self) -> Result<Self, ProgramError> {
        self.step(
            "complete undelegation",
            DelegationStatus::Undelegating,
            DelegationStatus::BaseResident,
        )
    }

    fn step(
        self,
        operation: &'static str,
        from: DelegationStatus,
        to: DelegationStatus,
    ) -> Result<Self, ProgramError> {
        if self != from {
            return Err(ProgramError::InvalidDelegationState {
                operation,
                status: self,
            });
        }
        Ok(to)
    }

    /// The layer allowed to mutate the record, or `None` while a transition
    /// window is open.
    pub fn write_layer(self) -> Option<Layer> {
        match self {
            DelegationStatus::BaseResident => Some(Layer::Base),
            DelegationStatus::EphemeralResident => Some(Layer::Ephemeral),
            DelegationStatus::Delegating | DelegationStatus::Undelegating => None,
        }
    }

    /// Require that a data-mutating `operation` may be issued now.
    pub fn require_writable(self, operation: &'static str) -> Result<Layer, ProgramError> {
        self.write_layer()
            .ok_or(ProgramError::InvalidDelegationState {
                operation,
                status: self,
            })
    }
}

/// Reconstruct the lifecycle state from what the two layers show.
///
/// `base_owner` is the record's owner on the base layer (`None` when the
/// record does not exist). `hint` disambiguates the one state pair the
/// ledgers cannot: base owned by the delegation program with no ephemeral
/// copy is either still delegating or already undelegating.
pub fn observe_status(
    base_owner: Option<&Pubkey>,
    on_ephemeral: bool,
    identities: &Identities,
    hint: Option<DelegationStatus>,
) -> Option<DelegationStatus> {
    let owner = base_owner?;
    if *owner == identities.program_id {
        return Some(DelegationStatus::BaseResident);
    }
    if *owner != identities.delegation_program {
        return None;
    }
    if on_ephemeral {
        return Some(DelegationStatus::EphemeralResident);
    }
    match hint {
        Some(DelegationStatus::Undelegating) | Some(DelegationStatus::EphemeralResident) => {
            Some(DelegationStatus::Undelegating)
        }
        _ => Some(DelegationStatus::Delegating),
    }
}
