//! Reading user records off either layer.

use sha2::{Digest, Sha256};

use oracle_program::account_codec::{decode_user_account, read_response};
use oracle_program::domain::{Identities, Layer, UserAccount};
use oracle_program::lifecycle::{observe_status, DelegationStatus};
use oracle_program::pubkey::Pubkey;

use crate::client::{LedgerClient, Ledgers};
use crate::error::RuntimeError;

/// A record as one layer currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub layer: Layer,
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

impl RecordView {
    pub fn decode(&self, address: &Pubkey) -> Result<UserAccount, RuntimeError> {
        Ok(decode_user_account(address, &self.data)?)
    }

    pub fn response(&self, address: &Pubkey) -> Result<Option<String>, RuntimeError> {
        Ok(read_response(address, &self.data)?)
    }

    pub fn data_hash(&self) -> String {
        data_hash(&self.data)
    }
}

pub fn data_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn fetch(client: &dyn LedgerClient, address: &Pubkey) -> Result<Option<RecordView>, RuntimeError> {
    Ok(client.get_account(address)?.map(|acct| RecordView {
        layer: client.layer(),
        owner: acct.owner,
        data: acct.data,
    }))
}

/// Reconstruct the lifecycle status from both layers. `hint` is the
/// status last recorded locally, used only to tell delegating from
/// undelegating.
pub fn observe(
    ledgers: &Ledgers,
    identities: &Identities,
    address: &Pubkey,
    hint: Option<DelegationStatus>,
) -> Result<Option<DelegationStatus>, RuntimeError> {
    let base = fetch(ledgers.base.as_ref(), address)?;
    let ephemeral = fetch(ledgers.ephemeral.as_ref(), address)?;
    let on_ephemeral = ephemeral
        .as_ref()
        .map(|v| v.owner == identities.program_id)
        .unwrap_or(false);
    Ok(observe_status(
        base.as_ref().map(|v| &v.owner),
        on_ephemeral,
        identities,
        hint,
    ))
}
