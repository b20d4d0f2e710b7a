//! One execution layer: an account store plus the program kernel.

use oracle_program::domain::{AccountStore, Identities, Layer, SYSTEM_PROGRAM_ID};
use oracle_program::effects::Effect;
use oracle_program::error::ProgramError;
use oracle_program::processor::{process_instruction, ProgramEnv};
use oracle_program::pubkey::Pubkey;

use crate::client::ClientError;
use crate::error::MISSING_SIGNATURE_CODE;
use crate::transaction::Transaction;

/// Why a transaction failed, and which program failed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFailure {
    pub program: Pubkey,
    pub code: u32,
    pub message: String,
}

impl TxFailure {
    pub fn program(program: Pubkey, err: &ProgramError) -> Self {
        Self {
            program,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<TxFailure> for ClientError {
    fn from(f: TxFailure) -> Self {
        ClientError::Rejected {
            program: f.program,
            code: f.code,
            message: f.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerState {
    pub layer: Layer,
    pub accounts: AccountStore,
}

impl LayerState {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            accounts: AccountStore::new(),
        }
    }

    /// Run every instruction of `tx` against a copy of the store. Nothing
    /// is applied here; the caller commits the returned store.
    pub fn execute(
        &self,
        tx: &Transaction,
        ids: &Identities,
    ) -> Result<(AccountStore, Vec<Effect>), TxFailure> {
        verify_signatures(tx)?;
        let env = ProgramEnv::new(self.layer, ids);
        let mut store = self.accounts.clone();
        let mut effects = Vec::new();
        for ix in &tx.instructions {
            let (next, mut produced) = process_instruction(&store, ix, &env)
                .map_err(|e| TxFailure::program(ix.program_id, &e))?;
            store = next;
            effects.append(&mut produced);
        }
        Ok((store, effects))
    }
}

fn verify_signatures(tx: &Transaction) -> Result<(), TxFailure> {
    if !tx.is_signed_by(&tx.fee_payer) {
        return Err(missing_signature(SYSTEM_PROGRAM_ID, &tx.fee_payer));
    }
    for ix in &tx.instructions {
        if let Some(meta) = ix
            .accounts
            .iter()
            .find(|m| m.is_signer && !tx.is_signed_by(&m.pubkey))
        {
            return Err(missing_signature(ix.program_id, &meta.pubkey));
        }
    }
    Ok(())
}

fn missing_signature(program: Pubkey, key: &Pubkey) -> TxFailure {
    TxFailure {
        program,
        code: MISSING_SIGNATURE_CODE,
        message: format!("missing signature for {}", key),
    }
}
