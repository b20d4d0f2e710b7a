/// Structural checks on compiled descriptors.
///
/// Non-panicking: every check returns the first violation found, tagged
/// with the invariant it broke.

use std::collections::BTreeSet;

use crate::compiled::{CompiledTransaction, MAX_TABLE_ACCOUNTS};
use crate::error::ProgramError;
use crate::pubkey::{MAX_SEEDS, MAX_SEED_LEN};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Validate a compiled descriptor before it is scheduled or replayed.
pub fn validate_compiled_transaction(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    check_table_size(tx)?;
    check_bucket_counts(tx)?;
    check_unique_accounts(tx)?;
    check_index_bounds(tx)?;
    check_signer_seeds(tx)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual checks (private)
// ---------------------------------------------------------------------------

fn violation(tag: &str, detail: String) -> ProgramError {
    ProgramError::InvalidCompiledTransaction(format!("[INVARIANT:{}] {}", tag, detail))
}

fn check_table_size(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    if tx.accounts.len() > MAX_TABLE_ACCOUNTS {
        return Err(violation(
            "table_size",
            format!("{} accounts exceed {}", tx.accounts.len(), MAX_TABLE_ACCOUNTS),
        ));
    }
    if tx.instructions.is_empty() {
        return Err(violation("table_size", "no instructions".to_string()));
    }
    Ok(())
}

/// rw signers + ro signers + rw non-signers + ro non-signers == table length.
/// The read-only count is the remainder, so it suffices that the first three
/// buckets fit.
fn check_bucket_counts(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    let declared =
        tx.num_rw_signers as usize + tx.num_ro_signers as usize + tx.num_rw as usize;
    if declared > tx.accounts.len() {
        return Err(violation(
            "bucket_counts",
            format!(
                "declared {} signer/writable slots but table has {} accounts",
                declared,
                tx.accounts.len()
            ),
        ));
    }
    Ok(())
}

fn check_unique_accounts(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    let mut seen = BTreeSet::new();
    for key in &tx.accounts {
        if !seen.insert(key) {
            return Err(violation("unique_accounts", format!("{} appears twice", key)));
        }
    }
    Ok(())
}

fn check_index_bounds(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    let len = tx.accounts.len();
    for (n, ix) in tx.instructions.iter().enumerate() {
        if ix.program_id_index as usize >= len {
            return Err(violation(
                "index_bounds",
                format!(
                    "instruction {} program index {} >= {}",
                    n, ix.program_id_index, len
                ),
            ));
        }
        if let Some(bad) = ix.accounts.iter().find(|i| **i as usize >= len) {
            return Err(violation(
                "index_bounds",
                format!("instruction {} account index {} >= {}", n, bad, len),
            ));
        }
    }
    Ok(())
}

fn check_signer_seeds(tx: &CompiledTransaction) -> Result<(), ProgramError> {
    for seeds in &tx.signer_seeds {
        if seeds.len() > MAX_SEEDS + 1 || seeds.iter().any(|s| s.len() > MAX_SEED_LEN) {
            return Err(violation(
                "signer_seeds",
                "seed set exceeds derivation limits".to_string(),
            ));
        }
    }
    Ok(())
}
