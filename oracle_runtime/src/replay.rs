//! Replay orchestrator: rebuild registry state from the journal.
//!
//! Every op goes through the same transition rules the live coordinators
//! use, so a journal that could not have been produced is rejected.

use std::collections::BTreeMap;

use oracle_program::pubkey::Pubkey;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::RuntimeError;
use crate::proto_bridge::{proto_to_op, status_name};
use crate::proto_types::ProtoJournalEntry;
use crate::registry::{RecordEntry, RecordRegistry};

/// Feed `entries` into `registry` in order without queueing them again.
pub fn replay_into(
    registry: &RecordRegistry,
    entries: &[ProtoJournalEntry],
) -> Result<(), RuntimeError> {
    for entry in entries {
        let op = proto_to_op(entry)?;
        registry.replay(&op).map_err(|e| {
            RuntimeError::Journal(format!("entry {} does not replay: {}", entry.sequence, e))
        })?;
    }
    Ok(())
}

/// Rebuild a fresh registry from the journal and return it with its
/// canonical hash.
pub fn rebuild_registry(
    entries: &[ProtoJournalEntry],
) -> Result<(RecordRegistry, String), RuntimeError> {
    let registry = RecordRegistry::new();
    replay_into(&registry, entries)?;
    let hash = registry_hash(&registry.snapshot());
    Ok((registry, hash))
}

pub fn rebuild_hash(entries: &[ProtoJournalEntry]) -> Result<String, RuntimeError> {
    rebuild_registry(entries).map(|(_, hash)| hash)
}

/// sha256 hex over a canonical JSON rendering of the registry. Records are
/// visited in key order and every object is built with a fixed field order.
pub fn registry_hash(records: &BTreeMap<Pubkey, RecordEntry>) -> String {
    let rendered: Vec<Value> = records
        .iter()
        .map(|(record, entry)| entry_value(record, entry))
        .collect();
    let bytes = Value::Array(rendered).to_string();
    hex::encode(Sha256::digest(bytes.as_bytes()))
}

fn entry_value(record: &Pubkey, entry: &RecordEntry) -> Value {
    json!({
        "record": record.to_string(),
        "payer": entry.payer.to_string(),
        "status": status_name(entry.status),
        "commit": entry.commit.as_ref().map(|c| json!({
            "signature": c.signature.0,
            "data_hash": c.data_hash,
        })),
        "outstanding": entry.outstanding.as_ref().map(|r| json!({
            "interaction": r.interaction.to_string(),
            "prompt": r.prompt,
            "layer": r.layer.to_string(),
            "signature": r.signature.0,
        })),
        "last_response": entry.last_response,
        "tasks": entry.tasks.iter().map(|t| json!({
            "task_id": t.task_id,
            "queue": t.queue.to_string(),
            "task": t.task.to_string(),
            "signature": t.signature.0,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto_bridge::entry_to_proto;
    use crate::registry::RecordOp;
    use crate::transaction::Signature;
    use oracle_program::lifecycle::DelegationStatus;

    fn journal(ops: &[RecordOp]) -> Vec<ProtoJournalEntry> {
        ops.iter()
            .enumerate()
            .map(|(i, op)| entry_to_proto(i as u64 + 1, 0, op))
            .collect()
    }

    fn record() -> Pubkey {
        Pubkey::hashed(b"record")
    }

    #[test]
    fn replay_restores_status() {
        let entries = journal(&[
            RecordOp::Tracked {
                record: record(),
                payer: Pubkey::hashed(b"payer"),
                status: DelegationStatus::BaseResident,
            },
            RecordOp::DelegateSubmitted {
                record: record(),
                signature: Signature("d".into()),
            },
        ]);
        let (registry, hash) = rebuild_registry(&entries).unwrap();
        assert_eq!(registry.status(&record()), Some(DelegationStatus::Delegating));
        assert_eq!(hash, rebuild_hash(&entries).unwrap());
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn impossible_journal_is_rejected() {
        let entries = journal(&[
            RecordOp::Tracked {
                record: record(),
                payer: Pubkey::hashed(b"payer"),
                status: DelegationStatus::BaseResident,
            },
            RecordOp::UndelegationObserved { record: record() },
        ]);
        let err = rebuild_registry(&entries).err().unwrap();
        assert!(matches!(err, RuntimeError::Journal(ref m) if m.starts_with("entry 2")));
    }

    #[test]
    fn empty_registry_hash_is_stable() {
        assert_eq!(
            registry_hash(&BTreeMap::new()),
            hex::encode(Sha256::digest(b"[]"))
        );
    }
}
