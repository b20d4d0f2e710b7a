//! Proto ↔ registry conversion bridge.
//!
//! Converts between the journal's protobuf types (proto_types.rs) and the
//! registry's `RecordOp`. Decoding never trusts the file: malformed
//! entries are journal errors, not panics.

use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::error::RuntimeError;
use crate::proto_types::*;
use crate::registry::{OutstandingRequest, PendingCommit, RecordOp, SubmittedTask};
use crate::transaction::Signature;

pub fn entry_to_proto(sequence: u64, logical_time_ms: u64, op: &RecordOp) -> ProtoJournalEntry {
    ProtoJournalEntry {
        sequence,
        logical_time_ms,
        op: Some(op_to_proto(op)),
    }
}

pub fn op_to_proto(op: &RecordOp) -> ProtoRecordOp {
    let kind = match op {
        RecordOp::Tracked {
            record,
            payer,
            status,
        } => OpKind::Tracked(Tracked {
            record: key_bytes(record),
            payer: key_bytes(payer),
            status: status_name(*status).to_string(),
        }),
        RecordOp::DelegateSubmitted { record, signature } => {
            OpKind::DelegateSubmitted(submitted(record, signature))
        }
        RecordOp::DelegationObserved { record } => OpKind::DelegationObserved(observed(record)),
        RecordOp::CommitSubmitted { record, commit } => OpKind::CommitSubmitted(CommitSubmitted {
            record: key_bytes(record),
            signature: commit.signature.0.clone(),
            data_hash: commit.data_hash.clone(),
        }),
        RecordOp::CommitLanded { record } => OpKind::CommitLanded(observed(record)),
        RecordOp::AskSubmitted { record, request } => OpKind::AskSubmitted(AskSubmitted {
            record: key_bytes(record),
            interaction: key_bytes(&request.interaction),
            prompt: request.prompt.clone(),
            layer: request.layer.to_string(),
            signature: request.signature.0.clone(),
        }),
        RecordOp::AnswerObserved { record, response } => OpKind::AnswerObserved(AnswerObserved {
            record: key_bytes(record),
            response: response.clone(),
        }),
        RecordOp::RequestAbandoned { record } => OpKind::RequestAbandoned(observed(record)),
        RecordOp::UndelegateSubmitted { record, signature } => {
            OpKind::UndelegateSubmitted(submitted(record, signature))
        }
        RecordOp::UndelegationObserved { record } => OpKind::UndelegationObserved(observed(record)),
        RecordOp::TaskSubmitted { record, task } => OpKind::TaskSubmitted(TaskSubmitted {
            record: key_bytes(record),
            task_id: task.task_id as u32,
            queue: key_bytes(&task.queue),
            task: key_bytes(&task.task),
            signature: task.signature.0.clone(),
        }),
    };
    ProtoRecordOp { kind: Some(kind) }
}

pub fn proto_to_op(proto: &ProtoJournalEntry) -> Result<RecordOp, RuntimeError> {
    let kind = proto
        .op
        .as_ref()
        .and_then(|op| op.kind.as_ref())
        .ok_or_else(|| malformed(proto.sequence, "entry has no op"))?;
    let seq = proto.sequence;

    let op = match kind {
        OpKind::Tracked(t) => RecordOp::Tracked {
            record: key(seq, &t.record)?,
            payer: key(seq, &t.payer)?,
            status: parse_status(seq, &t.status)?,
        },
        OpKind::DelegateSubmitted(s) => RecordOp::DelegateSubmitted {
            record: key(seq, &s.record)?,
            signature: Signature(s.signature.clone()),
        },
        OpKind::DelegationObserved(o) => RecordOp::DelegationObserved {
            record: key(seq, &o.record)?,
        },
        OpKind::CommitSubmitted(c) => RecordOp::CommitSubmitted {
            record: key(seq, &c.record)?,
            commit: PendingCommit {
                signature: Signature(c.signature.clone()),
                data_hash: c.data_hash.clone(),
            },
        },
        OpKind::CommitLanded(o) => RecordOp::CommitLanded {
            record: key(seq, &o.record)?,
        },
        OpKind::AskSubmitted(a) => RecordOp::AskSubmitted {
            record: key(seq, &a.record)?,
            request: OutstandingRequest {
                interaction: key(seq, &a.interaction)?,
                prompt: a.prompt.clone(),
                layer: parse_layer(seq, &a.layer)?,
                signature: Signature(a.signature.clone()),
            },
        },
        OpKind::AnswerObserved(a) => RecordOp::AnswerObserved {
            record: key(seq, &a.record)?,
            response: a.response.clone(),
        },
        OpKind::RequestAbandoned(o) => RecordOp::RequestAbandoned {
            record: key(seq, &o.record)?,
        },
        OpKind::UndelegateSubmitted(s) => RecordOp::UndelegateSubmitted {
            record: key(seq, &s.record)?,
            signature: Signature(s.signature.clone()),
        },
        OpKind::UndelegationObserved(o) => RecordOp::UndelegationObserved {
            record: key(seq, &o.record)?,
        },
        OpKind::TaskSubmitted(t) => RecordOp::TaskSubmitted {
            record: key(seq, &t.record)?,
            task: SubmittedTask {
                task_id: u16::try_from(t.task_id)
                    .map_err(|_| malformed(seq, "task id out of range"))?,
                queue: key(seq, &t.queue)?,
                task: key(seq, &t.task)?,
                signature: Signature(t.signature.clone()),
            },
        },
    };
    Ok(op)
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn submitted(record: &Pubkey, signature: &Signature) -> Submitted {
    Submitted {
        record: key_bytes(record),
        signature: signature.0.clone(),
    }
}

fn observed(record: &Pubkey) -> Observed {
    Observed {
        record: key_bytes(record),
    }
}

fn key_bytes(key: &Pubkey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

fn key(seq: u64, bytes: &[u8]) -> Result<Pubkey, RuntimeError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| malformed(seq, "identity is not 32 bytes"))?;
    Ok(Pubkey::new_from_array(arr))
}

pub fn status_name(status: DelegationStatus) -> &'static str {
    match status {
        DelegationStatus::BaseResident => "base_resident",
        DelegationStatus::Delegating => "delegating",
        DelegationStatus::EphemeralResident => "ephemeral_resident",
        DelegationStatus::Undelegating => "undelegating",
    }
}

fn parse_status(seq: u64, s: &str) -> Result<DelegationStatus, RuntimeError> {
    match s {
        "base_resident" => Ok(DelegationStatus::BaseResident),
        "delegating" => Ok(DelegationStatus::Delegating),
        "ephemeral_resident" => Ok(DelegationStatus::EphemeralResident),
        "undelegating" => Ok(DelegationStatus::Undelegating),
        other => Err(malformed(seq, &format!("unknown status `{}`", other))),
    }
}

fn parse_layer(seq: u64, s: &str) -> Result<Layer, RuntimeError> {
    match s {
        "base" => Ok(Layer::Base),
        "ephemeral" => Ok(Layer::Ephemeral),
        other => Err(malformed(seq, &format!("unknown layer `{}`", other))),
    }
}

fn malformed(seq: u64, what: &str) -> RuntimeError {
    RuntimeError::Journal(format!("entry {}: {}", seq, what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_op_survives_proto() {
        let op = RecordOp::AskSubmitted {
            record: Pubkey::hashed(b"r"),
            request: OutstandingRequest {
                interaction: Pubkey::hashed(b"i"),
                prompt: "2+2".into(),
                layer: Layer::Ephemeral,
                signature: Signature("ab".into()),
            },
        };
        let entry = entry_to_proto(4, 1000, &op);
        assert_eq!(proto_to_op(&entry).unwrap(), op);
    }

    #[test]
    fn short_identity_is_a_journal_error() {
        let entry = ProtoJournalEntry {
            sequence: 9,
            logical_time_ms: 0,
            op: Some(ProtoRecordOp {
                kind: Some(OpKind::CommitLanded(Observed { record: vec![1, 2] })),
            }),
        };
        let err = proto_to_op(&entry).unwrap_err();
        assert!(matches!(err, RuntimeError::Journal(ref m) if m.contains("entry 9")));
    }

    #[test]
    fn empty_entry_is_rejected() {
        let entry = ProtoJournalEntry {
            sequence: 1,
            logical_time_ms: 0,
            op: None,
        };
        assert!(proto_to_op(&entry).is_err());
    }
}
