//! Shared per-record bookkeeping.
//!
//! One entry per tracked record: lifecycle status, the commit in flight,
//! the outstanding oracle request. All coordinators share one registry.
//! Every accepted change is queued as a `RecordOp` so the session can
//! journal it; replay feeds the same ops back without queueing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use oracle_program::domain::Layer;
use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::error::{lifecycle_error, RuntimeError};
use crate::transaction::Signature;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingRequest {
    pub interaction: Pubkey,
    pub prompt: String,
    pub layer: Layer,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommit {
    pub signature: Signature,
    /// sha256 hex of the record data the commit flushes.
    pub data_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub task_id: u16,
    pub queue: Pubkey,
    pub task: Pubkey,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub payer: Pubkey,
    pub status: DelegationStatus,
    pub commit: Option<PendingCommit>,
    pub outstanding: Option<OutstandingRequest>,
    pub last_response: Option<String>,
    pub tasks: Vec<SubmittedTask>,
}

impl RecordEntry {
    fn new(payer: Pubkey, status: DelegationStatus) -> Self {
        Self {
            payer,
            status,
            commit: None,
            outstanding: None,
            last_response: None,
            tasks: Vec::new(),
        }
    }
}

/// Accepted changes to a record's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOp {
    Tracked {
        record: Pubkey,
        payer: Pubkey,
        status: DelegationStatus,
    },
    DelegateSubmitted {
        record: Pubkey,
        signature: Signature,
    },
    DelegationObserved {
        record: Pubkey,
    },
    CommitSubmitted {
        record: Pubkey,
        commit: PendingCommit,
    },
    CommitLanded {
        record: Pubkey,
    },
    AskSubmitted {
        record: Pubkey,
        request: OutstandingRequest,
    },
    AnswerObserved {
        record: Pubkey,
        response: String,
    },
    RequestAbandoned {
        record: Pubkey,
    },
    UndelegateSubmitted {
        record: Pubkey,
        signature: Signature,
    },
    UndelegationObserved {
        record: Pubkey,
    },
    TaskSubmitted {
        record: Pubkey,
        task: SubmittedTask,
    },
}

impl RecordOp {
    pub fn record(&self) -> &Pubkey {
        match self {
            RecordOp::Tracked { record, .. }
            | RecordOp::DelegateSubmitted { record, .. }
            | RecordOp::DelegationObserved { record }
            | RecordOp::CommitSubmitted { record, .. }
            | RecordOp::CommitLanded { record }
            | RecordOp::AskSubmitted { record, .. }
            | RecordOp::AnswerObserved { record, .. }
            | RecordOp::RequestAbandoned { record }
            | RecordOp::UndelegateSubmitted { record, .. }
            | RecordOp::UndelegationObserved { record }
            | RecordOp::TaskSubmitted { record, .. } => record,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    records: BTreeMap<Pubkey, RecordEntry>,
    pending: Vec<RecordOp>,
}

/// Cloneable handle to the shared registry.
#[derive(Debug, Clone, Default)]
pub struct RecordRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `op` and queue it for persistence.
    pub fn apply(&self, op: RecordOp) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        apply_op(&mut state.records, &op)?;
        state.pending.push(op);
        Ok(())
    }

    /// Apply a journaled op. Not queued again.
    pub fn replay(&self, op: &RecordOp) -> Result<(), RuntimeError> {
        apply_op(&mut self.lock().records, op)
    }

    /// Take the ops applied since the last drain, in order.
    pub fn drain_ops(&self) -> Vec<RecordOp> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Put drained ops back ahead of anything queued since, for the next
    /// drain to pick up.
    pub fn requeue_ops(&self, ops: Vec<RecordOp>) {
        let mut state = self.lock();
        let newer = std::mem::replace(&mut state.pending, ops);
        state.pending.extend(newer);
    }

    pub fn entry(&self, record: &Pubkey) -> Option<RecordEntry> {
        self.lock().records.get(record).cloned()
    }

    pub fn require(&self, record: &Pubkey) -> Result<RecordEntry, RuntimeError> {
        self.entry(record)
            .ok_or(RuntimeError::UnknownRecord(*record))
    }

    pub fn status(&self, record: &Pubkey) -> Option<DelegationStatus> {
        self.lock().records.get(record).map(|e| e.status)
    }

    pub fn snapshot(&self) -> BTreeMap<Pubkey, RecordEntry> {
        self.lock().records.clone()
    }
}

fn apply_op(records: &mut BTreeMap<Pubkey, RecordEntry>, op: &RecordOp) -> Result<(), RuntimeError> {
    if let RecordOp::Tracked {
        record,
        payer,
        status,
    } = op
    {
        records
            .entry(*record)
            .and_modify(|e| e.status = *status)
            .or_insert_with(|| RecordEntry::new(*payer, *status));
        return Ok(());
    }

    let entry = records
        .get_mut(op.record())
        .ok_or(RuntimeError::UnknownRecord(*op.record()))?;

    match op {
        RecordOp::Tracked { .. } => {}
        RecordOp::DelegateSubmitted { .. } => {
            entry.status = entry.status.begin_delegate().map_err(lifecycle_error)?;
        }
        RecordOp::DelegationObserved { .. } => {
            entry.status = entry.status.complete_delegate().map_err(lifecycle_error)?;
        }
        RecordOp::CommitSubmitted { commit, .. } => {
            if entry.status != DelegationStatus::EphemeralResident {
                return Err(RuntimeError::InvalidState {
                    operation: "commit",
                    status: entry.status,
                });
            }
            entry.commit = Some(commit.clone());
        }
        RecordOp::CommitLanded { .. } => {
            entry.commit = None;
        }
        RecordOp::AskSubmitted { request, record } => {
            if entry.outstanding.is_some() {
                return Err(RuntimeError::RequestOutstanding(*record));
            }
            entry.status.require_writable("ask").map_err(lifecycle_error)?;
            entry.outstanding = Some(request.clone());
            entry.last_response = None;
        }
        RecordOp::AnswerObserved { response, .. } => {
            entry.outstanding = None;
            entry.last_response = Some(response.clone());
        }
        RecordOp::RequestAbandoned { .. } => {
            entry.outstanding = None;
        }
        RecordOp::UndelegateSubmitted { .. } => {
            entry.status = entry.status.begin_undelegate().map_err(lifecycle_error)?;
            // Undelegation flushes as part of the handoff.
            entry.commit = None;
        }
        RecordOp::UndelegationObserved { .. } => {
            entry.status = entry.status.complete_undelegate().map_err(lifecycle_error)?;
        }
        RecordOp::TaskSubmitted { task, .. } => {
            entry.tasks.push(task.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Pubkey {
        Pubkey::hashed(b"record")
    }

    fn sig(s: &str) -> Signature {
        Signature(s.to_string())
    }

    fn tracked() -> RecordRegistry {
        let reg = RecordRegistry::new();
        reg.apply(RecordOp::Tracked {
            record: record(),
            payer: Pubkey::hashed(b"payer"),
            status: DelegationStatus::BaseResident,
        })
        .unwrap();
        reg
    }

    #[test]
    fn full_cycle_returns_to_base() {
        let reg = tracked();
        for op in [
            RecordOp::DelegateSubmitted {
                record: record(),
                signature: sig("d"),
            },
            RecordOp::DelegationObserved { record: record() },
            RecordOp::UndelegateSubmitted {
                record: record(),
                signature: sig("u"),
            },
            RecordOp::UndelegationObserved { record: record() },
        ] {
            reg.apply(op).unwrap();
        }
        assert_eq!(reg.status(&record()), Some(DelegationStatus::BaseResident));
        assert_eq!(reg.drain_ops().len(), 5);
        assert!(reg.drain_ops().is_empty());
    }

    #[test]
    fn requeued_ops_stay_ahead_of_newer_ones() {
        let reg = tracked();
        let drained = reg.drain_ops();
        reg.apply(RecordOp::DelegateSubmitted {
            record: record(),
            signature: sig("d"),
        })
        .unwrap();

        reg.requeue_ops(drained.clone());
        let ops = reg.drain_ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], drained[0]);
        assert!(matches!(ops[1], RecordOp::DelegateSubmitted { .. }));
    }

    #[test]
    fn undelegate_from_base_is_rejected_and_not_queued() {
        let reg = tracked();
        reg.drain_ops();
        let err = reg
            .apply(RecordOp::UndelegateSubmitted {
                record: record(),
                signature: sig("u"),
            })
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::InvalidState {
                operation: "undelegate",
                status: DelegationStatus::BaseResident,
            }
        );
        assert!(reg.drain_ops().is_empty());
    }

    #[test]
    fn second_outstanding_request_is_rejected() {
        let reg = tracked();
        let request = OutstandingRequest {
            interaction: Pubkey::hashed(b"i1"),
            prompt: "a".into(),
            layer: Layer::Base,
            signature: sig("a"),
        };
        reg.apply(RecordOp::AskSubmitted {
            record: record(),
            request: request.clone(),
        })
        .unwrap();
        let err = reg
            .apply(RecordOp::AskSubmitted {
                record: record(),
                request,
            })
            .unwrap_err();
        assert_eq!(err, RuntimeError::RequestOutstanding(record()));
    }

    #[test]
    fn ask_during_transition_is_rejected() {
        let reg = tracked();
        reg.apply(RecordOp::DelegateSubmitted {
            record: record(),
            signature: sig("d"),
        })
        .unwrap();
        let err = reg
            .apply(RecordOp::AskSubmitted {
                record: record(),
                request: OutstandingRequest {
                    interaction: Pubkey::hashed(b"i"),
                    prompt: "q".into(),
                    layer: Layer::Ephemeral,
                    signature: sig("a"),
                },
            })
            .unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::ProtocolState);
    }

    #[test]
    fn replay_does_not_requeue() {
        let reg = RecordRegistry::new();
        reg.replay(&RecordOp::Tracked {
            record: record(),
            payer: Pubkey::hashed(b"payer"),
            status: DelegationStatus::BaseResident,
        })
        .unwrap();
        assert!(reg.entry(&record()).is_some());
        assert!(reg.drain_ops().is_empty());
    }

    #[test]
    fn ops_on_untracked_records_fail() {
        let reg = RecordRegistry::new();
        let err = reg
            .apply(RecordOp::CommitLanded { record: record() })
            .unwrap_err();
        assert_eq!(err, RuntimeError::UnknownRecord(record()));
    }
}
