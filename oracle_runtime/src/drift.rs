//! Drift detection: compare a live registry against what its journal
//! replays to.
//!
//! A clean report means every accepted change reached the journal.

use std::collections::{BTreeMap, BTreeSet};

use oracle_program::lifecycle::DelegationStatus;
use oracle_program::pubkey::Pubkey;

use crate::error::RuntimeError;
use crate::proto_types::ProtoJournalEntry;
use crate::registry::RecordEntry;
use crate::replay;

/// Replay the same entries twice and require identical hashes.
pub fn verify_determinism(entries: &[ProtoJournalEntry]) -> Result<String, RuntimeError> {
    let first = replay::rebuild_hash(entries)?;
    let second = replay::rebuild_hash(entries)?;
    if first != second {
        return Err(RuntimeError::Journal(format!(
            "replay is not deterministic: {} vs {}",
            first, second
        )));
    }
    Ok(first)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDrift {
    pub record: Pubkey,
    pub live: DelegationStatus,
    pub replayed: DelegationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub only_live: Vec<Pubkey>,
    pub only_replayed: Vec<Pubkey>,
    pub status: Vec<StatusDrift>,
    /// Records whose commit, outstanding request, response or task list
    /// differ.
    pub bookkeeping: Vec<Pubkey>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.only_live.is_empty()
            && self.only_replayed.is_empty()
            && self.status.is_empty()
            && self.bookkeeping.is_empty()
    }
}

pub fn compare(
    live: &BTreeMap<Pubkey, RecordEntry>,
    replayed: &BTreeMap<Pubkey, RecordEntry>,
) -> DriftReport {
    let live_keys: BTreeSet<&Pubkey> = live.keys().collect();
    let replayed_keys: BTreeSet<&Pubkey> = replayed.keys().collect();

    let mut report = DriftReport {
        only_live: live_keys.difference(&replayed_keys).map(|k| **k).collect(),
        only_replayed: replayed_keys.difference(&live_keys).map(|k| **k).collect(),
        ..DriftReport::default()
    };

    for key in live_keys.intersection(&replayed_keys) {
        let (a, b) = (&live[*key], &replayed[*key]);
        if a.status != b.status {
            report.status.push(StatusDrift {
                record: **key,
                live: a.status,
                replayed: b.status,
            });
        }
        if a.commit != b.commit
            || a.outstanding != b.outstanding
            || a.last_response != b.last_response
            || a.tasks != b.tasks
        {
            report.bookkeeping.push(**key);
        }
    }
    report
}
