//! Transactions and the submit-then-confirm loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use oracle_program::domain::Instruction;
use oracle_program::pubkey::Pubkey;

use crate::client::{Blockhash, LedgerClient, TransactionStatus};
use crate::error::RuntimeError;
use crate::config::PollPolicies;
use crate::poll::{poll_until, retry_transient, CancellationToken, Clock, PollPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub fee_payer: Pubkey,
    /// Identities that signed. Always includes the fee payer.
    pub signers: Vec<Pubkey>,
    pub instructions: Vec<Instruction>,
    pub blockhash: Blockhash,
}

impl Transaction {
    pub fn new(fee_payer: Pubkey, instructions: Vec<Instruction>, blockhash: Blockhash) -> Self {
        Self {
            fee_payer,
            signers: vec![fee_payer],
            instructions,
            blockhash,
        }
    }

    /// Add an extra signer, such as a freshly generated task identity.
    pub fn with_signer(mut self, signer: Pubkey) -> Self {
        if !self.signers.contains(&signer) {
            self.signers.push(signer);
        }
        self
    }

    pub fn is_signed_by(&self, key: &Pubkey) -> bool {
        self.signers.contains(key)
    }

    pub fn signature(&self) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(self.fee_payer.as_ref());
        for signer in &self.signers {
            hasher.update(signer.as_ref());
        }
        for ix in &self.instructions {
            hasher.update(ix.program_id.as_ref());
            for meta in &ix.accounts {
                hasher.update(meta.pubkey.as_ref());
                hasher.update([meta.is_signer as u8, meta.is_writable as u8]);
            }
            hasher.update((ix.data.len() as u32).to_le_bytes());
            hasher.update(&ix.data);
        }
        hasher.update(self.blockhash);
        Signature(hex::encode(hasher.finalize()))
    }
}

/// Transaction id, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(pub String);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stamp and submit `instructions`, retrying transient rejections, then
/// wait for confirmation. Only the send is retried: a confirmation timeout
/// surfaces without resubmitting.
pub fn send_and_confirm(
    client: &dyn LedgerClient,
    fee_payer: Pubkey,
    extra_signers: &[Pubkey],
    instructions: Vec<Instruction>,
    policies: &PollPolicies,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<Signature, RuntimeError> {
    let signature = retry_transient("submit", &policies.transient, clock, cancel, || {
        send(client, fee_payer, extra_signers, instructions.clone())
    })?;
    confirm(client, &signature, &policies.confirmation, clock, cancel)?;
    Ok(signature)
}

/// Stamp and submit without waiting.
pub fn send(
    client: &dyn LedgerClient,
    fee_payer: Pubkey,
    extra_signers: &[Pubkey],
    instructions: Vec<Instruction>,
) -> Result<Signature, RuntimeError> {
    let blockhash = client.latest_blockhash()?;
    let tx = extra_signers
        .iter()
        .fold(Transaction::new(fee_payer, instructions, blockhash), |tx, s| {
            tx.with_signer(*s)
        });
    let signature = client.send_transaction(&tx)?;
    debug!(layer = %client.layer(), %signature, "transaction sent");
    Ok(signature)
}

/// Wait until `signature` is confirmed. A failed transaction is a program error.
pub fn confirm(
    client: &dyn LedgerClient,
    signature: &Signature,
    policy: &PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<(), RuntimeError> {
    poll_until("confirmation", policy, clock, cancel, |_| {
        match client.signature_status(signature)? {
            Some(TransactionStatus::Confirmed) => Ok(Some(())),
            Some(TransactionStatus::Failed { code, message }) => {
                Err(RuntimeError::Program {
                    program: None,
                    code,
                    message,
                })
            }
            Some(TransactionStatus::Processed) | None => Ok(None),
        }
    })?
    .into_result("confirmation")?;
    info!(layer = %client.layer(), %signature, "transaction confirmed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use oracle_program::domain::{Account, Layer};

    use crate::client::ClientError;
    use crate::poll::ManualClock;

    /// Client whose status answers are scripted.
    struct Scripted {
        statuses: Mutex<Vec<Option<TransactionStatus>>>,
        sent: Mutex<Vec<Transaction>>,
    }

    impl Scripted {
        fn new(mut statuses: Vec<Option<TransactionStatus>>) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl LedgerClient for Scripted {
        fn layer(&self) -> Layer {
            Layer::Base
        }

        fn latest_blockhash(&self) -> Result<Blockhash, ClientError> {
            Ok([9u8; 32])
        }

        fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ClientError> {
            self.sent.lock().unwrap().push(tx.clone());
            Ok(tx.signature())
        }

        fn signature_status(&self, _: &Signature) -> Result<Option<TransactionStatus>, ClientError> {
            Ok(self.statuses.lock().unwrap().pop().flatten())
        }

        fn get_account(&self, _: &Pubkey) -> Result<Option<Account>, ClientError> {
            Ok(None)
        }
    }

    fn payer() -> Pubkey {
        Pubkey::hashed(b"payer")
    }

    fn send_then_confirm(client: &Scripted, confirmation: PollPolicy, clock: &ManualClock) -> Result<Signature, RuntimeError> {
        let policies = PollPolicies {
            confirmation,
            ..PollPolicies::default()
        };
        send_and_confirm(client, payer(), &[], vec![], &policies, clock, &CancellationToken::new())
    }

    #[test]
    fn confirms_after_processed() {
        let client = Scripted::new(vec![
            None,
            Some(TransactionStatus::Processed),
            Some(TransactionStatus::Confirmed),
        ]);
        let clock = ManualClock::new();
        send_then_confirm(&client, PollPolicy::fixed(5, 100), &clock).unwrap();
        assert_eq!(clock.now().as_millis(), 200);
    }

    #[test]
    fn failed_status_surfaces_code() {
        let client = Scripted::new(vec![Some(TransactionStatus::Failed {
            code: 6006,
            message: "bad state".into(),
        })]);
        let err = send_then_confirm(&client, PollPolicy::fixed(5, 100), &ManualClock::new()).unwrap_err();
        assert_eq!(err.code(), Some(6006));
    }

    #[test]
    fn unconfirmed_times_out() {
        let client = Scripted::new(vec![]);
        let err = send_then_confirm(&client, PollPolicy::fixed(3, 100), &ManualClock::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { attempts: 3, .. }));
    }

    #[test]
    fn extra_signers_are_attached_once() {
        let client = Scripted::new(vec![Some(TransactionStatus::Confirmed)]);
        let task = Pubkey::hashed(b"task");
        send(&client, payer(), &[task, task, payer()], vec![]).unwrap();
        let sent = client.sent.lock().unwrap();
        assert_eq!(sent[0].signers, vec![payer(), task]);
    }

    #[test]
    fn signature_depends_on_blockhash() {
        let a = Transaction::new(payer(), vec![], [1u8; 32]);
        let b = Transaction::new(payer(), vec![], [2u8; 32]);
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), a.clone().signature());
    }
}
