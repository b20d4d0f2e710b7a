//! External collaborators: the oracle and the task queue.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use oracle_program::compiled::CompiledTransaction;
use oracle_program::domain::{AccountMeta, Identities, Instruction};
use oracle_program::effects::{OracleRequest, QueueTaskRequest, TaskTrigger};
use oracle_program::instructions::task_queue_authority_address;
use oracle_program::pubkey::Pubkey;
use oracle_program::wire::WireWriter;

use crate::error::{MISSING_SIGNATURE_CODE, QUEUE_NOT_RECOGNIZED_CODE, TASK_ID_IN_USE_CODE};
use crate::sim::layer::TxFailure;
use crate::transaction::Transaction;

// ----------------------------------------------------------------------------
// Oracle
// ----------------------------------------------------------------------------

/// Produces the oracle's answer to a prompt. `None` means it never answers.
pub type Responder = Box<dyn Fn(&str) -> Option<String> + Send>;

pub struct OracleService {
    responder: Responder,
    pub answer_delay: Duration,
    /// Every request received, in order.
    pub requests: Vec<OracleRequest>,
}

impl OracleService {
    pub fn new(responder: Responder, answer_delay: Duration) -> Self {
        Self {
            responder,
            answer_delay,
            requests: Vec::new(),
        }
    }

    pub fn set_responder(&mut self, responder: Responder) {
        self.responder = responder;
    }

    pub fn answer(&self, prompt: &str) -> Option<String> {
        (self.responder)(prompt)
    }

    /// The callback the oracle signs to deliver `response`.
    pub fn callback(
        identity: &Pubkey,
        request: &OracleRequest,
        response: &str,
    ) -> Result<Instruction, TxFailure> {
        let mut w = WireWriter::with_prefix(&request.callback_discriminator);
        w.put_str(response).map_err(|e| TxFailure {
            program: request.callback_program,
            code: 102,
            message: e.to_string(),
        })?;
        let mut accounts = vec![AccountMeta::readonly(*identity, true)];
        accounts.extend(request.callback_accounts.iter().copied());
        Ok(Instruction {
            program_id: request.callback_program,
            accounts,
            data: w.into_bytes(),
        })
    }
}

// ----------------------------------------------------------------------------
// Task queue
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub task_id: u16,
    pub task: Pubkey,
    pub queue_authority: Pubkey,
    pub trigger: TaskTrigger,
    pub transaction: CompiledTransaction,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    /// Authorities allowed to submit, by their queue-authority identity.
    pub authorities: BTreeSet<Pubkey>,
    pub tasks: BTreeMap<u16, QueuedTask>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueueService {
    pub queues: BTreeMap<Pubkey, TaskQueue>,
}

impl TaskQueueService {
    pub fn create_queue(&mut self, queue: Pubkey) {
        self.queues.entry(queue).or_default();
    }

    pub fn add_authority(&mut self, queue: Pubkey, authority: Pubkey) {
        self.queues.entry(queue).or_default().authorities.insert(authority);
    }

    /// Check `req` without changing anything.
    pub fn validate(
        &self,
        req: &QueueTaskRequest,
        ids: &Identities,
        tx: &Transaction,
    ) -> Result<(), TxFailure> {
        let reject = |code: u32, message: String| TxFailure {
            program: ids.task_queue_program,
            code,
            message,
        };

        let queue = self.queues.get(&req.task_queue).ok_or_else(|| {
            reject(
                QUEUE_NOT_RECOGNIZED_CODE,
                format!("task queue {} not initialized", req.task_queue),
            )
        })?;

        let (expected, _) = task_queue_authority_address(
            &ids.task_queue_program,
            &req.task_queue,
            &req.queue_authority,
        )
        .map_err(|e| reject(e.code(), e.to_string()))?;
        if req.task_queue_authority != expected || !queue.authorities.contains(&req.queue_authority) {
            return Err(reject(
                QUEUE_NOT_RECOGNIZED_CODE,
                format!("task queue authority {} not initialized", req.task_queue_authority),
            ));
        }

        if queue.tasks.contains_key(&req.task_id) {
            return Err(reject(
                TASK_ID_IN_USE_CODE,
                format!("task {} already in use", req.task_id),
            ));
        }

        if !tx.is_signed_by(&req.task) {
            return Err(reject(
                MISSING_SIGNATURE_CODE,
                format!("task {} did not sign", req.task),
            ));
        }
        Ok(())
    }

    /// Record a validated request.
    pub fn enqueue(&mut self, req: &QueueTaskRequest) {
        let queue = self.queues.entry(req.task_queue).or_default();
        queue.tasks.insert(
            req.task_id,
            QueuedTask {
                task_id: req.task_id,
                task: req.task,
                queue_authority: req.queue_authority,
                trigger: req.trigger,
                transaction: req.transaction.clone(),
                description: req.description.clone(),
            },
        );
    }

    pub fn tasks(&self, queue: &Pubkey) -> Vec<QueuedTask> {
        self.queues
            .get(queue)
            .map(|q| q.tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every runnable task of `queue`, oldest id first.
    pub fn take_runnable(&mut self, queue: &Pubkey, now: Duration) -> Vec<QueuedTask> {
        let Some(q) = self.queues.get_mut(queue) else {
            return Vec::new();
        };
        let ready: Vec<u16> = q
            .tasks
            .values()
            .filter(|t| match t.trigger {
                TaskTrigger::Now => true,
                TaskTrigger::Timestamp(ts) => ts <= now.as_secs() as i64,
            })
            .map(|t| t.task_id)
            .collect();
        ready.iter().filter_map(|id| q.tasks.remove(id)).collect()
    }
}
