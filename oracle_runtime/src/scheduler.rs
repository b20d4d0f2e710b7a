//! Compiling instructions into replayable descriptors and queueing them.

use tracing::{info, warn};

use oracle_program::compiled::{compile, CompiledTransaction};
use oracle_program::domain::{Instruction, Layer};
use oracle_program::instructions::{queue_authority_address, task_queue_authority_address, ScheduleAccounts};
use oracle_program::pubkey::Pubkey;

use crate::context::RuntimeContext;
use crate::error::{QueueRejection, RuntimeError};
use crate::registry::{RecordOp, SubmittedTask};

pub struct TaskCompiler {
    ctx: RuntimeContext,
}

impl TaskCompiler {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Compile `instructions` into a descriptor. No derived-account signing.
    pub fn compile(&self, instructions: &[Instruction]) -> Result<CompiledTransaction, RuntimeError> {
        Ok(compile(instructions, Vec::new())?)
    }

    /// The program's signing authority on task queues.
    pub fn queue_authority(&self) -> Result<Pubkey, RuntimeError> {
        Ok(queue_authority_address(&self.ctx.identities.program_id)?.0)
    }

    /// The queue's record of this program's authority.
    pub fn task_queue_authority(&self, queue: &Pubkey) -> Result<Pubkey, RuntimeError> {
        let authority = self.queue_authority()?;
        Ok(task_queue_authority_address(&self.ctx.identities.task_queue_program, queue, &authority)?.0)
    }

    /// Enqueue `compiled` under `task_id` on `queue` (default queue when
    /// `None`). A fresh task identity signs the submission.
    ///
    /// Queue-side refusals come back as `QueueRejected` with the queue's code.
    pub fn submit(
        &self,
        record: &Pubkey,
        compiled: CompiledTransaction,
        task_id: u16,
        queue: Option<Pubkey>,
    ) -> Result<SubmittedTask, RuntimeError> {
        let entry = self.ctx.registry.require(record)?;
        let queue = queue.unwrap_or(self.ctx.identities.default_queue);
        let task = self.ctx.fresh_identity("task", &queue);
        let accounts = ScheduleAccounts {
            task_queue: queue,
            task_queue_authority: self.task_queue_authority(&queue)?,
            task,
        };

        let ix = self
            .ctx
            .builder()
            .schedule(&entry.payer, task_id, compiled, accounts)?;
        let signature = self
            .ctx
            .submit(Layer::Base, entry.payer, &[task], vec![ix])
            .map_err(|e| self.classify(e, task_id, task))?;

        let submitted = SubmittedTask {
            task_id,
            queue,
            task,
            signature,
        };
        self.ctx.registry.apply(RecordOp::TaskSubmitted {
            record: *record,
            task: submitted.clone(),
        })?;
        info!(%record, task_id, %queue, %task, "task queued");
        Ok(submitted)
    }

    fn classify(&self, err: RuntimeError, task_id: u16, task: Pubkey) -> RuntimeError {
        match err {
            RuntimeError::QueueRejected(_) => err,
            RuntimeError::Program {
                program: Some(program),
                code,
                message,
            } if program == self.ctx.identities.task_queue_program => {
                let rejection = QueueRejection::from_code(code, &message, task_id, task);
                warn!(task_id, code, "task queue rejected submission");
                RuntimeError::QueueRejected(rejection)
            }
            other => other,
        }
    }
}
