/// Instruction surface of the program and its wire encoding.
///
/// Data layout: 8-byte discriminator `sha256("global:<name>")[..8]`, then
/// arguments in the LE length-prefixed wire format.
///
/// Account order per instruction:
///
///   initialize     [payer ws, record w, system]
///   delegate       [payer ws, record w, validator, delegation_program, system]
///   update_commit  [payer ws, record w, magic_program, magic_context w]
///   ask_oracle     [payer ws, record w, interaction w, oracle_context, oracle_program, system]
///   receive_answer [oracle_identity s, record w]
///   undelegate     [payer ws, record w, magic_program, magic_context w]
///   schedule       [user ws, record, task_queue w, task_queue_authority, task ws,
///                   queue_authority, system, task_queue_program]

use crate::compiled::CompiledTransaction;
use crate::discriminator::{self, Discriminator, DISCRIMINATOR_LEN};
use crate::domain::{
    AccountMeta, Identities, Instruction, QUEUE_AUTHORITY_SEED, SYSTEM_PROGRAM_ID,
    TASK_QUEUE_AUTHORITY_SEED, USER_SEED,
};
use crate::error::ProgramError;
use crate::pubkey::{find_program_address, Pubkey};
use crate::wire::{WireReader, WireWriter};

/// Instruction names, in handler order.
pub const INSTRUCTION_NAMES: [&str; 7] = [
    "initialize",
    "delegate",
    "update_commit",
    "ask_oracle",
    "receive_answer",
    "undelegate",
    "schedule",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramInstruction {
    Initialize,
    Delegate,
    UpdateCommit,
    AskOracle { prompt: String },
    ReceiveAnswer { response: String },
    Undelegate,
    Schedule {
        task_id: u16,
        compiled: CompiledTransaction,
    },
}

impl ProgramInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramInstruction::Initialize => "initialize",
            ProgramInstruction::Delegate => "delegate",
            ProgramInstruction::UpdateCommit => "update_commit",
            ProgramInstruction::AskOracle { .. } => "ask_oracle",
            ProgramInstruction::ReceiveAnswer { .. } => "receive_answer",
            ProgramInstruction::Undelegate => "undelegate",
            ProgramInstruction::Schedule { .. } => "schedule",
        }
    }

    pub fn discriminator(&self) -> Discriminator {
        discriminator::instruction(self.name())
    }

    /// Whether the instruction mutates the user record's data.
    pub fn mutates_record(&self) -> bool {
        matches!(
            self,
            ProgramInstruction::AskOracle { .. } | ProgramInstruction::ReceiveAnswer { .. }
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProgramError> {
        let mut w = WireWriter::with_prefix(&self.discriminator());
        match self {
            ProgramInstruction::Initialize
            | ProgramInstruction::Delegate
            | ProgramInstruction::UpdateCommit
            | ProgramInstruction::Undelegate => {}
            ProgramInstruction::AskOracle { prompt } => {
                w.put_str(prompt)?;
            }
            ProgramInstruction::ReceiveAnswer { response } => {
                w.put_str(response)?;
            }
            ProgramInstruction::Schedule { task_id, compiled } => {
                w.put_u16(*task_id);
                compiled.encode_into(&mut w)?;
            }
        }
        Ok(w.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProgramError> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(ProgramError::InstructionFallbackNotFound(format!(
                "{} bytes of instruction data",
                data.len()
            )));
        }
        let mut r = WireReader::new(data);
        let tag: Discriminator = r.fixed()?;
        let name = INSTRUCTION_NAMES
            .iter()
            .find(|n| discriminator::instruction(n) == tag)
            .ok_or_else(|| ProgramError::InstructionFallbackNotFound(discriminator::to_hex(&tag)))?;

        let ix = match *name {
            "initialize" => ProgramInstruction::Initialize,
            "delegate" => ProgramInstruction::Delegate,
            "update_commit" => ProgramInstruction::UpdateCommit,
            "ask_oracle" => ProgramInstruction::AskOracle { prompt: r.string()? },
            "receive_answer" => ProgramInstruction::ReceiveAnswer {
                response: r.string()?,
            },
            "undelegate" => ProgramInstruction::Undelegate,
            _ => ProgramInstruction::Schedule {
                task_id: r.u16()?,
                compiled: CompiledTransaction::decode_from(&mut r)?,
            },
        };
        r.finish()?;
        Ok(ix)
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// The user record address and bump for `payer`.
pub fn user_record_address(program_id: &Pubkey, payer: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
    find_program_address(&[USER_SEED, payer.as_ref()], program_id)
}

/// The program's task-queue signing authority.
pub fn queue_authority_address(program_id: &Pubkey) -> Result<(Pubkey, u8), ProgramError> {
    find_program_address(&[QUEUE_AUTHORITY_SEED], program_id)
}

/// The queue's record of `authority` as a recognized submitter.
pub fn task_queue_authority_address(
    task_queue_program: &Pubkey,
    queue: &Pubkey,
    authority: &Pubkey,
) -> Result<(Pubkey, u8), ProgramError> {
    find_program_address(
        &[TASK_QUEUE_AUTHORITY_SEED, queue.as_ref(), authority.as_ref()],
        task_queue_program,
    )
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Builds fully-addressed instructions from the identity table.
#[derive(Debug, Clone, Copy)]
pub struct InstructionBuilder<'a> {
    ids: &'a Identities,
}

/// Accounts of a `schedule` instruction other than the payer and record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleAccounts {
    pub task_queue: Pubkey,
    pub task_queue_authority: Pubkey,
    pub task: Pubkey,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(ids: &'a Identities) -> Self {
        Self { ids }
    }

    fn build(&self, ix: &ProgramInstruction, accounts: Vec<AccountMeta>) -> Result<Instruction, ProgramError> {
        Ok(Instruction {
            program_id: self.ids.program_id,
            accounts,
            data: ix.encode()?,
        })
    }

    fn record(&self, payer: &Pubkey) -> Result<Pubkey, ProgramError> {
        Ok(user_record_address(&self.ids.program_id, payer)?.0)
    }

    pub fn initialize(&self, payer: &Pubkey) -> Result<Instruction, ProgramError> {
        self.build(
            &ProgramInstruction::Initialize,
            vec![
                AccountMeta::writable(*payer, true),
                AccountMeta::writable(self.record(payer)?, false),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
        )
    }

    pub fn delegate(&self, payer: &Pubkey, validator: &Pubkey) -> Result<Instruction, ProgramError> {
        self.build(
            &ProgramInstruction::Delegate,
            vec![
                AccountMeta::writable(*payer, true),
                AccountMeta::writable(self.record(payer)?, false),
                AccountMeta::readonly(*validator, false),
                AccountMeta::readonly(self.ids.delegation_program, false),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
        )
    }

    pub fn update_commit(&self, payer: &Pubkey) -> Result<Instruction, ProgramError> {
        self.build(&ProgramInstruction::UpdateCommit, self.magic_accounts(payer)?)
    }

    pub fn undelegate(&self, payer: &Pubkey) -> Result<Instruction, ProgramError> {
        self.build(&ProgramInstruction::Undelegate, self.magic_accounts(payer)?)
    }

    fn magic_accounts(&self, payer: &Pubkey) -> Result<Vec<AccountMeta>, ProgramError> {
        Ok(vec![
            AccountMeta::writable(*payer, true),
            AccountMeta::writable(self.record(payer)?, false),
            AccountMeta::readonly(self.ids.magic_program, false),
            AccountMeta::writable(self.ids.magic_context, false),
        ])
    }

    pub fn ask_oracle(
        &self,
        payer: &Pubkey,
        interaction: &Pubkey,
        prompt: &str,
    ) -> Result<Instruction, ProgramError> {
        self.build(
            &ProgramInstruction::AskOracle {
                prompt: prompt.to_string(),
            },
            vec![
                AccountMeta::writable(*payer, true),
                AccountMeta::writable(self.record(payer)?, false),
                AccountMeta::writable(*interaction, false),
                AccountMeta::readonly(self.ids.oracle_context, false),
                AccountMeta::readonly(self.ids.oracle_program, false),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
        )
    }

    /// The oracle's callback. `record` is passed explicitly since the oracle
    /// knows the record, not the payer.
    pub fn receive_answer(
        &self,
        identity: &Pubkey,
        record: &Pubkey,
        response: &str,
    ) -> Result<Instruction, ProgramError> {
        self.build(
            &ProgramInstruction::ReceiveAnswer {
                response: response.to_string(),
            },
            vec![
                AccountMeta::readonly(*identity, true),
                AccountMeta::writable(*record, false),
            ],
        )
    }

    /// `task` is marked signer: the queue program declares it as one even
    /// though it is a fresh, unfunded identity.
    pub fn schedule(
        &self,
        user: &Pubkey,
        task_id: u16,
        compiled: CompiledTransaction,
        accounts: ScheduleAccounts,
    ) -> Result<Instruction, ProgramError> {
        let (queue_authority, _) = queue_authority_address(&self.ids.program_id)?;
        self.build(
            &ProgramInstruction::Schedule { task_id, compiled },
            vec![
                AccountMeta::writable(*user, true),
                AccountMeta::readonly(self.record(user)?, false),
                AccountMeta::writable(accounts.task_queue, false),
                AccountMeta::readonly(accounts.task_queue_authority, false),
                AccountMeta::writable(accounts.task, true),
                AccountMeta::readonly(queue_authority, false),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
                AccountMeta::readonly(self.ids.task_queue_program, false),
            ],
        )
    }
}
