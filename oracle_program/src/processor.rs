/// Instruction processing.
///
/// ALL record-mutation logic lives here. Processing is a pure function of
/// the visible accounts: the input store is never mutated, a clone is
/// updated and returned with the effects the host must route.

use crate::compiled::CompiledTransaction;
use crate::account_codec::{decode_user_account, encode_user_account, write_user_account};
use crate::discriminator;
use crate::domain::{
    rent_exempt_minimum, Account, AccountMeta, AccountStore, AgentEvent, Identities, Instruction,
    Layer, UserAccount, QUEUE_AUTHORITY_SEED, SYSTEM_PROGRAM_ID, USER_ACCOUNT_SPACE, USER_SEED,
};
use crate::effects::{
    CommitRequest, DelegateRequest, Effect, OracleRequest, QueueTaskRequest, TaskTrigger,
};
use crate::error::ProgramError;
use crate::instructions::{queue_authority_address, user_record_address, ProgramInstruction};
use crate::invariants::validate_compiled_transaction;
use crate::lifecycle::DelegationStatus;
use crate::pubkey::Pubkey;

/// Where and against which identities an instruction runs.
#[derive(Debug, Clone, Copy)]
pub struct ProgramEnv<'a> {
    pub layer: Layer,
    pub identities: &'a Identities,
}

impl<'a> ProgramEnv<'a> {
    pub fn new(layer: Layer, identities: &'a Identities) -> Self {
        Self { layer, identities }
    }

    fn program_id(&self) -> Pubkey {
        self.identities.program_id
    }
}

// ---------------------------------------------------------------------------
// Public dispatcher
// ---------------------------------------------------------------------------

/// Apply `ix` to `accounts` and return `(new_accounts, effects)`.
pub fn process_instruction(
    accounts: &AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
) -> Result<(AccountStore, Vec<Effect>), ProgramError> {
    if ix.program_id != env.program_id() {
        return Err(ProgramError::InvalidProgramId(ix.program_id));
    }
    let decoded = ProgramInstruction::decode(&ix.data)?;
    let mut store = accounts.clone();

    let effects = match decoded {
        ProgramInstruction::Initialize => apply_initialize(&mut store, ix, env)?,
        ProgramInstruction::Delegate => apply_delegate(&store, ix, env)?,
        ProgramInstruction::UpdateCommit => apply_commit(&store, ix, env, false)?,
        ProgramInstruction::AskOracle { prompt } => apply_ask_oracle(&mut store, ix, env, prompt)?,
        ProgramInstruction::ReceiveAnswer { response } => {
            apply_receive_answer(&mut store, ix, env, response)?
        }
        ProgramInstruction::Undelegate => apply_commit(&store, ix, env, true)?,
        ProgramInstruction::Schedule { task_id, compiled } => {
            apply_schedule(&store, ix, env, task_id, compiled)?
        }
    };

    Ok((store, effects))
}

// ---------------------------------------------------------------------------
// Account constraints
// ---------------------------------------------------------------------------

fn metas(ix: &Instruction, expected: usize) -> Result<&[AccountMeta], ProgramError> {
    if ix.accounts.len() < expected {
        return Err(ProgramError::AccountNotEnoughKeys {
            expected,
            actual: ix.accounts.len(),
        });
    }
    Ok(&ix.accounts[..expected])
}

fn signer(meta: &AccountMeta) -> Result<Pubkey, ProgramError> {
    if !meta.is_signer {
        return Err(ProgramError::ConstraintSigner(meta.pubkey));
    }
    Ok(meta.pubkey)
}

fn writable(meta: &AccountMeta) -> Result<Pubkey, ProgramError> {
    if !meta.is_writable {
        return Err(ProgramError::ConstraintMut(meta.pubkey));
    }
    Ok(meta.pubkey)
}

fn address(meta: &AccountMeta, expected: &Pubkey) -> Result<Pubkey, ProgramError> {
    if meta.pubkey != *expected {
        return Err(ProgramError::ConstraintAddress {
            expected: *expected,
            actual: meta.pubkey,
        });
    }
    Ok(meta.pubkey)
}

fn program(meta: &AccountMeta, expected: &Pubkey) -> Result<Pubkey, ProgramError> {
    if meta.pubkey != *expected {
        return Err(ProgramError::InvalidProgramId(meta.pubkey));
    }
    Ok(meta.pubkey)
}

/// The record must sit at `["user", payer]`.
fn seeded_record(meta: &AccountMeta, payer: &Pubkey, env: &ProgramEnv<'_>) -> Result<(Pubkey, u8), ProgramError> {
    let (expected, bump) = user_record_address(&env.program_id(), payer)?;
    if meta.pubkey != expected {
        return Err(ProgramError::ConstraintSeeds {
            expected,
            actual: meta.pubkey,
        });
    }
    Ok((expected, bump))
}

/// Load a record this layer may write: present and owned by the program.
fn owned_record<'s>(
    store: &'s AccountStore,
    key: &Pubkey,
    env: &ProgramEnv<'_>,
) -> Result<(&'s Account, UserAccount), ProgramError> {
    let account = store
        .get(key)
        .ok_or(ProgramError::AccountNotInitialized(*key))?;
    if account.owner != env.program_id() {
        return Err(ProgramError::AccountOwnedByWrongProgram {
            account: *key,
            owner: account.owner,
            expected: env.program_id(),
        });
    }
    let decoded = decode_user_account(key, &account.data)?;
    Ok((account, decoded))
}

/// Residency of a record as this layer sees it, for lifecycle errors.
fn residency(store: &AccountStore, key: &Pubkey, env: &ProgramEnv<'_>) -> Option<DelegationStatus> {
    let account = store.get(key)?;
    match env.layer {
        Layer::Base if account.owner == env.program_id() => Some(DelegationStatus::BaseResident),
        Layer::Base if account.owner == env.identities.delegation_program => {
            Some(DelegationStatus::EphemeralResident)
        }
        Layer::Ephemeral if account.owner == env.program_id() => {
            Some(DelegationStatus::EphemeralResident)
        }
        _ => None,
    }
}

/// Require `layer`; otherwise report the lifecycle error if the record's
/// residency explains the mismatch, else a plain wrong-layer error.
fn require_layer(
    operation: &'static str,
    layer: Layer,
    store: &AccountStore,
    record: &Pubkey,
    env: &ProgramEnv<'_>,
) -> Result<(), ProgramError> {
    if env.layer == layer {
        return Ok(());
    }
    match residency(store, record, env) {
        Some(status) => Err(ProgramError::InvalidDelegationState { operation, status }),
        None => Err(ProgramError::WrongLayer {
            instruction: operation.to_string(),
            layer: env.layer.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Handlers (private)
// ---------------------------------------------------------------------------

fn apply_initialize(
    store: &mut AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
) -> Result<Vec<Effect>, ProgramError> {
    let m = metas(ix, 3)?;
    let payer = writable(&m[0]).and_then(|_| signer(&m[0]))?;
    let record_key = writable(&m[1])?;
    program(&m[2], &SYSTEM_PROGRAM_ID)?;

    if env.layer != Layer::Base {
        return Err(ProgramError::WrongLayer {
            instruction: "initialize".to_string(),
            layer: env.layer.to_string(),
        });
    }
    let (_, bump) = seeded_record(&m[1], &payer, env)?;

    let existing_lamports = match store.get(&record_key) {
        Some(acct) if acct.owner != SYSTEM_PROGRAM_ID || !acct.data.is_empty() => {
            return Err(ProgramError::AccountAlreadyInitialized(record_key));
        }
        Some(acct) => acct.lamports,
        None => 0,
    };

    let rent = rent_exempt_minimum(USER_ACCOUNT_SPACE).saturating_sub(existing_lamports);
    let payer_account = store
        .get_mut(&payer)
        .ok_or(ProgramError::InsufficientFunds {
            needed: rent,
            available: 0,
        })?;
    if payer_account.lamports < rent {
        return Err(ProgramError::InsufficientFunds {
            needed: rent,
            available: payer_account.lamports,
        });
    }
    payer_account.lamports -= rent;

    let data = encode_user_account(
        &UserAccount {
            bump,
            last_response: String::new(),
        },
        USER_ACCOUNT_SPACE,
    )?;
    store.insert(
        record_key,
        Account {
            owner: env.program_id(),
            lamports: existing_lamports + rent,
            data,
        },
    );

    Ok(vec![Effect::Log(format!("initialized record {}", record_key))])
}

fn apply_delegate(
    store: &AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
) -> Result<Vec<Effect>, ProgramError> {
    let m = metas(ix, 5)?;
    let payer = signer(&m[0])?;
    let record_key = writable(&m[1])?;
    let validator = m[2].pubkey;
    address(&m[3], &env.identities.delegation_program)?;
    program(&m[4], &SYSTEM_PROGRAM_ID)?;

    require_layer("delegate", Layer::Base, store, &record_key, env)?;
    if let Some(DelegationStatus::EphemeralResident) = residency(store, &record_key, env) {
        return Err(ProgramError::InvalidDelegationState {
            operation: "delegate",
            status: DelegationStatus::EphemeralResident,
        });
    }
    seeded_record(&m[1], &payer, env)?;
    owned_record(store, &record_key, env)?;

    Ok(vec![
        Effect::Delegate(DelegateRequest {
            account: record_key,
            owner_program: env.program_id(),
            validator,
            seeds: vec![USER_SEED.to_vec(), payer.to_bytes().to_vec()],
        }),
        Effect::Log(format!("delegating record {} to {}", record_key, validator)),
    ])
}

/// `update_commit` and `undelegate` share accounts and constraints.
fn apply_commit(
    store: &AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
    undelegate: bool,
) -> Result<Vec<Effect>, ProgramError> {
    let operation = if undelegate { "undelegate" } else { "commit" };
    let m = metas(ix, 4)?;
    let payer = signer(&m[0])?;
    let record_key = writable(&m[1])?;
    program(&m[2], &env.identities.magic_program)?;
    address(&m[3], &env.identities.magic_context)?;
    writable(&m[3])?;

    require_layer(operation, Layer::Ephemeral, store, &record_key, env)?;
    seeded_record(&m[1], &payer, env)?;
    owned_record(store, &record_key, env)?;

    Ok(vec![Effect::Commit(CommitRequest {
        payer,
        accounts: vec![record_key],
        undelegate,
    })])
}

fn apply_ask_oracle(
    store: &mut AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
    prompt: String,
) -> Result<Vec<Effect>, ProgramError> {
    let m = metas(ix, 6)?;
    let payer = signer(&m[0])?;
    let record_key = writable(&m[1])?;
    let interaction = writable(&m[2])?;
    let context = address(&m[3], &env.identities.oracle_context)?;
    program(&m[4], &env.identities.oracle_program)?;
    program(&m[5], &SYSTEM_PROGRAM_ID)?;

    seeded_record(&m[1], &payer, env)?;
    let (_, mut record) = owned_record(store, &record_key, env)?;

    // Cleared so the empty -> non-empty transition marks this request's answer.
    record.last_response.clear();
    if let Some(acct) = store.get_mut(&record_key) {
        write_user_account(&mut acct.data, &record)?;
    }

    Ok(vec![
        Effect::Oracle(OracleRequest {
            payer,
            interaction,
            context,
            prompt,
            callback_program: env.program_id(),
            callback_discriminator: discriminator::instruction("receive_answer"),
            callback_accounts: vec![AccountMeta::writable(record_key, false)],
        }),
        Effect::Log("Request sent to Oracle!".to_string()),
    ])
}

fn apply_receive_answer(
    store: &mut AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
    response: String,
) -> Result<Vec<Effect>, ProgramError> {
    let m = metas(ix, 2)?;
    let identity = signer(&m[0])?;
    if identity != env.identities.oracle_identity {
        return Err(ProgramError::UnauthorizedOracleIdentity(identity));
    }
    let record_key = writable(&m[1])?;

    let (_, mut record) = owned_record(store, &record_key, env)?;
    record.last_response = response.clone();
    if let Some(acct) = store.get_mut(&record_key) {
        write_user_account(&mut acct.data, &record)?;
    }

    Ok(vec![
        Effect::Log(format!("ORACLE RESPONSE STORED: {}", response)),
        Effect::Emit(AgentEvent {
            record: record_key,
            response,
        }),
    ])
}

fn apply_schedule(
    store: &AccountStore,
    ix: &Instruction,
    env: &ProgramEnv<'_>,
    task_id: u16,
    compiled: CompiledTransaction,
) -> Result<Vec<Effect>, ProgramError> {
    let m = metas(ix, 8)?;
    let user = signer(&m[0])?;
    let record_key = m[1].pubkey;
    let task_queue = writable(&m[2])?;
    let task_queue_authority = m[3].pubkey;
    let task = writable(&m[4])?;
    let (expected_authority, authority_bump) = queue_authority_address(&env.program_id())?;
    if m[5].pubkey != expected_authority {
        return Err(ProgramError::ConstraintSeeds {
            expected: expected_authority,
            actual: m[5].pubkey,
        });
    }
    program(&m[6], &SYSTEM_PROGRAM_ID)?;
    program(&m[7], &env.identities.task_queue_program)?;

    if env.layer != Layer::Base {
        return Err(ProgramError::WrongLayer {
            instruction: "schedule".to_string(),
            layer: env.layer.to_string(),
        });
    }

    // Read-only: a delegated record is still a valid reference here.
    seeded_record(&m[1], &user, env)?;
    let account = store
        .get(&record_key)
        .ok_or(ProgramError::AccountNotInitialized(record_key))?;
    decode_user_account(&record_key, &account.data)?;
    validate_compiled_transaction(&compiled)?;

    Ok(vec![
        Effect::QueueTask(QueueTaskRequest {
            payer: user,
            task_queue,
            task_queue_authority,
            task,
            queue_authority: expected_authority,
            authority_seeds: vec![QUEUE_AUTHORITY_SEED.to_vec(), vec![authority_bump]],
            task_id,
            trigger: TaskTrigger::Now,
            transaction: compiled,
            description: format!("oracle task {}", task_id),
        }),
        Effect::Log(format!("queued task {} on {}", task_id, task_queue)),
    ])
}
