/// Golden compatibility test: discriminators and the record layout are the
/// on-chain contract and must match the frozen values.
///
/// This test must NEVER be modified to match new behavior.
/// If it fails, clients already in the field can no longer talk to the program.

use std::collections::BTreeMap;
use std::fs;

use sha2::{Digest, Sha256};

use oracle_program::discriminator;
use oracle_program::domain::{Account, AccountStore, Identities, Layer};
use oracle_program::instructions::{user_record_address, InstructionBuilder, INSTRUCTION_NAMES};
use oracle_program::processor::{process_instruction, ProgramEnv};
use oracle_program::pubkey::Pubkey;
use oracle_program::PROGRAM_VERSION;

fn load_discriminators(path: &str) -> BTreeMap<String, [u8; 8]> {
    let data = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e));
    serde_json::from_str(&data).expect("Failed to parse discriminators JSON")
}

fn load_expected_hash(path: &str) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
        .trim()
        .to_string()
}

fn ids() -> Identities {
    Identities {
        program_id: Pubkey::hashed(b"program"),
        oracle_program: Pubkey::hashed(b"oracle"),
        oracle_identity: Pubkey::hashed(b"oracle-identity"),
        oracle_context: Pubkey::hashed(b"oracle-context"),
        magic_program: Pubkey::hashed(b"magic"),
        magic_context: Pubkey::hashed(b"magic-context"),
        delegation_program: Pubkey::hashed(b"delegation"),
        task_queue_program: Pubkey::hashed(b"queue-program"),
        default_queue: Pubkey::hashed(b"queue"),
        default_validator: Pubkey::hashed(b"validator"),
    }
}

/// initialize -> ask_oracle -> receive_answer("four"), returning the record bytes.
fn replay_session() -> Vec<u8> {
    let ids = ids();
    let payer = Pubkey::hashed(b"golden-payer");
    let b = InstructionBuilder::new(&ids);
    let base = ProgramEnv::new(Layer::Base, &ids);
    let record = user_record_address(&ids.program_id, &payer).unwrap().0;

    let mut store = AccountStore::new();
    store.insert(payer, Account::wallet(1_000_000_000));

    let script = vec![
        b.initialize(&payer).unwrap(),
        b.ask_oracle(&payer, &Pubkey::hashed(b"interaction"), "2+2?").unwrap(),
        b.receive_answer(&ids.oracle_identity, &record, "four").unwrap(),
    ];
    for ix in &script {
        store = process_instruction(&store, ix, &base).unwrap().0;
    }
    store[&record].data.clone()
}

#[test]
fn golden_discriminators_match() {
    let golden = load_discriminators("tests/golden/discriminators.json");
    for name in INSTRUCTION_NAMES {
        assert_eq!(
            discriminator::instruction(name),
            golden[name],
            "GOLDEN TEST FAILED: discriminator of `{}` changed",
            name
        );
    }
    assert_eq!(
        discriminator::account("UserAccount"),
        golden["account:UserAccount"]
    );
}

#[test]
fn golden_record_hash_matches() {
    let data = replay_session();
    assert_eq!(data.len(), 525);
    let hash = hex::encode(Sha256::digest(&data));
    let expected = load_expected_hash("tests/golden/expected_record_hash.txt");
    assert_eq!(
        hash, expected,
        "GOLDEN TEST FAILED: record layout produced a different hash.\n\
         Got:      {}\n\
         Expected: {}",
        hash, expected
    );
}

#[test]
fn golden_replay_is_deterministic() {
    assert_eq!(replay_session(), replay_session());
}

#[test]
fn program_version_is_one() {
    assert_eq!(PROGRAM_VERSION, 1, "PROGRAM_VERSION must be 1 and never change");
}
