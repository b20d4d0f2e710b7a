//! Compiled transaction descriptor: a self-describing, replayable encoding of
//! one or more instructions for an external scheduler.
//!
//! Account table ordering is a contract with the executor:
//!
//!   [ rw signers | ro signers | rw non-signers | ro non-signers ]
//!
//! Within each bucket accounts keep their first-appearance order. Program ids
//! enter the table as read-only non-signers unless also referenced otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AccountMeta, Instruction};
use crate::error::ProgramError;
use crate::invariants::validate_compiled_transaction;
use crate::pubkey::Pubkey;
use crate::wire::{WireError, WireReader, WireWriter};

/// Indices are single bytes on the wire.
pub const MAX_TABLE_ACCOUNTS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    /// Ordered indices into the account table.
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTransaction {
    pub num_rw_signers: u8,
    pub num_ro_signers: u8,
    pub num_rw: u8,
    pub accounts: Vec<Pubkey>,
    pub instructions: Vec<CompiledInstruction>,
    /// Seed sets the executor signs with for derived accounts.
    pub signer_seeds: Vec<Vec<Vec<u8>>>,
}

impl CompiledTransaction {
    /// Read-only non-signers: whatever the table holds beyond the first
    /// three buckets.
    pub fn num_ro(&self) -> usize {
        self.accounts.len().saturating_sub(self.declared_prefix())
    }

    fn declared_prefix(&self) -> usize {
        self.num_rw_signers as usize + self.num_ro_signers as usize + self.num_rw as usize
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.num_rw_signers as usize + self.num_ro_signers as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = self.num_rw_signers as usize + self.num_ro_signers as usize;
        index < self.num_rw_signers as usize
            || (index >= signers && index < signers + self.num_rw as usize)
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = WireWriter::new();
        self.encode_into(&mut w)?;
        Ok(w.into_bytes())
    }

    pub fn encode_into(&self, w: &mut WireWriter) -> Result<(), WireError> {
        w.put_u8(self.num_rw_signers)
            .put_u8(self.num_ro_signers)
            .put_u8(self.num_rw);
        w.put_len(self.accounts.len())?;
        for key in &self.accounts {
            w.put_pubkey(key);
        }
        w.put_len(self.instructions.len())?;
        for ix in &self.instructions {
            w.put_u8(ix.program_id_index);
            w.put_bytes(&ix.accounts)?;
            w.put_bytes(&ix.data)?;
        }
        w.put_len(self.signer_seeds.len())?;
        for seeds in &self.signer_seeds {
            w.put_len(seeds.len())?;
            for seed in seeds {
                w.put_bytes(seed)?;
            }
        }
        Ok(())
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let num_rw_signers = r.u8()?;
        let num_ro_signers = r.u8()?;
        let num_rw = r.u8()?;

        let n = r.length_prefix()?;
        let mut accounts = Vec::with_capacity(n.min(MAX_TABLE_ACCOUNTS));
        for _ in 0..n {
            accounts.push(r.pubkey()?);
        }

        let n = r.length_prefix()?;
        let mut instructions = Vec::new();
        for _ in 0..n {
            instructions.push(CompiledInstruction {
                program_id_index: r.u8()?,
                accounts: r.bytes()?,
                data: r.bytes()?,
            });
        }

        let n = r.length_prefix()?;
        let mut signer_seeds = Vec::new();
        for _ in 0..n {
            let m = r.length_prefix()?;
            let mut seeds = Vec::new();
            for _ in 0..m {
                seeds.push(r.bytes()?);
            }
            signer_seeds.push(seeds);
        }

        Ok(Self {
            num_rw_signers,
            num_ro_signers,
            num_rw,
            accounts,
            instructions,
            signer_seeds,
        })
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(data);
        let out = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Role {
    is_signer: bool,
    is_writable: bool,
}

fn bucket(role: Role) -> u8 {
    match (role.is_signer, role.is_writable) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

fn to_index(position: usize) -> Result<u8, ProgramError> {
    u8::try_from(position).map_err(|_| {
        ProgramError::InvalidCompiledTransaction(format!(
            "account table exceeds {} entries",
            MAX_TABLE_ACCOUNTS
        ))
    })
}

/// Compile `instructions` into a descriptor.
///
/// Duplicate identities are merged; a merged entry is a signer (writable) if
/// any reference to it is.
pub fn compile(
    instructions: &[Instruction],
    signer_seeds: Vec<Vec<Vec<u8>>>,
) -> Result<CompiledTransaction, ProgramError> {
    if instructions.is_empty() {
        return Err(ProgramError::InvalidCompiledTransaction(
            "no instructions to compile".to_string(),
        ));
    }

    let mut first_seen: Vec<Pubkey> = Vec::new();
    let mut roles: BTreeMap<Pubkey, Role> = BTreeMap::new();
    let mut note = |key: Pubkey, is_signer: bool, is_writable: bool| {
        let role = roles.entry(key).or_insert_with(|| {
            first_seen.push(key);
            Role {
                is_signer: false,
                is_writable: false,
            }
        });
        role.is_signer |= is_signer;
        role.is_writable |= is_writable;
    };

    for ix in instructions {
        for meta in &ix.accounts {
            note(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        note(ix.program_id, false, false);
    }

    // Stable partition: sort_by_key is stable, so first-appearance order
    // survives inside each bucket.
    let mut table = first_seen;
    table.sort_by_key(|key| bucket(roles[key]));

    if table.len() > MAX_TABLE_ACCOUNTS {
        return Err(ProgramError::InvalidCompiledTransaction(format!(
            "{} accounts exceed the table limit of {}",
            table.len(),
            MAX_TABLE_ACCOUNTS
        )));
    }

    let count = |b: u8| table.iter().filter(|k| bucket(roles[*k]) == b).count();
    let (rw_signers, ro_signers, rw) = (count(0), count(1), count(2));

    let position: BTreeMap<Pubkey, usize> =
        table.iter().enumerate().map(|(i, k)| (*k, i)).collect();

    let mut compiled_ixs = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let accounts = ix
            .accounts
            .iter()
            .map(|m| to_index(position[&m.pubkey]))
            .collect::<Result<Vec<u8>, _>>()?;
        compiled_ixs.push(CompiledInstruction {
            program_id_index: to_index(position[&ix.program_id])?,
            accounts,
            data: ix.data.clone(),
        });
    }

    let compiled = CompiledTransaction {
        num_rw_signers: to_index(rw_signers)?,
        num_ro_signers: to_index(ro_signers)?,
        num_rw: to_index(rw)?,
        accounts: table,
        instructions: compiled_ixs,
        signer_seeds,
    };
    validate_compiled_transaction(&compiled)?;
    Ok(compiled)
}

/// Compile a single target instruction with no derived-account signing.
pub fn compile_instruction(ix: &Instruction) -> Result<CompiledTransaction, ProgramError> {
    compile(std::slice::from_ref(ix), Vec::new())
}

/// Rebuild the instructions a descriptor encodes. Flags come from each
/// account's bucket, so merged duplicates decompile with their merged role.
pub fn decompile(compiled: &CompiledTransaction) -> Result<Vec<Instruction>, ProgramError> {
    validate_compiled_transaction(compiled)?;
    compiled
        .instructions
        .iter()
        .map(|ix| {
            let accounts = ix
                .accounts
                .iter()
                .map(|&i| {
                    let i = i as usize;
                    AccountMeta {
                        pubkey: compiled.accounts[i],
                        is_signer: compiled.is_signer(i),
                        is_writable: compiled.is_writable(i),
                    }
                })
                .collect();
            Ok(Instruction {
                program_id: compiled.accounts[ix.program_id_index as usize],
                accounts,
                data: ix.data.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str) -> Pubkey {
        Pubkey::hashed(label.as_bytes())
    }

    fn ask_like() -> Instruction {
        Instruction {
            program_id: key("program"),
            accounts: vec![
                AccountMeta::writable(key("payer"), true),
                AccountMeta::writable(key("interaction"), false),
                AccountMeta::readonly(key("context"), false),
                AccountMeta::readonly(key("oracle"), false),
                AccountMeta::readonly(key("system"), false),
            ],
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn distinct_accounts_keep_table_length() {
        let ix = ask_like();
        let compiled = compile_instruction(&ix).unwrap();
        // five metas plus the target program
        assert_eq!(compiled.accounts.len(), 6);
        assert_eq!(compiled.num_rw_signers, 1);
        assert_eq!(compiled.num_ro_signers, 0);
        assert_eq!(compiled.num_rw, 1);
        assert_eq!(compiled.num_ro(), 4);
        assert_eq!(compiled.accounts[0], key("payer"));
        assert_eq!(compiled.accounts[1], key("interaction"));
        // read-only bucket keeps first-appearance order
        assert_eq!(
            &compiled.accounts[2..],
            &[key("context"), key("oracle"), key("system"), key("program")]
        );
    }

    #[test]
    fn duplicates_shrink_table_and_merge_roles() {
        let mut ix = ask_like();
        ix.accounts.push(AccountMeta::writable(key("context"), false));
        ix.accounts.push(AccountMeta::readonly(key("payer"), false));
        let compiled = compile_instruction(&ix).unwrap();
        assert_eq!(compiled.accounts.len(), 6);
        assert!(compiled.accounts.len() < ix.accounts.len() + 1);
        // context became writable through its second reference
        let ctx = compiled.accounts.iter().position(|k| *k == key("context")).unwrap();
        assert!(compiled.is_writable(ctx));
        assert!(!compiled.is_signer(ctx));
    }

    #[test]
    fn decompile_reproduces_each_position() {
        let ix = ask_like();
        let compiled = compile_instruction(&ix).unwrap();
        let back = decompile(&compiled).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0], ix);
    }

    #[test]
    fn signers_precede_non_signers_across_instructions() {
        let a = Instruction {
            program_id: key("p1"),
            accounts: vec![
                AccountMeta::readonly(key("ro"), false),
                AccountMeta::readonly(key("ro-signer"), true),
            ],
            data: vec![],
        };
        let b = Instruction {
            program_id: key("p2"),
            accounts: vec![
                AccountMeta::writable(key("rw"), false),
                AccountMeta::writable(key("rw-signer"), true),
            ],
            data: vec![9],
        };
        let compiled = compile(&[a.clone(), b.clone()], Vec::new()).unwrap();
        assert_eq!(
            compiled.accounts,
            vec![
                key("rw-signer"),
                key("ro-signer"),
                key("rw"),
                key("ro"),
                key("p1"),
                key("p2"),
            ]
        );
        assert_eq!(decompile(&compiled).unwrap(), vec![a, b]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            compile(&[], Vec::new()),
            Err(ProgramError::InvalidCompiledTransaction(_))
        ));
    }

    #[test]
    fn wire_layout_starts_with_counts() {
        let compiled = compile_instruction(&ask_like()).unwrap();
        let bytes = compiled.encode().unwrap();
        assert_eq!(&bytes[..3], &[1, 0, 1]);
        assert_eq!(&bytes[3..7], &6u32.to_le_bytes());
        assert_eq!(CompiledTransaction::decode(&bytes).unwrap(), compiled);
    }
}
