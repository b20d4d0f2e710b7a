//! Byte-exact user record layout.
//!
//!   [0..8)    account discriminator, sha256("account:UserAccount")[..8]
//!   [8]       derivation bump
//!   [9..13)   response length, u32 LE
//!   [13..)    response bytes, UTF-8
//!
//! The encoder fills the whole allocation (zero padded). A response that does
//! not fit the allocation is rejected, never truncated.

use crate::discriminator::{self, Discriminator, DISCRIMINATOR_LEN};
use crate::domain::{UserAccount, USER_ACCOUNT_HEADER_LEN, USER_ACCOUNT_NAME};
use crate::error::ProgramError;
use crate::pubkey::Pubkey;

const BUMP_OFFSET: usize = DISCRIMINATOR_LEN;
const LEN_OFFSET: usize = BUMP_OFFSET + 1;

pub fn user_account_discriminator() -> Discriminator {
    discriminator::account(USER_ACCOUNT_NAME)
}

/// Response bytes a record of `space` bytes can hold.
pub fn response_capacity(space: usize) -> usize {
    space.saturating_sub(USER_ACCOUNT_HEADER_LEN)
}

/// Encode `account` into a buffer of exactly `space` bytes.
pub fn encode_user_account(account: &UserAccount, space: usize) -> Result<Vec<u8>, ProgramError> {
    let response = account.last_response.as_bytes();
    let capacity = response_capacity(space);
    if space < USER_ACCOUNT_HEADER_LEN || response.len() > capacity {
        return Err(ProgramError::ResponseTooLarge {
            len: response.len(),
            capacity,
        });
    }

    let mut data = vec![0u8; space];
    data[..DISCRIMINATOR_LEN].copy_from_slice(&user_account_discriminator());
    data[BUMP_OFFSET] = account.bump;
    data[LEN_OFFSET..USER_ACCOUNT_HEADER_LEN]
        .copy_from_slice(&(response.len() as u32).to_le_bytes());
    data[USER_ACCOUNT_HEADER_LEN..USER_ACCOUNT_HEADER_LEN + response.len()]
        .copy_from_slice(response);
    Ok(data)
}

/// Overwrite `data` in place with `account`, keeping its allocation.
pub fn write_user_account(data: &mut [u8], account: &UserAccount) -> Result<(), ProgramError> {
    let encoded = encode_user_account(account, data.len())?;
    data.copy_from_slice(&encoded);
    Ok(())
}

/// Decode a record, validating discriminator, bounds and UTF-8.
pub fn decode_user_account(address: &Pubkey, data: &[u8]) -> Result<UserAccount, ProgramError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(ProgramError::AccountDidNotDeserialize {
            account: *address,
            reason: format!("{} bytes is shorter than the discriminator", data.len()),
        });
    }
    if data[..DISCRIMINATOR_LEN] != user_account_discriminator() {
        return Err(ProgramError::AccountDiscriminatorMismatch(*address));
    }
    if data.len() < USER_ACCOUNT_HEADER_LEN {
        return Err(ProgramError::AccountDidNotDeserialize {
            account: *address,
            reason: format!("{} bytes is shorter than the header", data.len()),
        });
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[LEN_OFFSET..USER_ACCOUNT_HEADER_LEN]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let end = USER_ACCOUNT_HEADER_LEN
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| ProgramError::AccountDidNotDeserialize {
            account: *address,
            reason: format!(
                "response length {} exceeds allocation of {} bytes",
                len,
                data.len()
            ),
        })?;

    let last_response = std::str::from_utf8(&data[USER_ACCOUNT_HEADER_LEN..end])
        .map_err(|e| ProgramError::AccountDidNotDeserialize {
            account: *address,
            reason: format!("response is not UTF-8: {}", e),
        })?
        .to_string();

    Ok(UserAccount {
        bump: data[BUMP_OFFSET],
        last_response,
    })
}

/// Response text if the buffer is non-empty. This is the "answer ready"
/// check: `length > 0`.
pub fn read_response(address: &Pubkey, data: &[u8]) -> Result<Option<String>, ProgramError> {
    let account = decode_user_account(address, data)?;
    if account.last_response.is_empty() {
        Ok(None)
    } else {
        Ok(Some(account.last_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::USER_ACCOUNT_SPACE;

    fn addr() -> Pubkey {
        Pubkey::hashed(b"record")
    }

    #[test]
    fn layout_is_byte_exact() {
        let acct = UserAccount {
            bump: 254,
            last_response: "4".to_string(),
        };
        let data = encode_user_account(&acct, 16).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..8], &[211, 33, 136, 16, 186, 110, 242, 127]);
        assert_eq!(data[8], 254);
        assert_eq!(&data[9..13], &[1, 0, 0, 0]);
        assert_eq!(data[13], b'4');
        assert_eq!(&data[14..], &[0, 0]);
    }

    #[test]
    fn fresh_record_has_empty_buffer() {
        let data = encode_user_account(&UserAccount::default(), USER_ACCOUNT_SPACE).unwrap();
        assert_eq!(read_response(&addr(), &data).unwrap(), None);
    }

    #[test]
    fn exceeding_capacity_fails_instead_of_truncating() {
        let acct = UserAccount {
            bump: 1,
            last_response: "abcd".to_string(),
        };
        assert_eq!(
            encode_user_account(&acct, 16),
            Err(ProgramError::ResponseTooLarge { len: 4, capacity: 3 })
        );
        assert!(encode_user_account(&acct, 17).is_ok());
    }

    #[test]
    fn overwrite_replaces_wholesale() {
        let mut data = encode_user_account(
            &UserAccount {
                bump: 9,
                last_response: "a much longer first answer".to_string(),
            },
            64,
        )
        .unwrap();
        write_user_account(
            &mut data,
            &UserAccount {
                bump: 9,
                last_response: "short".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            decode_user_account(&addr(), &data).unwrap().last_response,
            "short"
        );
        assert!(data[13 + 5..].iter().all(|b| *b == 0));
    }

    #[test]
    fn corrupt_length_is_rejected() {
        let mut data = encode_user_account(&UserAccount::default(), 20).unwrap();
        data[9..13].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode_user_account(&addr(), &data),
            Err(ProgramError::AccountDidNotDeserialize { .. })
        ));
    }

    #[test]
    fn wrong_discriminator_is_rejected() {
        let data = vec![0u8; 20];
        assert_eq!(
            decode_user_account(&addr(), &data),
            Err(ProgramError::AccountDiscriminatorMismatch(addr()))
        );
    }
}
