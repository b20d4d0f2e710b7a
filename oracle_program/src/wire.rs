//! Little-endian, length-prefixed wire codec for instruction arguments.
//!
//! Integers are fixed-width LE. Byte strings, UTF-8 strings and vectors are
//! prefixed with a u32 LE element count. Identities are 32 raw bytes.

use crate::pubkey::Pubkey;

/// Upper bound on any single length prefix, guards allocation on decode.
pub const MAX_WIRE_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("{0} trailing bytes after decode")]
    TrailingBytes(usize),

    #[error("length prefix {0} exceeds limit")]
    LengthOverflow(usize),

    #[error("value {value} does not fit in {width}")]
    NarrowingOverflow { value: usize, width: &'static str },
}

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &[u8]) -> Self {
        Self {
            buf: prefix.to_vec(),
        }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_len(&mut self, len: usize) -> Result<&mut Self, WireError> {
        let v = u32::try_from(len).map_err(|_| WireError::NarrowingOverflow {
            value: len,
            width: "u32",
        })?;
        Ok(self.put_u32(v))
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, WireError> {
        self.put_len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn put_str(&mut self, s: &str) -> Result<&mut Self, WireError> {
        self.put_bytes(s.as_bytes())
    }

    pub fn put_pubkey(&mut self, key: &Pubkey) -> &mut Self {
        self.buf.extend_from_slice(key.as_ref());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a borrowed slice.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn length_prefix(&mut self) -> Result<usize, WireError> {
        let n = self.u32()? as usize;
        if n > MAX_WIRE_LEN {
            return Err(WireError::LengthOverflow(n));
        }
        Ok(n)
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let n = self.length_prefix()?;
        Ok(self.take(n)?.to_vec())
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        String::from_utf8(self.bytes()?).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, WireError> {
        Ok(Pubkey::new_from_array(self.take_array()?))
    }

    pub fn fixed<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        self.take_array()
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}
