//! Append-only operation journal: binary protobuf log.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][protobuf bytes][4-byte LE length][protobuf bytes]...
//!
//! Strict append only. fsync after every write. Sequence numbers start at
//! 1 and increase by exactly one.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;

use crate::proto_types::ProtoJournalEntry;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 1024 * 1024;

pub struct Journal {
    path: PathBuf,
    last_sequence: u64,
}

impl Journal {
    /// Open or create a journal at `path`, scanning existing frames for
    /// the last sequence number.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_sequence = if path.exists() {
            read_frames(path)?.last().map(|e| e.sequence).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub fn append(&mut self, entry: &ProtoJournalEntry) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Append entries with a single fsync. Sequence is validated for the
    /// whole batch before anything is written; a batch that fails midway
    /// is truncated off again, so the journal keeps whole batches only.
    pub fn append_batch(&mut self, entries: &[ProtoJournalEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut expected = self.next_sequence();
        for entry in entries {
            if entry.sequence != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "sequence violation in journal: expected {}, got {}",
                        expected, entry.sequence
                    ),
                ));
            }
            expected += 1;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let start = file.metadata()?.len();
        if let Err(e) = write_frames(&mut file, entries) {
            // Drop partial frames so the next append starts on a clean tail.
            file.set_len(start)
                .and_then(|_| file.sync_all())
                .map_err(|undo| {
                    io::Error::new(
                        undo.kind(),
                        format!("append failed ({}) and truncate failed: {}", e, undo),
                    )
                })?;
            return Err(e);
        }

        self.last_sequence = expected - 1;
        Ok(())
    }

    pub fn load_all(&self) -> io::Result<Vec<ProtoJournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_frames(&self.path)
    }
}

fn write_frames(file: &mut File, entries: &[ProtoJournalEntry]) -> io::Result<()> {
    {
        let mut writer = BufWriter::new(&mut *file);
        for entry in entries {
            let buf = entry.encode_to_vec();
            if buf.len() > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("frame for sequence {} is {} bytes", entry.sequence, buf.len()),
                ));
            }
            writer.write_all(&(buf.len() as u32).to_le_bytes())?;
            writer.write_all(&buf)?;
        }
        writer.flush()?;
    }
    file.sync_all()
}

fn read_frames(path: &Path) -> io::Result<Vec<ProtoJournalEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries: Vec<ProtoJournalEntry> = Vec::new();
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame length: {}", len),
            ));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("truncated frame: {}", e))
        })?;

        let entry = ProtoJournalEntry::decode(frame.as_slice()).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("protobuf decode error: {}", e))
        })?;

        let expected = entries.last().map(|e| e.sequence + 1).unwrap_or(1);
        if entry.sequence != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("journal gap: expected {}, found {}", expected, entry.sequence),
            ));
        }
        entries.push(entry);
    }

    Ok(entries)
}
