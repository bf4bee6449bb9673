//! Commit log: one checksummed frame per commit.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! magic "SSLG" (4) | version u16 | op count u32 | body len u32 | header crc32 u32
//!   | body | crc32 u32
//! ```
//!
//! The header CRC covers the fields before it, so the body length is checked
//! before it is trusted. The final CRC covers header and body. Body ops:
//!
//! ```text
//! put:    0x01 | tag len u16 | tag | id len u16 | id | mode u8 | payload len u32 | payload
//! delete: 0x02 | tag len u16 | tag | id len u16 | id
//! ```
//!
//! A frame with a valid header that runs past the end of the log, or a final
//! frame whose body checksum fails, was never acknowledged and is truncated
//! on open. A bad header anywhere, or a bad frame followed by more data, is
//! corruption and fails the open.

use crate::envelope::{Envelope, EnvelopeKey};
use crate::error::{CoreError, CoreResult};
use crate::types::{PayloadMode, RecordId};
use bytes::Bytes;
use sealstore_storage::{StorageBackend, StorageError, StorageResult};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"SSLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + op count (4) + body len (4)
const HEADER_FIELDS: usize = 14;
/// Header fields + header crc (4)
const HEADER_SIZE: usize = HEADER_FIELDS + 4;
const CRC_SIZE: usize = 4;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// One operation in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Insert or replace an envelope.
    Put(Envelope),
    /// Remove an envelope.
    Delete(EnvelopeKey),
}

impl LogOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> EnvelopeKey {
        match self {
            Self::Put(envelope) => envelope.key(),
            Self::Delete(key) => key.clone(),
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        match self {
            Self::Put(envelope) => {
                buf.push(OP_PUT);
                write_short(buf, envelope.type_tag.as_bytes(), "type tag")?;
                write_short(buf, envelope.id.as_str().as_bytes(), "record id")?;
                buf.push(envelope.mode.as_byte());
                let len = u32::try_from(envelope.payload.len()).map_err(|_| {
                    CoreError::invalid_operation(format!(
                        "payload of {} is too large to log ({} bytes)",
                        envelope.key(),
                        envelope.payload.len()
                    ))
                })?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(&envelope.payload);
            }
            Self::Delete(key) => {
                buf.push(OP_DELETE);
                write_short(buf, key.type_tag.as_bytes(), "type tag")?;
                write_short(buf, key.id.as_str().as_bytes(), "record id")?;
            }
        }
        Ok(())
    }
}

fn write_short(buf: &mut Vec<u8>, bytes: &[u8], what: &str) -> CoreResult<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        CoreError::invalid_operation(format!("{what} longer than {} bytes", u16::MAX))
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Encodes `ops` as one frame.
///
/// # Errors
///
/// Returns [`CoreError::InvalidOperation`] if a field exceeds its length
/// prefix.
pub fn encode_frame(ops: &[LogOp]) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    for op in ops {
        op.encode_into(&mut body)?;
    }

    let op_count = u32::try_from(ops.len())
        .map_err(|_| CoreError::invalid_operation("too many operations in one commit"))?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| CoreError::invalid_operation("commit too large for one frame"))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.extend_from_slice(&op_count.to_le_bytes());
    frame.extend_from_slice(&body_len.to_le_bytes());
    let header_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&header_crc.to_le_bytes());
    frame.extend_from_slice(&body);

    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Cursor over a frame body.
struct BodyReader<'a> {
    body: &'a [u8],
    cursor: usize,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| format!("unexpected end of body at byte {}", self.cursor))?;
        let bytes = &self.body[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn text(&mut self) -> Result<String, String> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "non UTF-8 identifier".to_owned())
    }

    fn key(&mut self) -> Result<EnvelopeKey, String> {
        let type_tag = self.text()?;
        let id = RecordId::new(self.text()?);
        Ok(EnvelopeKey { type_tag, id })
    }
}

fn decode_body(body: &[u8], op_count: u32) -> Result<Vec<LogOp>, String> {
    let mut reader = BodyReader { body, cursor: 0 };
    let mut ops = Vec::new();

    for _ in 0..op_count {
        let op = match reader.u8()? {
            OP_PUT => {
                let key = reader.key()?;
                let mode_byte = reader.u8()?;
                let mode = PayloadMode::from_byte(mode_byte)
                    .ok_or_else(|| format!("unknown payload mode {mode_byte}"))?;
                let len = reader.u32()? as usize;
                let payload = Bytes::copy_from_slice(reader.take(len)?);
                LogOp::Put(Envelope {
                    id: key.id,
                    type_tag: key.type_tag,
                    mode,
                    payload,
                })
            }
            OP_DELETE => LogOp::Delete(reader.key()?),
            other => return Err(format!("unknown op tag {other}")),
        };
        ops.push(op);
    }

    if reader.cursor != body.len() {
        return Err(format!(
            "trailing bytes in body: decoded {} of {}",
            reader.cursor,
            body.len()
        ));
    }
    Ok(ops)
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Byte offset of the frame in the log.
    pub offset: u64,
    /// Encoded length, header and checksum included.
    pub len: u64,
    /// Operations, in commit order.
    pub ops: Vec<LogOp>,
}

/// Result of reading a commit log from the start.
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    /// Every complete, verified frame.
    pub frames: Vec<Frame>,
    /// Length of the verified prefix.
    pub valid_len: u64,
    /// Total length of the log.
    pub total_len: u64,
}

impl LogScan {
    /// Bytes after the last verified frame.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }

    /// Replays every frame, returning the resulting envelope set.
    #[must_use]
    pub fn replay(&self) -> BTreeMap<EnvelopeKey, Envelope> {
        let mut envelopes = BTreeMap::new();
        for frame in &self.frames {
            apply_ops(&mut envelopes, frame.ops.iter().cloned());
        }
        envelopes
    }
}

/// Applies ops in order to an envelope map.
pub(crate) fn apply_ops(
    envelopes: &mut BTreeMap<EnvelopeKey, Envelope>,
    ops: impl IntoIterator<Item = LogOp>,
) {
    for op in ops {
        match op {
            LogOp::Put(envelope) => {
                envelopes.insert(envelope.key(), envelope);
            }
            LogOp::Delete(key) => {
                envelopes.remove(&key);
            }
        }
    }
}

fn corrupt(offset: u64, message: impl std::fmt::Display) -> CoreError {
    CoreError::container_init(format!("corrupt commit log frame at offset {offset}: {message}"))
}

/// Reads and verifies every frame in `backend` without modifying it.
///
/// # Errors
///
/// Returns [`CoreError::ContainerInit`] for corruption before the tail and
/// [`CoreError::Persistence`] if the backend cannot be read.
pub fn scan(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let total_len = backend.size()?;
    let mut frames = Vec::new();
    let mut offset = 0u64;

    while offset < total_len {
        let remaining = total_len - offset;
        if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
            break;
        }

        let header = backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            return Err(corrupt(offset, "bad magic"));
        }
        let stored_header_crc = u32::from_le_bytes([
            header[HEADER_FIELDS],
            header[HEADER_FIELDS + 1],
            header[HEADER_FIELDS + 2],
            header[HEADER_FIELDS + 3],
        ]);
        if crc32fast::hash(&header[..HEADER_FIELDS]) != stored_header_crc {
            return Err(corrupt(offset, "header checksum mismatch"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Err(corrupt(offset, format!("unsupported version {version}")));
        }
        let op_count = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
        let body_len = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);

        let frame_len = (HEADER_SIZE + CRC_SIZE) as u64 + u64::from(body_len);
        if frame_len > remaining {
            break;
        }

        let rest = backend.read_at(offset + HEADER_SIZE as u64, body_len as usize + CRC_SIZE)?;
        let (body, crc_bytes) = rest.split_at(body_len as usize);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            if offset + frame_len == total_len {
                break;
            }
            return Err(corrupt(offset, "checksum mismatch"));
        }

        let ops = decode_body(body, op_count).map_err(|message| corrupt(offset, message))?;
        frames.push(Frame {
            offset,
            len: frame_len,
            ops,
        });
        offset += frame_len;
    }

    Ok(LogScan {
        frames,
        valid_len: offset,
        total_len,
    })
}

/// Append-only commit log over a storage backend.
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    commits: u64,
    poisoned: bool,
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("commits", &self.commits)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl CommitLog {
    /// Opens a log, truncating an unacknowledged tail.
    ///
    /// Returns the log and the scan of its verified frames.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContainerInit`] if the log is corrupt or cannot
    /// be read or repaired.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, LogScan)> {
        let scan = scan(backend.as_ref()).map_err(|err| match err {
            CoreError::Persistence(io) => {
                CoreError::container_init(format!("cannot read commit log: {io}"))
            }
            other => other,
        })?;

        if scan.torn_bytes() > 0 {
            warn!(
                offset = scan.valid_len,
                bytes = scan.torn_bytes(),
                "truncating unacknowledged commit log tail"
            );
            backend.truncate(scan.valid_len).map_err(|err| {
                CoreError::container_init(format!("cannot truncate commit log tail: {err}"))
            })?;
        }

        let log = Self {
            backend,
            sync_on_commit,
            commits: scan.frames.len() as u64,
            poisoned: false,
        };
        Ok((log, scan))
    }

    /// Appends one frame holding `ops`, returning its offset.
    ///
    /// On failure the log is truncated back to its previous size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the frame cannot be written,
    /// and [`CoreError::InvalidOperation`] if it cannot be encoded.
    pub fn append(&mut self, ops: &[LogOp]) -> CoreResult<u64> {
        if self.poisoned {
            return Err(CoreError::Persistence(StorageError::Io(std::io::Error::other(
                "commit log was left inconsistent by a failed rollback; reopen the store",
            ))));
        }

        let frame = encode_frame(ops)?;
        let start = self.backend.size()?;
        match self.write_frame(&frame) {
            Ok(()) => {
                self.commits += 1;
                Ok(start)
            }
            Err(err) => {
                self.rollback_to(start);
                Err(err.into())
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> StorageResult<()> {
        self.backend.append(frame)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    fn rollback_to(&mut self, size: u64) {
        match self.backend.truncate(size) {
            Ok(()) => debug!(size, "rolled back failed commit"),
            Err(err) => {
                warn!(error = %err, size, "failed to roll back commit log");
                self.poisoned = true;
            }
        }
    }

    /// Returns the log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the backend cannot report it.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the number of frames in the log.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits
    }
}
