//! On-disk records for the local WAL log.
//!
//! Two record kinds share one framing: a one-byte tag, a little-endian body
//! length, the body, and a CRC32 over tag and body. A committed batch is a
//! single `Commit` frame, so batch durability is all-or-nothing: a torn
//! append fails its CRC and is discarded at replay.

use crate::storage::DataType;
use crc32fast::Hasher as Crc32Hasher;
use thiserror::Error;

const COMMIT_TAG: u8 = 1;
const DRAINED_TAG: u8 = 2;

// tag + body_len
const FRAME_PREFIX_LEN: usize = 1 + 4;
const CRC_LEN: usize = 4;

/// Longest key a WAL row can carry (the frame stores key lengths as u16).
pub(crate) const MAX_KEY_LEN: usize = u16::MAX as usize;

/// A live row of the WAL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalRow {
    pub id: u64,
    pub key: String,
    pub value: Vec<u8>,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WalRecord {
    /// An atomically committed batch of rows.
    Commit(Vec<WalRow>),
    /// Row ids fully propagated to the remote store and removed from the
    /// table.
    Drained(Vec<u64>),
}

impl WalRecord {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let (tag, body) = match self {
            WalRecord::Commit(rows) => (COMMIT_TAG, encode_commit_body(rows)),
            WalRecord::Drained(ids) => (DRAINED_TAG, encode_drained_body(ids)),
        };
        let mut bytes = Vec::with_capacity(FRAME_PREFIX_LEN + body.len() + CRC_LEN);
        bytes.push(tag);
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        let mut hasher = Crc32Hasher::new();
        hasher.update(&bytes[..FRAME_PREFIX_LEN + body.len()]);
        bytes.extend_from_slice(&hasher.finalize().to_le_bytes());
        bytes
    }

    /// Decodes the record starting at `cursor`, returning it together with
    /// the cursor past its last byte.
    pub(crate) fn decode(buf: &[u8], cursor: usize) -> Result<(WalRecord, usize), FrameError> {
        if buf.len() - cursor < FRAME_PREFIX_LEN + CRC_LEN {
            return Err(FrameError::TooShort);
        }
        let tag = buf[cursor];
        let body_len = read_u32(&buf[cursor + 1..cursor + 5]) as usize;
        let total_len = FRAME_PREFIX_LEN + body_len + CRC_LEN;
        if cursor + total_len > buf.len() {
            return Err(FrameError::TooShort);
        }
        let checked = &buf[cursor..cursor + FRAME_PREFIX_LEN + body_len];
        let mut hasher = Crc32Hasher::new();
        hasher.update(checked);
        let stored = read_u32(&buf[cursor + FRAME_PREFIX_LEN + body_len..cursor + total_len]);
        if hasher.finalize() != stored {
            return Err(FrameError::CrcMismatch);
        }
        let body = &buf[cursor + FRAME_PREFIX_LEN..cursor + FRAME_PREFIX_LEN + body_len];
        let record = match tag {
            COMMIT_TAG => WalRecord::Commit(decode_commit_body(body)?),
            DRAINED_TAG => WalRecord::Drained(decode_drained_body(body)?),
            other => return Err(FrameError::UnknownTag(other)),
        };
        Ok((record, cursor + total_len))
    }
}

fn encode_commit_body(rows: &[WalRow]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    for row in rows {
        body.extend_from_slice(&row.id.to_le_bytes());
        body.push(row.data_type.wire_id());
        body.extend_from_slice(&(row.key.len() as u16).to_le_bytes());
        body.extend_from_slice(row.key.as_bytes());
        body.extend_from_slice(&(row.value.len() as u32).to_le_bytes());
        body.extend_from_slice(&row.value);
    }
    body
}

fn decode_commit_body(body: &[u8]) -> Result<Vec<WalRow>, FrameError> {
    let mut cursor = 0usize;
    let count = take_u32(body, &mut cursor)? as usize;
    let mut rows = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = take_u64(body, &mut cursor)?;
        let data_type = DataType::from_wire(take_u8(body, &mut cursor)?);
        let key_len = take_u16(body, &mut cursor)? as usize;
        let key_bytes = take_bytes(body, &mut cursor, key_len)?;
        let key = String::from_utf8(key_bytes.to_vec()).map_err(|_| FrameError::Corrupt)?;
        let value_len = take_u32(body, &mut cursor)? as usize;
        let value = take_bytes(body, &mut cursor, value_len)?.to_vec();
        rows.push(WalRow {
            id,
            key,
            value,
            data_type,
        });
    }
    if cursor != body.len() {
        return Err(FrameError::Corrupt);
    }
    Ok(rows)
}

fn encode_drained_body(ids: &[u64]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + ids.len() * 8);
    body.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        body.extend_from_slice(&id.to_le_bytes());
    }
    body
}

fn decode_drained_body(body: &[u8]) -> Result<Vec<u64>, FrameError> {
    let mut cursor = 0usize;
    let count = take_u32(body, &mut cursor)? as usize;
    let mut ids = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        ids.push(take_u64(body, &mut cursor)?);
    }
    if cursor != body.len() {
        return Err(FrameError::Corrupt);
    }
    Ok(ids)
}

fn take_bytes<'a>(buf: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], FrameError> {
    let end = cursor.checked_add(len).ok_or(FrameError::Corrupt)?;
    if end > buf.len() {
        return Err(FrameError::Corrupt);
    }
    let slice = &buf[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn take_u8(buf: &[u8], cursor: &mut usize) -> Result<u8, FrameError> {
    Ok(take_bytes(buf, cursor, 1)?[0])
}

fn take_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, FrameError> {
    let bytes = take_bytes(buf, cursor, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn take_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, FrameError> {
    let bytes = take_bytes(buf, cursor, 4)?;
    Ok(read_u32(bytes))
}

fn take_u64(buf: &[u8], cursor: &mut usize) -> Result<u64, FrameError> {
    let bytes = take_bytes(buf, cursor, 8)?;
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(array))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(array)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum FrameError {
    #[error("frame extends past end of log")]
    TooShort,
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("unknown record tag {0}")]
    UnknownTag(u8),
    #[error("corrupt frame body")]
    Corrupt,
}
