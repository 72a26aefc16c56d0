//! Pending-log entry format with varint framing.
//!
//! Frame format:
//! - body_len: varint
//! - op: u8 (1 = add, 2 = commit)
//! - id: zigzag varint
//! - timestamp: zigzag varint (unix seconds)
//! - attempt?: zigzag varint (add only)
//! - payload_len?: varint (add only)
//! - payload?: bytes[payload_len] (add only)
//!
//! Frames are concatenated back to back with no file header or checksum.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Largest payload an add entry may carry (16 MiB).
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Upper bound on the fixed part of a body: op byte plus four 10-byte varints.
const MAX_BODY_OVERHEAD: usize = 1 + 4 * 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Commit entry for id {id} carries add-only fields")]
    CommitWithAddFields { id: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorruptEntry {
    #[error("Incomplete entry")]
    Incomplete,
    #[error("Unknown operation tag: {0}")]
    UnknownOperation(u8),
    #[error("Varint overflow")]
    VarintOverflow,
    #[error("Attempt counter out of range: {0}")]
    AttemptOutOfRange(i64),
    #[error("Frame of {0} bytes exceeds the entry size limit")]
    FrameTooLarge(u64),
    #[error("Entry body does not match its frame length")]
    LengthMismatch,
}

/// Which half of an operation's lifecycle an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Add = 1,
    Commit = 2,
}

impl TryFrom<u8> for Operation {
    type Error = CorruptEntry;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Operation::Add),
            2 => Ok(Operation::Commit),
            v => Err(CorruptEntry::UnknownOperation(v)),
        }
    }
}

/// A single pending-log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    /// Retry counter; always zero for commits.
    pub attempt: i32,
    /// Opaque caller data; always empty for commits.
    pub payload: Bytes,
    pub operation: Operation,
}

impl Entry {
    /// Creates an add entry marking `id` as in flight.
    pub fn add(id: i64, timestamp: i64, attempt: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            timestamp,
            attempt,
            payload: payload.into(),
            operation: Operation::Add,
        }
    }

    /// Creates a commit entry marking `id` as resolved.
    pub fn commit(id: i64, timestamp: i64) -> Self {
        Self {
            id,
            timestamp,
            attempt: 0,
            payload: Bytes::new(),
            operation: Operation::Commit,
        }
    }

    pub fn is_add(&self) -> bool {
        self.operation == Operation::Add
    }

    fn validate(&self) -> Result<(), EncodingError> {
        match self.operation {
            Operation::Add if self.payload.len() > MAX_PAYLOAD_LEN => {
                Err(EncodingError::PayloadTooLarge {
                    len: self.payload.len(),
                    max: MAX_PAYLOAD_LEN,
                })
            }
            Operation::Commit if self.attempt != 0 || !self.payload.is_empty() => {
                Err(EncodingError::CommitWithAddFields { id: self.id })
            }
            _ => Ok(()),
        }
    }

    /// Encodes the entry as one length-prefixed frame.
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        self.validate()?;

        let mut body = BytesMut::with_capacity(MAX_BODY_OVERHEAD + self.payload.len());
        body.put_u8(self.operation as u8);
        encode_varint(&mut body, zigzag(self.id));
        encode_varint(&mut body, zigzag(self.timestamp));

        if self.operation == Operation::Add {
            encode_varint(&mut body, zigzag(i64::from(self.attempt)));
            encode_varint(&mut body, self.payload.len() as u64);
            body.put_slice(&self.payload);
        }

        let mut frame = BytesMut::with_capacity(body.len() + 10);
        encode_varint(&mut frame, body.len() as u64);
        frame.put_slice(&body);

        Ok(frame.freeze())
    }

    /// Decodes one frame from the front of `data`.
    ///
    /// Returns the entry and the number of bytes consumed, so callers can walk
    /// a buffer of concatenated frames.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), CorruptEntry> {
        let mut cursor = data;

        let body_len = decode_varint(&mut cursor)?;
        if body_len > (MAX_BODY_OVERHEAD + MAX_PAYLOAD_LEN) as u64 {
            return Err(CorruptEntry::FrameTooLarge(body_len));
        }
        let body_len = body_len as usize;
        if cursor.len() < body_len {
            return Err(CorruptEntry::Incomplete);
        }

        let header_len = data.len() - cursor.len();
        let mut body = &cursor[..body_len];

        // Inside a complete frame, running short means the length lied.
        let entry = Self::decode_body(&mut body).map_err(|e| match e {
            CorruptEntry::Incomplete => CorruptEntry::LengthMismatch,
            other => other,
        })?;

        if !body.is_empty() {
            return Err(CorruptEntry::LengthMismatch);
        }

        Ok((entry, header_len + body_len))
    }

    fn decode_body(body: &mut &[u8]) -> Result<Self, CorruptEntry> {
        if body.is_empty() {
            return Err(CorruptEntry::Incomplete);
        }
        let operation = Operation::try_from(body.get_u8())?;
        let id = unzigzag(decode_varint(body)?);
        let timestamp = unzigzag(decode_varint(body)?);

        match operation {
            Operation::Commit => Ok(Entry::commit(id, timestamp)),
            Operation::Add => {
                let raw_attempt = unzigzag(decode_varint(body)?);
                let attempt = i32::try_from(raw_attempt)
                    .map_err(|_| CorruptEntry::AttemptOutOfRange(raw_attempt))?;

                let payload_len = decode_varint(body)?;
                if payload_len > MAX_PAYLOAD_LEN as u64 {
                    return Err(CorruptEntry::FrameTooLarge(payload_len));
                }
                let payload_len = payload_len as usize;
                if body.len() < payload_len {
                    return Err(CorruptEntry::Incomplete);
                }
                let payload = Bytes::copy_from_slice(&body[..payload_len]);
                body.advance(payload_len);

                Ok(Entry::add(id, timestamp, attempt, payload))
            }
        }
    }
}

/// Converts a wall-clock time to whole unix seconds; times before the epoch
/// come out negative.
pub fn unix_seconds(ts: SystemTime) -> i64 {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => {
            let before = e.duration();
            let secs = i64::try_from(before.as_secs()).unwrap_or(i64::MAX);
            // Round toward negative infinity, matching a floor of the signed value.
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encodes a u64 as a varint (LEB128).
fn encode_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decodes a varint (LEB128) from bytes.
fn decode_varint(data: &mut &[u8]) -> Result<u64, CorruptEntry> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        if data.is_empty() {
            return Err(CorruptEntry::Incomplete);
        }
        if shift >= 64 {
            return Err(CorruptEntry::VarintOverflow);
        }

        let byte = data.get_u8();
        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    Ok(result)
}
