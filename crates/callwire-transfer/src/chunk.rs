//! Chunk encoding and decoding.
//!
//! Every chunk travels as one data channel message: a fixed 17-byte
//! header followed by the payload. All multi-byte fields are big-endian.
//!
//! ```text
//! 0        1            5            9            13           17
//! ┌────────┬────────────┬────────────┬────────────┬────────────┬─────────┐
//! │version │ session id │   index    │   total    │ payload len│ payload │
//! └────────┴────────────┴────────────┴────────────┴────────────┴─────────┘
//! ```

use crate::error::{ChunkError, Result, TransferError};
use crate::{CHUNK_HEADER_SIZE, WIRE_VERSION};
use bytes::{BufMut, Bytes, BytesMut};

/// One slice of a transfer payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Session the chunk belongs to
    pub session_id: u32,
    /// Zero-based position within the session
    pub index: u32,
    /// Number of chunks in the session
    pub total: u32,
    /// Chunk payload
    pub payload: Bytes,
}

impl Chunk {
    /// Check the header invariants: `total > 0` and `index < total`
    pub fn validate(&self) -> std::result::Result<(), ChunkError> {
        if self.total == 0 {
            return Err(ChunkError::ZeroTotal);
        }
        if self.index >= self.total {
            return Err(ChunkError::IndexOutOfRange {
                index: self.index,
                total: self.total,
            });
        }
        Ok(())
    }

    /// Returns true for the final chunk of its session
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    /// Size of the encoded message
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len()
    }

    /// Encode into a single message
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(WIRE_VERSION);
        buf.put_u32(self.session_id);
        buf.put_u32(self.index);
        buf.put_u32(self.total);
        // Payloads are bounded by the chunk size, far below u32::MAX.
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode one message. The payload shares the message buffer.
    ///
    /// Only the framing is checked here. `index` and `total` come back as
    /// sent, so a bad header can still be attributed to its session; call
    /// [`Chunk::validate`] before trusting them.
    pub fn decode(data: Bytes) -> std::result::Result<Self, ChunkError> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(ChunkError::TooShort {
                expected: CHUNK_HEADER_SIZE,
                actual: data.len(),
            });
        }

        if data[0] != WIRE_VERSION {
            return Err(ChunkError::UnsupportedVersion(data[0]));
        }

        let session_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let index = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        let total = u32::from_be_bytes([data[9], data[10], data[11], data[12]]);
        let payload_len = u32::from_be_bytes([data[13], data[14], data[15], data[16]]) as usize;

        let actual = data.len() - CHUNK_HEADER_SIZE;
        if payload_len != actual {
            return Err(ChunkError::LengthMismatch {
                declared: payload_len,
                actual,
            });
        }

        Ok(Self {
            session_id,
            index,
            total,
            payload: data.slice(CHUNK_HEADER_SIZE..),
        })
    }
}

/// Number of chunks a payload of `len` bytes splits into
#[must_use]
pub fn chunk_count(len: usize, chunk_size: usize) -> Option<u32> {
    if chunk_size == 0 {
        return None;
    }
    u32::try_from(len.div_ceil(chunk_size)).ok()
}

/// Split `payload` into chunks of at most `chunk_size` bytes.
///
/// # Errors
///
/// Returns `TransferError::InvalidPayload` for an empty payload or one
/// needing more than `u32::MAX` chunks, and `TransferError::InvalidConfig`
/// for a zero chunk size.
pub fn split(session_id: u32, payload: Bytes, chunk_size: usize) -> Result<Chunks> {
    if chunk_size == 0 {
        return Err(TransferError::invalid_config("chunk size must be non-zero"));
    }
    if payload.is_empty() {
        return Err(TransferError::invalid_payload("payload is empty"));
    }
    let total = chunk_count(payload.len(), chunk_size)
        .ok_or(TransferError::invalid_payload("payload needs too many chunks"))?;

    Ok(Chunks {
        session_id,
        payload,
        chunk_size,
        total,
        next: 0,
    })
}

/// Iterator over the chunks of one payload, in ascending index order
#[derive(Debug, Clone)]
pub struct Chunks {
    session_id: u32,
    payload: Bytes,
    chunk_size: usize,
    total: u32,
    next: u32,
}

impl Chunks {
    /// Total number of chunks
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.total {
            return None;
        }

        let start = self.next as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.payload.len());
        let chunk = Chunk {
            session_id: self.session_id,
            index: self.next,
            total: self.total,
            payload: self.payload.slice(start..end),
        };
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}
