//! GELF chunk framing
//!
//! A payload larger than the configured datagram size is split into at most
//! [`MAX_CHUNKS`] fragments, each prefixed with a 12-byte header:
//!
//! | Offset | Size | Field                        |
//! |--------|------|------------------------------|
//! | 0      | 2    | Magic `0x1e 0x0f`            |
//! | 2      | 8    | Message ID, shared by chunks |
//! | 10     | 1    | Sequence number (0-based)    |
//! | 11     | 1    | Sequence count               |
//! | 12     | var  | Payload slice                |

use crate::{GelfError, Result};
use std::ops::Range;

/// Chunk magic bytes
pub const MAGIC: [u8; 2] = [0x1e, 0x0f];
/// Length of the chunk header
pub const HEADER_LEN: usize = 12;
/// Most chunks a single message may be split into
pub const MAX_CHUNKS: usize = 128;

/// Identifier shared by every chunk of one message
pub type MessageId = [u8; 8];

/// Generate a fresh random message ID
pub fn new_message_id() -> MessageId {
    rand::random()
}

/// How one payload is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Total payload length in bytes
    pub payload_len: usize,
    /// Number of chunks
    pub count: usize,
    /// Size of a full chunk including its header
    pub chunk_size: usize,
}

impl ChunkPlan {
    /// Plan the split of a `payload_len` byte payload.
    ///
    /// Returns `Ok(None)` when the payload fits in one unchunked datagram and
    /// an oversize error when it would need more than [`MAX_CHUNKS`] chunks.
    pub fn for_payload(payload_len: usize, max_payload_size: usize) -> Result<Option<Self>> {
        if max_payload_size <= HEADER_LEN {
            return Err(GelfError::Config(format!(
                "max_payload_size must be greater than {}, got {}",
                HEADER_LEN, max_payload_size
            )));
        }
        if payload_len <= max_payload_size {
            return Ok(None);
        }

        let max_data = max_payload_size - HEADER_LEN;
        let count = payload_len.div_ceil(max_data);
        if count > MAX_CHUNKS {
            return Err(GelfError::Oversize {
                bytes: payload_len,
                chunks: count,
            });
        }

        // Spread the payload evenly so no chunk is larger than it needs to be.
        let chunk_size = (payload_len + count * HEADER_LEN).div_ceil(count);

        Ok(Some(Self {
            payload_len,
            count,
            chunk_size,
        }))
    }

    /// Payload bytes carried by every chunk but possibly the last
    pub fn data_per_chunk(&self) -> usize {
        self.chunk_size - HEADER_LEN
    }

    /// Byte range of the payload carried by chunk `seq`
    pub fn payload_range(&self, seq: usize) -> Range<usize> {
        let start = (seq * self.data_per_chunk()).min(self.payload_len);
        let end = (start + self.data_per_chunk()).min(self.payload_len);
        start..end
    }
}

/// Write the chunk header into the first [`HEADER_LEN`] bytes of `buf`
pub fn write_header(buf: &mut [u8], id: &MessageId, seq: u8, count: u8) {
    buf[0..2].copy_from_slice(&MAGIC);
    buf[2..10].copy_from_slice(id);
    buf[10] = seq;
    buf[11] = count;
}

/// Lay out chunk `seq` in `buf`, overwriting whatever it held, and return
/// the bytes to send.
///
/// `buf` must be at least `plan.chunk_size` long.
pub fn encode_chunk_into<'a>(
    buf: &'a mut [u8],
    payload: &[u8],
    plan: &ChunkPlan,
    id: &MessageId,
    seq: usize,
) -> &'a [u8] {
    let range = plan.payload_range(seq);
    let len = range.len();
    // count <= MAX_CHUNKS, so both values fit a byte
    write_header(buf, id, seq as u8, plan.count as u8);
    buf[HEADER_LEN..HEADER_LEN + len].copy_from_slice(&payload[range]);
    &buf[..HEADER_LEN + len]
}

/// Encode every chunk into its own buffer
pub fn encode_chunks(payload: &[u8], plan: &ChunkPlan, id: &MessageId) -> Vec<Vec<u8>> {
    (0..plan.count)
        .map(|seq| {
            let range = plan.payload_range(seq);
            let mut chunk = vec![0u8; HEADER_LEN + range.len()];
            encode_chunk_into(&mut chunk, payload, plan, id, seq);
            chunk
        })
        .collect()
}

/// A parsed chunk, borrowing from the datagram it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Shared message identifier
    pub message_id: MessageId,
    /// Position of this chunk, 0-based
    pub sequence_number: u8,
    /// Total number of chunks in the message
    pub sequence_count: u8,
    /// Payload slice
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Parse a datagram as a chunk; `None` when it carries no chunk header
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        if datagram.len() < HEADER_LEN || datagram[0..2] != MAGIC {
            return None;
        }
        let mut message_id = [0u8; 8];
        message_id.copy_from_slice(&datagram[2..10]);
        Some(Self {
            message_id,
            sequence_number: datagram[10],
            sequence_count: datagram[11],
            payload: &datagram[HEADER_LEN..],
        })
    }
}
