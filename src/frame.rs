//! Wire-format definitions for data frames and acknowledgements.
//!
//! Every datagram carrying application data is a [`Frame`]; every datagram
//! flowing back to the sender is an [`Ack`].  This module is responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising frames/acks into byte buffers ready for transmission.
//! - Verifying the integrity checksum of inbound frames, reporting
//!   [`CorruptFrame`] for anything that does not verify.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  Frame:
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Checksum           |    Seq (low)  |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//!  Ack:
//! +-+-+-+-+-+-+-+-+
//! |    Seq (low)  |   cumulative: "received through this value"
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Only the low byte of the sequence number travels on the wire.  Callers
//! keep full `u64` counters and unwrap against their own window state.

use thiserror::Error;

/// Byte length of the fixed frame header (checksum + sequence byte).
pub const HEADER_LEN: usize = 3;

/// Byte length of an encoded [`Ack`].
pub const ACK_LEN: usize = 1;

// Byte offsets of each field within the serialised frame.
const OFF_CHECKSUM: usize = 0;
const OFF_SEQ: usize = 2;

/// A decoded, checksum-verified data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Low byte of the sender's sequence number.
    pub seq: u8,
    /// Application payload; empty marks end of stream.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialise a frame for sequence number `seq` carrying `payload`.
    ///
    /// Only `seq mod 256` is written.  The checksum covers the sequence byte
    /// and the payload.
    pub fn encode(seq: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        buf[OFF_SEQ] = seq as u8;
        buf[HEADER_LEN..].copy_from_slice(payload);

        let csum = checksum(&buf[OFF_SEQ..]);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    /// Parse and verify a [`Frame`] from a raw datagram.
    ///
    /// A corrupt frame exposes no sequence number; callers must not let it
    /// influence window or expected-sequence state.
    pub fn decode(buf: &[u8]) -> Result<Self, CorruptFrame> {
        if buf.len() < HEADER_LEN {
            return Err(CorruptFrame::Truncated { len: buf.len() });
        }

        let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
        let computed = checksum(&buf[OFF_SEQ..]);
        if stored != computed {
            return Err(CorruptFrame::ChecksumMismatch { stored, computed });
        }

        Ok(Frame {
            seq: buf[OFF_SEQ],
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// `true` when this frame is the end-of-stream marker.
    pub fn is_end_of_stream(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A cumulative acknowledgement as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack(pub u8);

impl Ack {
    /// The ack a receiver emits while waiting for `expected`:
    /// "everything through `expected - 1` has arrived".
    ///
    /// Before anything has been delivered (`expected == 0`) this is `0xFF`,
    /// which a sender at `Base == 0` always classifies as a duplicate.
    pub fn cumulative(expected: u64) -> Self {
        Ack((expected as u8).wrapping_sub(1))
    }

    pub fn encode(self) -> [u8; ACK_LEN] {
        [self.0]
    }

    /// Returns `None` for any datagram that is not exactly one byte long.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        match buf {
            [seq] => Some(Ack(*seq)),
            _ => None,
        }
    }
}

/// Reasons an inbound datagram failed to decode as a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptFrame {
    /// Shorter than the fixed header.
    #[error("frame truncated: {len} byte(s), header needs {HEADER_LEN}")]
    Truncated { len: usize },
    /// Recomputed checksum disagrees with the stored one.
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
