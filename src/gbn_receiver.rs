//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N:
//!
//! - Only the frame whose sequence number equals `expected` is accepted.
//! - Corrupt frames are dropped **without** an ack; the sender's timeout
//!   recovers them.
//! - Duplicate or out-of-order frames are discarded (never buffered) and
//!   answered with a repeat of the current cumulative ack.
//!
//! The state machine has a single state, `Awaiting(expected)`; the only
//! transition is `expected += 1` on an in-order valid frame.
//!
//! This module only manages state; all channel I/O is the caller's
//! responsibility (same pattern as [`crate::gbn_sender::GbnSender`]).

use std::fmt;

use crate::frame::{Ack, CorruptFrame, Frame};

/// What the caller must do after feeding one datagram to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Checksum failed or the datagram was truncated.  Send nothing.
    Corrupt(CorruptFrame),
    /// In-order frame: hand `payload` to the application, then send `ack`.
    Delivered {
        seq: u64,
        payload: Vec<u8>,
        ack: Ack,
    },
    /// Valid but not the expected frame: send `ack` again, deliver nothing.
    Duplicate { ack: Ack },
}

impl FrameOutcome {
    /// The ack to put on the wire, if any.
    pub fn ack(&self) -> Option<Ack> {
        match self {
            FrameOutcome::Corrupt(_) => None,
            FrameOutcome::Delivered { ack, .. } | FrameOutcome::Duplicate { ack } => Some(*ack),
        }
    }
}

/// Running counters for the final receive report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub duplicates: u64,
    pub corrupt: u64,
}

/// Go-Back-N receive-side state for one connection.
#[derive(Debug, Default)]
pub struct GbnReceiver {
    /// Next sequence number this receiver will accept.
    expected: u64,
    stats: ReceiverStats,
}

impl GbnReceiver {
    /// A receiver awaiting frame 0.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Cumulative ack describing the current state (`expected - 1`).
    pub fn ack(&self) -> Ack {
        Ack::cumulative(self.expected)
    }

    /// Decode `datagram` and advance the state machine.
    pub fn on_frame(&mut self, datagram: &[u8]) -> FrameOutcome {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(corrupt) => {
                self.stats.corrupt += 1;
                return FrameOutcome::Corrupt(corrupt);
            }
        };

        if frame.seq != self.expected as u8 {
            // Duplicate of a delivered frame or ahead of a gap: GBN drops both.
            self.stats.duplicates += 1;
            return FrameOutcome::Duplicate { ack: self.ack() };
        }

        let seq = self.expected;
        self.expected += 1;
        self.stats.frames_delivered += 1;
        self.stats.bytes_delivered += frame.payload.len() as u64;

        FrameOutcome::Delivered {
            seq,
            payload: frame.payload,
            ack: self.ack(),
        }
    }

    /// Diagram of the receive state for trace logging, `window` slots wide.
    pub fn view(&self, window: usize) -> ReceiverView {
        ReceiverView {
            expected: self.expected,
            window,
        }
    }
}

/// Renders the receive state as `..2 [? ? ? ?]`: frames before the bracket
/// have been delivered; `?` marks sequence numbers still awaited.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverView {
    expected: u64,
    window: usize,
}

impl fmt::Display for ReceiverView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected > 0 {
            write!(f, "..{} ", self.expected - 1)?;
        }
        let slots = vec!["?"; self.window];
        write!(f, "[{}]", slots.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
