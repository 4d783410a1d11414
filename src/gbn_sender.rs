//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `W` in-flight frames.
//!
//! # Protocol contract
//!
//! - At most `window_size` frames may be in flight at once:
//!   `0 ≤ next_to_send - base ≤ W`.
//! - ACKs are **cumulative**: `ack = K` means the receiver has accepted every
//!   frame up to and including sequence number `K`.
//! - On timeout the caller retransmits **all** frames in `[base, next_to_send)`
//!   (go back to N) without moving either edge.
//! - Sequence numbers are non-wrapping `u64` counters.  Only the low byte is
//!   sent on the wire; [`GbnSender::on_wire_ack`] maps an 8-bit ack back into
//!   the window.
//!
//! This module only manages state; all channel I/O and the timer itself are
//! the caller's responsibility.  Return values tell the caller what to do with
//! the timer.

use std::fmt;

use crate::frame::{Ack, Frame};

/// Wire offsets past this point lie behind the window rather than ahead of
/// it (`W` never exceeds half the 8-bit sequence space).
const STALE_ACK_OFFSET: u64 = 128;

// ---------------------------------------------------------------------------
// SendBuffer
// ---------------------------------------------------------------------------

/// A frame that has been transmitted but not yet covered by an ack.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub seq: u64,
    /// Encoded frame, ready to hand to the channel again.
    pub bytes: Vec<u8>,
    pub payload_len: usize,
    /// Total number of times this frame has been transmitted.
    pub tx_count: u32,
}

/// Fixed-capacity ring of outstanding frames, indexed by `seq % capacity`.
///
/// The window invariant guarantees that live sequence numbers never collide
/// in a slot.
#[derive(Debug)]
pub struct SendBuffer {
    slots: Box<[Option<SendEntry>]>,
    len: usize,
}

impl SendBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }

    fn insert(&mut self, entry: SendEntry) {
        let slot = self.slot(entry.seq);
        debug_assert!(
            self.slots[slot].is_none(),
            "send buffer slot {slot} still holds an unacked frame"
        );
        self.slots[slot] = Some(entry);
        self.len += 1;
    }

    pub fn get(&self, seq: u64) -> Option<&SendEntry> {
        self.slots[self.slot(seq)]
            .as_ref()
            .filter(|entry| entry.seq == seq)
    }

    fn get_mut(&mut self, seq: u64) -> Option<&mut SendEntry> {
        let slot = self.slot(seq);
        self.slots[slot].as_mut().filter(|entry| entry.seq == seq)
    }

    fn remove(&mut self, seq: u64) -> Option<SendEntry> {
        let slot = self.slot(seq);
        match &self.slots[slot] {
            Some(entry) if entry.seq == seq => {
                self.len -= 1;
                self.slots[slot].take()
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the caller must do with the retransmission timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Start the countdown for the (new) oldest outstanding frame.
    Restart,
    /// The window is empty; stop the countdown.
    Cancel,
}

/// A frame accepted into the window by [`GbnSender::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub seq: u64,
    /// Encoded frame to transmit now.
    pub bytes: Vec<u8>,
    /// `true` when the window was empty before this frame, so the timer
    /// must be armed.
    pub arm_timer: bool,
}

/// Result of feeding an ack to [`GbnSender::on_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Ack below `base`: stale or repeated; nothing changes.
    Duplicate,
    /// Ack at or beyond `next_to_send`: cannot come from a correct receiver.
    OutOfRange,
    /// `base` moved forward by `acked` frames.
    Advanced { acked: u64, timer: TimerAction },
}

/// Running counters for diagnostics and the final transfer report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_acked: u64,
    pub bytes_acked: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub duplicate_acks: u64,
}

// ---------------------------------------------------------------------------
// GbnSender
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///      base          next_to_send     base + W
///        │                 │              │
///  ──────┼─────────────────┼──────────────┼──────▶ seq space
///  acked │ <── in flight ─▶│ <─ sendable ▶│
/// ```
#[derive(Debug)]
pub struct GbnSender {
    /// Oldest unacknowledged sequence number (left window edge).
    base: u64,
    /// Sequence number for the next new frame.
    next_to_send: u64,
    window_size: usize,
    buffer: SendBuffer,
    stats: SenderStats,
}

impl GbnSender {
    /// Create a sender with window size `W` starting at sequence number 0.
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 0,
            next_to_send: 0,
            window_size,
            buffer: SendBuffer::with_capacity(window_size),
            stats: SenderStats::default(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn next_to_send(&self) -> u64 {
        self.next_to_send
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of frames awaiting acknowledgement.
    pub fn in_flight(&self) -> u64 {
        self.next_to_send - self.base
    }

    /// `true` when there is room for at least one more in-flight frame.
    pub fn can_send(&self) -> bool {
        self.in_flight() < self.window_size as u64
    }

    pub fn has_unacked(&self) -> bool {
        self.next_to_send != self.base
    }

    pub fn buffer(&self) -> &SendBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Encode `payload` as the next frame and place it in the window.
    ///
    /// Returns `None` without touching any state when the window is full;
    /// the caller is expected to wait for an ack and try again.
    pub fn enqueue(&mut self, payload: &[u8]) -> Option<Enqueued> {
        if !self.can_send() {
            return None;
        }
        let seq = self.next_to_send;
        let arm_timer = !self.has_unacked();
        let bytes = Frame::encode(seq, payload);

        self.buffer.insert(SendEntry {
            seq,
            bytes: bytes.clone(),
            payload_len: payload.len(),
            tx_count: 1,
        });
        self.next_to_send += 1;

        Some(Enqueued {
            seq,
            bytes,
            arm_timer,
        })
    }

    /// Process a cumulative ACK covering everything through `ack`.
    ///
    /// `base` never decreases: acks below it are duplicates and acks at or
    /// beyond `next_to_send` are ignored.
    pub fn on_ack(&mut self, ack: u64) -> AckOutcome {
        if ack < self.base {
            self.stats.duplicate_acks += 1;
            return AckOutcome::Duplicate;
        }
        if ack >= self.next_to_send {
            return AckOutcome::OutOfRange;
        }

        let new_base = ack + 1;
        for seq in self.base..new_base {
            if let Some(entry) = self.buffer.remove(seq) {
                self.stats.frames_acked += 1;
                self.stats.bytes_acked += entry.payload_len as u64;
            }
        }
        let acked = new_base - self.base;
        self.base = new_base;

        let timer = if self.has_unacked() {
            TimerAction::Restart
        } else {
            TimerAction::Cancel
        };
        AckOutcome::Advanced { acked, timer }
    }

    /// Map an 8-bit wire ack onto the window and process it.
    ///
    /// The candidate is the unique `k` in `[base - 1, next_to_send - 1]` whose
    /// low byte matches; `k == base - 1` is a duplicate.  A byte that lands in
    /// the half of the sequence space behind the window is a stale ack and is
    /// counted as a duplicate too.
    pub fn on_wire_ack(&mut self, ack: Ack) -> AckOutcome {
        let below_base = (self.base as u8).wrapping_sub(1);
        let offset = u64::from(ack.0.wrapping_sub(below_base));
        if offset == 0 || offset > STALE_ACK_OFFSET {
            self.stats.duplicate_acks += 1;
            return AckOutcome::Duplicate;
        }
        self.on_ack(self.base + offset - 1)
    }

    /// The Go-Back-N step: every frame in `[base, next_to_send)`, oldest
    /// first, ready to be sent again.
    ///
    /// Neither window edge moves.  The caller re-arms the timer.
    pub fn on_timeout(&mut self) -> Vec<Vec<u8>> {
        self.stats.timeouts += 1;
        let mut frames = Vec::with_capacity(self.in_flight() as usize);
        for seq in self.base..self.next_to_send {
            if let Some(entry) = self.buffer.get_mut(seq) {
                entry.tx_count += 1;
                frames.push(entry.bytes.clone());
            }
        }
        self.stats.retransmissions += frames.len() as u64;
        frames
    }

    /// Diagram of the current window for trace logging.
    pub fn view(&self) -> WindowView {
        WindowView {
            base: self.base,
            next_to_send: self.next_to_send,
            window_size: self.window_size as u64,
        }
    }
}

/// Renders the sender window as `..2 [3 4 _ _]`: frames before the bracket
/// are acknowledged, numbers inside are in flight, `_` are free slots.
#[derive(Debug, Clone, Copy)]
pub struct WindowView {
    base: u64,
    next_to_send: u64,
    window_size: u64,
}

impl fmt::Display for WindowView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.base > 0 {
            write!(f, "..{} ", self.base - 1)?;
        }
        write!(f, "[")?;
        for i in 0..self.window_size {
            if i > 0 {
                write!(f, " ")?;
            }
            let seq = self.base + i;
            if seq < self.next_to_send {
                write!(f, "{seq}")?;
            } else {
                write!(f, "_")?;
            }
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
