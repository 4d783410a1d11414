//! Error taxonomy for the ARQ core.
//!
//! Frame corruption is not here: [`crate::frame::CorruptFrame`] never leaves
//! the receiver, which drops the frame and lets the sender time out.
//! Duplicate and out-of-order frames are not errors at all.

use std::sync::Arc;

use thiserror::Error;

/// Failure of the underlying datagram primitive itself.
///
/// Cloneable so one failure can be reported to every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    #[error("channel closed by peer")]
    Closed,
    #[error("no peer address known yet")]
    NoPeer,
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io(Arc::new(err))
    }
}

/// Outcome of a bounded receive that produced no datagram.
#[derive(Debug, Clone, Error)]
pub enum RecvError {
    #[error("receive timed out")]
    Timeout,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Rejected [`crate::config::GbnConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("window size {0} outside 1..={max}", max = crate::config::MAX_WINDOW)]
    WindowSize(usize),
    #[error("max payload {0} outside 1..={max}", max = crate::config::MAX_PAYLOAD_LIMIT)]
    MaxPayload(usize),
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
    #[error("max retransmit timeout is below the base timeout")]
    TimeoutOrder,
}

/// Connection-level failures surfaced to the application.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// Consecutive timeouts exceeded the retry budget.
    #[error("transfer aborted after {retries} consecutive timeouts; {delivered} frame(s) delivered")]
    TransferAborted { delivered: u64, retries: u32 },
    /// The receiver saw nothing from the sender for too long.
    #[error("no frame received within the idle timeout; {delivered} frame(s) delivered")]
    Idle { delivered: u64 },
    #[error("payload of {len} bytes exceeds max payload of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("empty payloads are reserved for end of stream")]
    EmptyPayload,
    #[error("connection cancelled")]
    Cancelled,
    #[error("connection already finished")]
    Finished,
    /// A frame reached the sender task while its window had no room.
    #[error("send window full")]
    WindowFull,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
