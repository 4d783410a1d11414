//! `gbn-arq`: reliable, in-order delivery over a lossy datagram channel
//! using Go-Back-N sliding-window ARQ.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   frames    ┌──────────────┐
//!  │  GbnSender   │────────────▶│ GbnReceiver  │──▶ application sink
//!  │ (window+RTO) │             │ (expected)   │
//!  └──────┬───────┘             └──────┬───────┘
//!         │    cumulative ACKs         │
//!         │◀───────────────────────────┘
//!         │
//!  ┌──────▼─────────────────────────────────┐
//!  │        DatagramChannel (UDP / memory)  │
//!  │   optionally wrapped in LossyChannel   │
//!  └────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]: wire format and integrity checksum
//! - [`gbn_sender`]: send window state machine
//! - [`gbn_receiver`]: in-order receive state machine
//! - [`timer`]: per-connection retransmission alarm
//! - [`gbn_connection`]: sender task and receiver loop over a channel
//! - [`channel`]: datagram channel trait, UDP and in-memory impls
//! - [`simulator`]: fault-injecting channel wrapper
//! - [`registry`]: live connections keyed by id
//! - [`config`]: protocol parameters
//! - [`error`]: error taxonomy

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod gbn_connection;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod registry;
pub mod simulator;
pub mod timer;

pub use channel::{DatagramChannel, MemoryChannel, UdpChannel};
pub use config::GbnConfig;
pub use error::{ChannelError, ConfigError, RecvError, TransferError};
pub use frame::{Ack, CorruptFrame, Frame};
pub use gbn_connection::{run_receiver, spawn_sender, ReceiveReport, SenderHandle, TransferReport};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use simulator::{LossyChannel, SimulatorConfig};
