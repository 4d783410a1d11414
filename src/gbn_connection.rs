//! Go-Back-N sessions: the sender actor and the receiver loop.
//!
//! # Architecture
//!
//! ```text
//!  Application                       sender task (one per connection)
//!      │ enqueue(payload)            ┌──────────────────────────────┐
//!      │ finish() / cancel()         │  GbnSender   (window state)  │
//!      ▼                             │  RetransmitTimer             │
//!  SenderHandle ── mpsc commands ──▶ │  select! { cmd | ack | timer │
//!                                    │            | cancel }        │
//!                                    └──────────────┬───────────────┘
//!                                                   │ DatagramChannel
//!                                    ┌──────────────▼───────────────┐
//!  sink (mpsc) ◀── in-order payload ─│  run_receiver (GbnReceiver)  │
//!                                    └──────────────────────────────┘
//! ```
//!
//! All window and timer state lives inside a single task, so the enqueue,
//! ack and timeout paths are serialised without locks.  Commands are only
//! pulled from the queue while the window has room, which makes
//! [`SenderHandle::enqueue`] block under a full window.
//!
//! A frame with an empty payload marks end of stream.  The receiver keeps
//! re-acking for [`GbnConfig::linger`] after delivering it, so a lost final
//! ack is recovered by the sender's normal retransmission.

use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;

use crate::channel::DatagramChannel;
use crate::config::GbnConfig;
use crate::error::{ConfigError, RecvError, TransferError};
use crate::frame::Ack;
use crate::gbn_receiver::{FrameOutcome, GbnReceiver};
use crate::gbn_sender::{AckOutcome, GbnSender, TimerAction};
use crate::timer::RetransmitTimer;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of a completed send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Data frames acknowledged (end-of-stream marker excluded).
    pub frames: u64,
    pub bytes: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub duplicate_acks: u64,
}

/// Summary of a completed receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Data frames delivered to the sink (end-of-stream marker excluded).
    pub frames: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub corrupt: u64,
}

// ---------------------------------------------------------------------------
// SenderHandle
// ---------------------------------------------------------------------------

enum Command {
    Enqueue {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<u64, TransferError>>,
    },
    Finish {
        reply: oneshot::Sender<Result<TransferReport, TransferError>>,
    },
}

/// Cloneable handle to a running sender task.
#[derive(Debug, Clone)]
pub struct SenderHandle {
    commands: mpsc::Sender<Command>,
    cancel: Arc<Notify>,
    /// Set once by the task when it stops; explains later failures.
    outcome: Arc<OnceLock<TransferError>>,
    max_payload: usize,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Enqueue { payload, .. } => write!(f, "Enqueue({} bytes)", payload.len()),
            Command::Finish { .. } => write!(f, "Finish"),
        }
    }
}

/// Start the sender task for one connection over `channel`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_sender<C>(channel: C, config: GbnConfig) -> Result<SenderHandle, ConfigError>
where
    C: DatagramChannel + 'static,
{
    config.validate()?;

    // Capacity 1: the command itself is the only thing parked while the
    // window is full; further callers wait in `send`.
    let (commands_tx, commands_rx) = mpsc::channel(1);
    let cancel = Arc::new(Notify::new());
    let outcome = Arc::new(OnceLock::new());

    let handle = SenderHandle {
        commands: commands_tx,
        cancel: cancel.clone(),
        outcome: outcome.clone(),
        max_payload: config.max_payload,
    };

    let task = SenderTask {
        window: GbnSender::new(config.window_size),
        timer: RetransmitTimer::new(&config),
        channel,
        config,
        commands: commands_rx,
        cancel,
        retries: 0,
        eos_seq: None,
        finishing: None,
    };
    tokio::spawn(task.run(outcome));

    Ok(handle)
}

impl SenderHandle {
    /// Transmit `payload` as the next frame.
    ///
    /// Resolves with the frame's sequence number once it has been sent and
    /// stored in the window.  Blocks while the window is full.
    pub async fn enqueue(&self, payload: Vec<u8>) -> Result<u64, TransferError> {
        if payload.is_empty() {
            return Err(TransferError::EmptyPayload);
        }
        if payload.len() > self.max_payload {
            return Err(TransferError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload,
            });
        }
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Enqueue { payload, reply })
            .await
            .is_err()
        {
            return Err(self.terminal_error());
        }
        rx.await.unwrap_or_else(|_| Err(self.terminal_error()))
    }

    /// Send the end-of-stream marker and wait until every frame is acked.
    pub async fn finish(&self) -> Result<TransferReport, TransferError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Finish { reply }).await.is_err() {
            return Err(self.terminal_error());
        }
        rx.await.unwrap_or_else(|_| Err(self.terminal_error()))
    }

    /// Stop the task, release its timer and fail every pending call.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// `true` once the task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn terminal_error(&self) -> TransferError {
        self.outcome
            .get()
            .cloned()
            .unwrap_or(TransferError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Sender task
// ---------------------------------------------------------------------------

struct SenderTask<C> {
    window: GbnSender,
    timer: RetransmitTimer,
    channel: C,
    config: GbnConfig,
    commands: mpsc::Receiver<Command>,
    cancel: Arc<Notify>,
    /// Consecutive timeouts without progress.
    retries: u32,
    /// Sequence number of the end-of-stream marker once sent.
    eos_seq: Option<u64>,
    finishing: Option<oneshot::Sender<Result<TransferReport, TransferError>>>,
}

impl<C: DatagramChannel> SenderTask<C> {
    async fn run(mut self, outcome: Arc<OnceLock<TransferError>>) {
        log::info!(
            "[gbn:send] session start window={} max_payload={} rto={:?}",
            self.config.window_size,
            self.config.max_payload,
            self.config.retransmit_timeout
        );
        match self.event_loop().await {
            Ok(Some(report)) => {
                log::info!(
                    "[gbn:send] complete frames={} bytes={} retransmissions={} dup_acks={}",
                    report.frames,
                    report.bytes,
                    report.retransmissions,
                    report.duplicate_acks
                );
                let _ = outcome.set(TransferError::Finished);
                if let Some(reply) = self.finishing.take() {
                    let _ = reply.send(Ok(report));
                }
            }
            Ok(None) => {
                let _ = outcome.set(TransferError::Cancelled);
                if let Some(reply) = self.finishing.take() {
                    let _ = reply.send(Err(TransferError::Cancelled));
                }
            }
            Err(err) => {
                log::warn!("[gbn:send] session failed: {err}");
                let _ = outcome.set(err.clone());
                if let Some(reply) = self.finishing.take() {
                    let _ = reply.send(Err(err));
                }
            }
        }
        self.timer.cancel();
        // Dropping `self.commands` here fails every caller still waiting.
    }

    /// Runs until the stream is fully acked (`Some`), the connection is
    /// cancelled or abandoned (`None`), or a fatal error occurs.
    async fn event_loop(&mut self) -> Result<Option<TransferReport>, TransferError> {
        loop {
            if self.finishing.is_some() && !self.window.has_unacked() {
                return Ok(Some(self.report()));
            }

            let accepting = self.window.can_send() && self.eos_seq.is_none();

            tokio::select! {
                // Cancellation first, then acks ahead of the timer so a
                // just-arrived ack suppresses a pointless retransmission.
                biased;

                _ = self.cancel.notified() => {
                    log::info!("[gbn:send] cancelled at {}", self.window.view());
                    return Ok(None);
                }

                result = self.channel.recv(self.config.idle_timeout) => match result {
                    Ok(datagram) => self.on_datagram(&datagram),
                    Err(RecvError::Timeout) => {}
                    Err(RecvError::Channel(err)) => return Err(err.into()),
                },

                _ = self.timer.expired(), if self.timer.is_armed() => {
                    self.on_timeout().await?;
                }

                // New data only while the window has room (backpressure).
                command = self.commands.recv(), if accepting => match command {
                    Some(Command::Enqueue { payload, reply }) => {
                        match self.transmit(&payload).await {
                            Ok(seq) => {
                                let _ = reply.send(Ok(seq));
                            }
                            Err(err) => {
                                let _ = reply.send(Err(err.clone()));
                                return Err(err);
                            }
                        }
                    }
                    Some(Command::Finish { reply }) => {
                        self.finishing = Some(reply);
                        let seq = self.transmit(&[]).await?;
                        self.eos_seq = Some(seq);
                        log::debug!("[gbn:send] → EOS seq={seq}");
                    }
                    None => {
                        log::info!("[gbn:send] all handles dropped; abandoning session");
                        return Ok(None);
                    }
                },
            }
        }
    }

    async fn transmit(&mut self, payload: &[u8]) -> Result<u64, TransferError> {
        // Commands are only taken while the window has room.
        let Some(enqueued) = self.window.enqueue(payload) else {
            log::error!("[gbn:send] frame offered to a full window at {}", self.window.view());
            return Err(TransferError::WindowFull);
        };
        self.channel.send(&enqueued.bytes).await?;
        if enqueued.arm_timer {
            self.timer.arm();
        }
        log::debug!(
            "[gbn:send] → DATA seq={} len={} in_flight={}",
            enqueued.seq,
            payload.len(),
            self.window.in_flight()
        );
        log::trace!("[gbn:send] window {}", self.window.view());
        Ok(enqueued.seq)
    }

    fn on_datagram(&mut self, datagram: &[u8]) {
        let Some(ack) = Ack::decode(datagram) else {
            log::debug!("[gbn:send] ignoring {}-byte datagram (not an ack)", datagram.len());
            return;
        };

        match self.window.on_wire_ack(ack) {
            AckOutcome::Advanced { acked, timer } => {
                self.retries = 0;
                self.timer.reset_backoff();
                match timer {
                    TimerAction::Restart => self.timer.arm(),
                    TimerAction::Cancel => self.timer.cancel(),
                }
                log::debug!(
                    "[gbn:send] ← ACK {} slid={} base={}",
                    ack.0,
                    acked,
                    self.window.base()
                );
                log::trace!("[gbn:send] window {}", self.window.view());
            }
            AckOutcome::Duplicate => {
                log::debug!("[gbn:send] ← duplicate ACK {}", ack.0);
            }
            AckOutcome::OutOfRange => {
                log::debug!("[gbn:send] ← ACK {} outside window, ignored", ack.0);
            }
        }
    }

    /// Go back N: resend the whole outstanding window and re-arm.
    async fn on_timeout(&mut self) -> Result<(), TransferError> {
        self.retries += 1;
        if self.retries > self.config.max_retries {
            return Err(TransferError::TransferAborted {
                delivered: self.delivered(),
                retries: self.retries,
            });
        }

        let frames = self.window.on_timeout();
        log::warn!(
            "[gbn:send] timeout after {:?} (attempt {}), retransmitting {} frame(s) from seq {}",
            self.timer.current_rto(),
            self.retries,
            frames.len(),
            self.window.base()
        );
        for frame in &frames {
            self.channel.send(frame).await?;
        }
        self.timer.back_off();
        self.timer.arm();
        Ok(())
    }

    /// Data frames acknowledged so far.
    fn delivered(&self) -> u64 {
        let acked = self.window.stats().frames_acked;
        match self.eos_seq {
            Some(eos) if eos < self.window.base() => acked - 1,
            _ => acked,
        }
    }

    fn report(&self) -> TransferReport {
        let stats = self.window.stats();
        TransferReport {
            frames: self.delivered(),
            bytes: stats.bytes_acked,
            retransmissions: stats.retransmissions,
            timeouts: stats.timeouts,
            duplicate_acks: stats.duplicate_acks,
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver loop
// ---------------------------------------------------------------------------

/// Receive one stream from `channel`, delivering payloads to `sink` in order.
///
/// Returns once the end-of-stream marker has been delivered and the linger
/// period has passed.  Every wait is bounded by [`GbnConfig::idle_timeout`].
pub async fn run_receiver<C>(
    channel: C,
    config: GbnConfig,
    sink: mpsc::Sender<Vec<u8>>,
) -> Result<ReceiveReport, TransferError>
where
    C: DatagramChannel,
{
    config.validate()?;
    let mut receiver = GbnReceiver::new();
    log::info!("[gbn:recv] session start");

    loop {
        let datagram = match channel.recv(config.idle_timeout).await {
            Ok(datagram) => datagram,
            Err(RecvError::Timeout) => {
                let delivered = receiver.stats().frames_delivered;
                log::warn!("[gbn:recv] idle for {:?}; giving up", config.idle_timeout);
                return Err(TransferError::Idle { delivered });
            }
            Err(RecvError::Channel(err)) => return Err(err.into()),
        };

        match receiver.on_frame(&datagram) {
            FrameOutcome::Corrupt(reason) => {
                log::debug!("[gbn:recv] dropping corrupt frame: {reason}");
            }
            FrameOutcome::Delivered { seq, payload, ack } => {
                if payload.is_empty() {
                    channel.send(&ack.encode()).await?;
                    log::debug!("[gbn:recv] ← EOS seq={seq}; → ACK {}", ack.0);
                    break;
                }
                let len = payload.len();
                if sink.send(payload).await.is_err() {
                    return Err(TransferError::Cancelled);
                }
                channel.send(&ack.encode()).await?;
                log::debug!("[gbn:recv] ← DATA seq={seq} len={len}; → ACK {}", ack.0);
                log::trace!(
                    "[gbn:recv] window {}",
                    receiver.view(config.window_size)
                );
            }
            FrameOutcome::Duplicate { ack } => {
                channel.send(&ack.encode()).await?;
                log::debug!("[gbn:recv] ← out-of-order/duplicate; → ACK {}", ack.0);
            }
        }
    }

    linger(&channel, &config, &mut receiver).await;

    let stats = receiver.stats();
    let report = ReceiveReport {
        frames: stats.frames_delivered.saturating_sub(1),
        bytes: stats.bytes_delivered,
        duplicates: stats.duplicates,
        corrupt: stats.corrupt,
    };
    log::info!(
        "[gbn:recv] complete frames={} bytes={} duplicates={} corrupt={}",
        report.frames,
        report.bytes,
        report.duplicates,
        report.corrupt
    );
    Ok(report)
}

/// Keep answering retransmissions so the sender sees the final ack.
async fn linger<C: DatagramChannel>(channel: &C, config: &GbnConfig, receiver: &mut GbnReceiver) {
    let deadline = Instant::now() + config.linger;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match channel.recv(remaining).await {
            Ok(datagram) => {
                if let Some(ack) = receiver.on_frame(&datagram).ack() {
                    if channel.send(&ack.encode()).await.is_err() {
                        return;
                    }
                    log::debug!("[gbn:recv] linger → ACK {}", ack.0);
                }
            }
            Err(_) => return,
        }
    }
}
