//! The unreliable datagram channel the ARQ core runs on.
//!
//! [`DatagramChannel`] is the only I/O seam: `send` one datagram, or
//! `recv` one with a bounded wait.  Implementations may drop, delay,
//! duplicate or reorder anything; the protocol assumes nothing stronger.
//!
//! Two implementations live here:
//! - [`UdpChannel`]: a tokio `UdpSocket` bound to a single peer.
//! - [`MemoryChannel`]: an in-process pair for tests and simulation.
//!
//! Fault injection is layered on top by [`crate::simulator::LossyChannel`].

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

use crate::error::{ChannelError, RecvError};

/// Largest datagram accepted from the socket.
const MAX_DATAGRAM: usize = 65_535;

/// A lossy, unordered, message-oriented transport.
///
/// Both methods take `&self` so one channel can be shared by a sending and a
/// receiving activity.  `recv` must be cancel-safe: it is raced against the
/// retransmission timer.
#[async_trait]
pub trait DatagramChannel: Send + Sync {
    async fn send(&self, datagram: &[u8]) -> Result<(), ChannelError>;

    /// Wait at most `wait` for the next datagram.
    async fn recv(&self, wait: Duration) -> Result<Vec<u8>, RecvError>;
}

#[async_trait]
impl<C: DatagramChannel + ?Sized> DatagramChannel for Arc<C> {
    async fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        (**self).send(datagram).await
    }

    async fn recv(&self, wait: Duration) -> Result<Vec<u8>, RecvError> {
        (**self).recv(wait).await
    }
}

// ---------------------------------------------------------------------------
// UdpChannel
// ---------------------------------------------------------------------------

/// A UDP socket talking to exactly one peer.
///
/// The peer is fixed either up front ([`UdpChannel::connect`]) or by the
/// first datagram received ([`UdpChannel::listen`]).  Datagrams from any other
/// address are ignored.
#[derive(Debug)]
pub struct UdpChannel {
    /// Address this socket is bound to (after the OS assigns a port).
    pub local_addr: SocketAddr,
    socket: UdpSocket,
    peer: OnceLock<SocketAddr>,
}

impl UdpChannel {
    /// Bind to `local_addr` and talk to `peer`.
    pub async fn connect(local_addr: SocketAddr, peer: SocketAddr) -> Result<Self, ChannelError> {
        let channel = Self::listen(local_addr).await?;
        let _ = channel.peer.set(peer);
        Ok(channel)
    }

    /// Bind to `local_addr` and adopt whoever sends first as the peer.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn listen(local_addr: SocketAddr) -> Result<Self, ChannelError> {
        let socket = UdpSocket::bind(local_addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            local_addr,
            socket,
            peer: OnceLock::new(),
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }
}

#[async_trait]
impl DatagramChannel for UdpChannel {
    async fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        let peer = self.peer().ok_or(ChannelError::NoPeer)?;
        self.socket.send_to(datagram, peer).await?;
        Ok(())
    }

    async fn recv(&self, wait: Duration) -> Result<Vec<u8>, RecvError> {
        let deadline = Instant::now() + wait;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, addr) = timeout_at(deadline, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| RecvError::Timeout)?
                .map_err(ChannelError::from)?;

            let peer = *self.peer.get_or_init(|| addr);
            if addr != peer {
                log::debug!("[udp] ignoring {n} byte(s) from stranger {addr}");
                continue;
            }
            buf.truncate(n);
            return Ok(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// One end of an in-process, perfectly reliable datagram pipe.
///
/// Dropping one end makes the other end's `send` and `recv` fail with
/// [`ChannelError::Closed`].
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryChannel {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

#[async_trait]
impl DatagramChannel for MemoryChannel {
    async fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self, wait: Duration) -> Result<Vec<u8>, RecvError> {
        let mut rx = self.rx.lock().await;
        match timeout(wait, rx.recv()).await {
            Ok(Some(datagram)) => Ok(datagram),
            Ok(None) => Err(ChannelError::Closed.into()),
            Err(_) => Err(RecvError::Timeout),
        }
    }
}
