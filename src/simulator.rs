//! Fault-injecting channel wrapper for testing and simulation.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! [`LossyChannel`] wraps any [`DatagramChannel`] and applies a configurable
//! fault model to every outbound datagram:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Loss         | Drop with probability `loss_rate`.                   |
//! | Scripted     | Drop the n-th datagram for every n in `drop_nth`.    |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`. |
//! | Duplication  | Deliver twice with probability `duplicate_rate`.     |
//! | Reordering   | Hold back and release after the next datagram.       |
//!
//! All randomness comes from a seeded `StdRng`, so a failing run can be
//! replayed exactly.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::DatagramChannel;
use crate::error::{ChannelError, RecvError};

/// Configuration for the fault-injection model.
///
/// Probabilities are clamped into `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    /// Zero-based indices of outbound datagrams to drop unconditionally.
    pub drop_nth: BTreeSet<u64>,
    pub seed: u64,
}

impl SimulatorConfig {
    /// Drop exactly the datagrams at the given outbound positions.
    pub fn scripted(drop_nth: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drop_nth: drop_nth.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Fault model for the ack direction of a link using `self` for data.
    ///
    /// Acks carry no checksum, so a flipped bit could pass for a valid
    /// cumulative ack and release frames the receiver never got.  Corruption
    /// is therefore switched off; loss, duplication and reordering are kept.
    /// The seed is offset so the two directions draw different faults.
    pub fn ack_path(&self) -> Self {
        Self {
            corrupt_rate: 0.0,
            drop_nth: BTreeSet::new(),
            seed: self.seed.wrapping_add(1),
            ..self.clone()
        }
    }
}

/// How many faults of each kind have been injected so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounters {
    pub offered: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    held: Option<Vec<u8>>,
    counters: FaultCounters,
}

/// A [`DatagramChannel`] that damages its outbound traffic.
#[derive(Debug)]
pub struct LossyChannel<C> {
    inner: C,
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl<C: DatagramChannel> LossyChannel<C> {
    pub fn new(inner: C, mut config: SimulatorConfig) -> Self {
        for rate in [
            &mut config.loss_rate,
            &mut config.corrupt_rate,
            &mut config.duplicate_rate,
            &mut config.reorder_rate,
        ] {
            *rate = rate.clamp(0.0, 1.0);
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            state: Mutex::new(SimState {
                rng,
                held: None,
                counters: FaultCounters::default(),
            }),
        }
    }

    pub fn counters(&self) -> FaultCounters {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
    }

    /// Apply the fault model and return what actually goes on the wire.
    fn shape(&self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let index = state.counters.offered;
        state.counters.offered += 1;

        if self.config.drop_nth.contains(&index) || state.rng.gen_bool(self.config.loss_rate) {
            state.counters.dropped += 1;
            log::debug!("[sim] drop datagram #{index}");
            return Vec::new();
        }

        let mut out = datagram.to_vec();
        if !out.is_empty() && state.rng.gen_bool(self.config.corrupt_rate) {
            let bit = state.rng.gen_range(0..out.len() * 8);
            out[bit / 8] ^= 1 << (bit % 8);
            state.counters.corrupted += 1;
            log::debug!("[sim] corrupt datagram #{index} at bit {bit}");
        }

        let mut wire = vec![out];
        if state.rng.gen_bool(self.config.duplicate_rate) {
            wire.push(wire[0].clone());
            state.counters.duplicated += 1;
            log::debug!("[sim] duplicate datagram #{index}");
        }

        if state.held.is_none() && state.rng.gen_bool(self.config.reorder_rate) {
            state.counters.reordered += 1;
            log::debug!("[sim] hold datagram #{index} for reordering");
            state.held = wire.pop();
            return wire;
        }
        if let Some(held) = state.held.take() {
            wire.push(held);
        }
        wire
    }
}

#[async_trait]
impl<C: DatagramChannel> DatagramChannel for LossyChannel<C> {
    async fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        for out in self.shape(datagram) {
            self.inner.send(&out).await?;
        }
        Ok(())
    }

    async fn recv(&self, wait: Duration) -> Result<Vec<u8>, RecvError> {
        self.inner.recv(wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    const WAIT: Duration = Duration::from_millis(50);

    async fn drain(rx: &MemoryChannel) -> Vec<Vec<u8>> {
        let mut got = Vec::new();
        while let Ok(d) = rx.recv(WAIT).await {
            got.push(d);
        }
        got
    }

    #[tokio::test]
    async fn default_config_is_transparent() {
        let (a, b) = MemoryChannel::pair();
        let lossy = LossyChannel::new(a, SimulatorConfig::default());
        for i in 0..5u8 {
            lossy.send(&[i]).await.unwrap();
        }
        assert_eq!(drain(&b).await, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
        assert_eq!(lossy.counters().offered, 5);
    }

    #[tokio::test]
    async fn scripted_drop_hits_exact_position() {
        let (a, b) = MemoryChannel::pair();
        let lossy = LossyChannel::new(a, SimulatorConfig::scripted([1, 3]));
        for i in 0..5u8 {
            lossy.send(&[i]).await.unwrap();
        }
        assert_eq!(drain(&b).await, vec![vec![0], vec![2], vec![4]]);
        assert_eq!(lossy.counters().dropped, 2);
    }

    #[tokio::test]
    async fn full_loss_delivers_nothing() {
        let (a, b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let lossy = LossyChannel::new(a, config);
        lossy.send(b"gone").await.unwrap();
        assert!(drain(&b).await.is_empty());
    }

    #[tokio::test]
    async fn corruption_flips_exactly_one_bit() {
        let (a, b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            corrupt_rate: 1.0,
            seed: 7,
            ..SimulatorConfig::default()
        };
        let lossy = LossyChannel::new(a, config);
        lossy.send(&[0u8; 16]).await.unwrap();
        let got = drain(&b).await;
        let ones: u32 = got[0].iter().map(|b| b.count_ones()).sum();
        assert_eq!(ones, 1);
    }

    #[tokio::test]
    async fn duplication_sends_twice() {
        let (a, b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let lossy = LossyChannel::new(a, config);
        lossy.send(b"twice").await.unwrap();
        assert_eq!(drain(&b).await.len(), 2);
    }

    #[tokio::test]
    async fn ack_path_never_corrupts() {
        let data_path = SimulatorConfig {
            loss_rate: 0.1,
            corrupt_rate: 1.0,
            duplicate_rate: 0.2,
            seed: 9,
            ..SimulatorConfig::scripted([0])
        };
        let acks = data_path.ack_path();
        assert_eq!(acks.corrupt_rate, 0.0);
        assert_eq!(acks.loss_rate, 0.1);
        assert_eq!(acks.duplicate_rate, 0.2);
        assert!(acks.drop_nth.is_empty());
        assert_ne!(acks.seed, data_path.seed);

        let (a, b) = MemoryChannel::pair();
        let lossy = LossyChannel::new(
            a,
            SimulatorConfig {
                corrupt_rate: 1.0,
                ..SimulatorConfig::default()
            }
            .ack_path(),
        );
        for ack in 0..=255u8 {
            lossy.send(&[ack]).await.unwrap();
        }
        assert_eq!(drain(&b).await, (0..=255u8).map(|a| vec![a]).collect::<Vec<_>>());
        assert_eq!(lossy.counters().corrupted, 0);
    }

    #[tokio::test]
    async fn reordering_swaps_neighbours() {
        let (a, b) = MemoryChannel::pair();
        let config = SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let lossy = LossyChannel::new(a, config);
        lossy.send(b"first").await.unwrap();
        lossy.send(b"second").await.unwrap();
        assert_eq!(drain(&b).await, vec![b"second".to_vec(), b"first".to_vec()]);
    }
}
