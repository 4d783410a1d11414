//! Entry point for `gbn-arq`.
//!
//! Parses CLI arguments and dispatches into receive, send or simulate mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing) and the file I/O on either end.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use gbn_arq::{
    run_receiver, spawn_sender, GbnConfig, LossyChannel, MemoryChannel, SimulatorConfig,
    UdpChannel,
};

/// Go-Back-N reliable transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive one file and write it to disk.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Where to write the received bytes.
        #[arg(short, long)]
        out: String,
        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Send one file to a receiver.
    Send {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Receiver address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// File to transfer.
        #[arg(short, long)]
        file: String,
        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Run both ends in-process over a simulated lossy link.
    Simulate {
        /// Number of data frames to transfer.
        #[arg(long, default_value_t = 100)]
        frames: usize,
        /// Probability of dropping a datagram.
        #[arg(long, default_value_t = 0.1)]
        loss: f64,
        /// Probability of flipping one bit in a data frame.  Acks travel
        /// uncorrupted: they carry no checksum.  Loss, duplication and
        /// reordering apply in both directions.
        #[arg(long, default_value_t = 0.05)]
        corrupt: f64,
        /// Probability of delivering a datagram twice.
        #[arg(long, default_value_t = 0.05)]
        duplicate: f64,
        /// Probability of swapping a datagram with its successor.
        #[arg(long, default_value_t = 0.05)]
        reorder: f64,
        /// RNG seed for reproducible runs.
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[command(flatten)]
        protocol: ProtocolArgs,
    },
}

/// Protocol parameters shared by every mode.
#[derive(Args)]
struct ProtocolArgs {
    /// Go-Back-N window size.
    #[arg(short, long, default_value_t = 4)]
    window: usize,
    /// Largest payload per frame in bytes.
    #[arg(long, default_value_t = 64)]
    payload: usize,
    /// Base retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 200)]
    timeout_ms: u64,
    /// Consecutive timeouts tolerated before aborting.
    #[arg(long, default_value_t = 8)]
    retries: u32,
}

impl ProtocolArgs {
    fn config(&self) -> GbnConfig {
        GbnConfig::default()
            .with_window_size(self.window)
            .with_max_payload(self.payload)
            .with_retransmit_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.retries)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Recv {
            bind,
            out,
            protocol,
        } => receive_file(bind, &out, protocol.config()).await,
        Mode::Send {
            bind,
            peer,
            file,
            protocol,
        } => send_file(bind, peer, &file, protocol.config()).await,
        Mode::Simulate {
            frames,
            loss,
            corrupt,
            duplicate,
            reorder,
            seed,
            protocol,
        } => {
            let faults = SimulatorConfig {
                loss_rate: loss,
                corrupt_rate: corrupt,
                duplicate_rate: duplicate,
                reorder_rate: reorder,
                seed,
                ..SimulatorConfig::default()
            };
            simulate(frames, faults, protocol.config()).await
        }
    }
}

async fn receive_file(bind: SocketAddr, out: &str, config: GbnConfig) -> Result<()> {
    let channel = UdpChannel::listen(bind).await?;
    log::info!("Receiving on {} into {out}", channel.local_addr);

    let mut file = tokio::fs::File::create(out)
        .await
        .with_context(|| format!("creating {out}"))?;
    let (sink, mut chunks) = mpsc::channel::<Vec<u8>>(config.window_size);

    let receiver = tokio::spawn(run_receiver(channel, config, sink));
    while let Some(chunk) = chunks.recv().await {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let report = receiver.await??;
    println!(
        "received {} frame(s), {} byte(s); {} duplicate(s), {} corrupt",
        report.frames, report.bytes, report.duplicates, report.corrupt
    );
    Ok(())
}

async fn send_file(bind: SocketAddr, peer: SocketAddr, path: &str, config: GbnConfig) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {path}"))?;
    let channel = UdpChannel::connect(bind, peer).await?;
    log::info!("Sending {path} ({} bytes) to {peer}", data.len());

    let chunk_size = config.max_payload;
    let sender = spawn_sender(channel, config)?;
    for chunk in data.chunks(chunk_size) {
        sender.enqueue(chunk.to_vec()).await?;
    }
    let report = sender.finish().await?;
    println!(
        "sent {} frame(s), {} byte(s); {} retransmission(s), {} duplicate ack(s)",
        report.frames, report.bytes, report.retransmissions, report.duplicate_acks
    );
    Ok(())
}

async fn simulate(frames: usize, faults: SimulatorConfig, config: GbnConfig) -> Result<()> {
    let (a, b) = MemoryChannel::pair();
    let reverse = faults.ack_path();
    let sender_side = LossyChannel::new(a, faults);
    let receiver_side = LossyChannel::new(b, reverse);

    let (sink, mut delivered) = mpsc::channel::<Vec<u8>>(config.window_size);
    let receiver = tokio::spawn(run_receiver(receiver_side, config.clone(), sink));

    let payload_len = config.max_payload;
    let sender = spawn_sender(sender_side, config)?;
    let producer = tokio::spawn(async move {
        for i in 0..frames {
            let payload = vec![(i % 251) as u8; payload_len];
            sender.enqueue(payload).await?;
        }
        sender.finish().await
    });

    let mut count = 0usize;
    while let Some(chunk) = delivered.recv().await {
        anyhow::ensure!(
            chunk.iter().all(|&b| b == (count % 251) as u8),
            "frame {count} delivered out of order"
        );
        count += 1;
    }

    let sent = producer.await??;
    let received = receiver.await??;
    println!("sender:   {sent:?}");
    println!("receiver: {received:?}");
    anyhow::ensure!(count == frames, "delivered {count} of {frames} frame(s)");
    Ok(())
}
