//! End-to-end transfers over real UDP sockets on the loopback interface.

use std::time::Duration;

use tokio::sync::mpsc;

use gbn_arq::{
    run_receiver, spawn_sender, GbnConfig, LossyChannel, SimulatorConfig, UdpChannel,
};

/// Bind to an OS-assigned port on loopback.
async fn ephemeral() -> UdpChannel {
    let addr = "127.0.0.1:0".parse().unwrap();
    UdpChannel::listen(addr).await.expect("bind failed")
}

fn config() -> GbnConfig {
    GbnConfig::default()
        .with_window_size(4)
        .with_retransmit_timeout(Duration::from_millis(50))
        .with_max_retries(20)
        .with_idle_timeout(Duration::from_secs(5))
        .with_linger(Duration::from_millis(500))
}

// ---------------------------------------------------------------------------
// Test 1: file-sized transfer over a clean socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_udp_transfer_reassembles_data() {
    let server = ephemeral().await;
    let server_addr = server.local_addr;

    let data: Vec<u8> = (0..5_000u32).map(|i| (i % 253) as u8).collect();
    let (sink, mut rx) = mpsc::channel(8);
    let receiver = tokio::spawn(run_receiver(server, config(), sink));
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    });

    let client = UdpChannel::connect("127.0.0.1:0".parse().unwrap(), server_addr)
        .await
        .expect("bind failed");
    let handle = spawn_sender(client, config()).expect("valid config");
    for chunk in data.chunks(64) {
        handle.enqueue(chunk.to_vec()).await.expect("enqueue");
    }
    let sent = handle.finish().await.expect("finish");

    assert_eq!(sent.frames, data.len().div_ceil(64) as u64);
    assert_eq!(sent.bytes, data.len() as u64);
    let received = receiver.await.unwrap().expect("receive");
    assert_eq!(received.bytes, data.len() as u64);
    assert_eq!(collector.await.unwrap(), data);
}

// ---------------------------------------------------------------------------
// Test 2: lossy sender over UDP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_udp_transfer_survives_loss() {
    let server = ephemeral().await;
    let server_addr = server.local_addr;

    let (sink, mut rx) = mpsc::channel(8);
    let receiver = tokio::spawn(run_receiver(
        server,
        config().with_linger(Duration::from_secs(2)),
        sink,
    ));
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    });

    let client = UdpChannel::connect("127.0.0.1:0".parse().unwrap(), server_addr)
        .await
        .expect("bind failed");
    let faults = SimulatorConfig {
        loss_rate: 0.2,
        seed: 5,
        ..SimulatorConfig::default()
    };
    let handle = spawn_sender(LossyChannel::new(client, faults), config()).expect("valid config");

    let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 32]).collect();
    for payload in &payloads {
        handle.enqueue(payload.clone()).await.expect("enqueue");
    }
    let sent = handle.finish().await.expect("finish");

    assert_eq!(sent.frames, 20);
    assert!(sent.retransmissions > 0);
    receiver.await.unwrap().expect("receive");
    assert_eq!(collector.await.unwrap(), payloads);
}

// ---------------------------------------------------------------------------
// Test 3: connect without a listener
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_udp_sender_aborts_without_receiver() {
    // Bound but never read: datagrams vanish as far as the sender can tell.
    let sink_socket = ephemeral().await;

    let client = UdpChannel::connect("127.0.0.1:0".parse().unwrap(), sink_socket.local_addr)
        .await
        .expect("bind failed");
    let config = config().with_max_retries(2);
    let handle = spawn_sender(client, config).expect("valid config");

    handle.enqueue(b"hello".to_vec()).await.expect("enqueue");
    let err = handle.finish().await.unwrap_err();
    assert!(matches!(
        err,
        gbn_arq::TransferError::TransferAborted { delivered: 0, retries: 3 }
    ));
}
