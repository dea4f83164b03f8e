//! End-to-end tests over loopback: endpoints talking to each other, and a raw
//! socket injecting lost, duplicated and corrupted shard datagrams.

use {
    assert_matches::assert_matches,
    rand::{rngs::StdRng, RngCore, SeedableRng},
    parking_lot::Mutex,
    std::{net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        net::UdpSocket,
        sync::mpsc::{unbounded_channel, UnboundedReceiver},
        time::{sleep, timeout},
    },
    trv1_fec_transport::{
        erasure::ErasureCodec,
        fragment::{Fragment, SenderId},
        Endpoint, Message, MessageHandler, TransportConfig, TransportError, TransportMetrics,
    },
    trv1_monitoring::prometheus,
};

const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn start_endpoint() -> (Endpoint, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded_channel();
    let handler: MessageHandler = Arc::new(move |message| {
        let _ = tx.send(message);
    });
    let endpoint = Endpoint::start(
        TransportConfig::dev_default(),
        handler,
        Arc::new(TransportMetrics::new()),
    )
    .await
    .unwrap();
    (endpoint, rx)
}

fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut payload);
    payload
}

/// Sends hand-built shard datagrams, bypassing `Endpoint::send`.
struct RawSender {
    socket: UdpSocket,
    sender: SenderId,
    codec: ErasureCodec,
}

impl RawSender {
    async fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = SenderId::from(socket.local_addr().unwrap());
        Self {
            socket,
            sender,
            codec: ErasureCodec::new(3, 9).unwrap(),
        }
    }

    fn datagrams(&self, payload: &[u8], logical_id: u32) -> Vec<Vec<u8>> {
        self.codec
            .encode_payload(payload)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(index, shard)| {
                Fragment {
                    sender: self.sender,
                    logical_id,
                    index: index as u8,
                    shard,
                }
                .to_datagram()
            })
            .collect()
    }

    async fn send(&self, datagram: &[u8], to: SocketAddr) {
        self.socket.send_to(datagram, to).await.unwrap();
    }
}

async fn next_message(rx: &mut UnboundedReceiver<Message>) -> Message {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("handler dropped")
}

async fn assert_no_message(rx: &mut UnboundedReceiver<Message>, within: Duration) {
    if let Ok(Some(message)) = timeout(within, rx.recv()).await {
        panic!("unexpected delivery: {message:?}");
    }
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let result = timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_two_endpoints_exchange_messages() {
    init_logging();
    let (alice, mut alice_rx) = start_endpoint().await;
    let (bob, mut bob_rx) = start_endpoint().await;

    let to_bob = random_payload(1_000, 1);
    let id = alice.send(&to_bob, bob.local_addr()).await.unwrap();
    let received = next_message(&mut bob_rx).await;
    assert_eq!(received.payload, to_bob);
    assert_eq!(received.logical_id, id);
    assert_eq!(received.sender, alice.sender_id());

    let to_alice = random_payload(17, 2);
    bob.send(&to_alice, alice.local_addr()).await.unwrap();
    assert_eq!(next_message(&mut alice_rx).await.payload, to_alice);

    assert_eq!(alice.metrics().messages_sent.get(), 1);
    wait_for("bob to count the delivery", || {
        bob.metrics().messages_delivered.get() == 1
    })
    .await;

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn test_message_size_boundary() {
    init_logging();
    let (alice, _alice_rx) = start_endpoint().await;
    let (bob, mut bob_rx) = start_endpoint().await;

    let too_big = random_payload(3_073, 3);
    assert_matches!(
        alice.send(&too_big, bob.local_addr()).await,
        Err(TransportError::PayloadTooLarge { size: 3_073, max: 3_072 })
    );
    assert_eq!(alice.metrics().datagrams_sent.get(), 0);

    let largest = random_payload(3_072, 4);
    alice.send(&largest, bob.local_addr()).await.unwrap();
    assert_eq!(alice.metrics().datagrams_sent.get(), 9);
    assert_eq!(next_message(&mut bob_rx).await.payload, largest);
}

#[tokio::test]
async fn test_any_three_of_nine_shards_suffice() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let raw = RawSender::new().await;

    for (logical_id, subset) in [[0, 1, 2], [6, 7, 8], [0, 4, 8], [8, 3, 5]].iter().enumerate() {
        let payload = random_payload(500, logical_id as u64);
        let datagrams = raw.datagrams(&payload, logical_id as u32);
        for index in subset {
            raw.send(&datagrams[*index], endpoint.local_addr()).await;
        }
        let message = next_message(&mut rx).await;
        assert_eq!(message.logical_id, logical_id as u32);
        assert_eq!(message.sender, raw.sender);
        assert_eq!(message.payload, payload);
    }
}

#[tokio::test]
async fn test_too_few_shards_are_evicted() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let raw = RawSender::new().await;

    let datagrams = raw.datagrams(&random_payload(200, 5), 77);
    raw.send(&datagrams[1], endpoint.local_addr()).await;
    raw.send(&datagrams[7], endpoint.local_addr()).await;

    let metrics = endpoint.metrics().clone();
    wait_for("the partial bundle to be evicted", || {
        metrics.bundles_evicted.get() == 1
    })
    .await;
    assert_eq!(metrics.bundles_in_flight.get(), 0);

    // the missing shard arriving now is late, not a resurrection
    raw.send(&datagrams[4], endpoint.local_addr()).await;
    wait_for("the late shard", || metrics.late_fragments.get() == 1).await;
    assert_no_message(&mut rx, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_corrupted_shard_is_filtered() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let raw = RawSender::new().await;

    let payload = random_payload(67, 6);
    let mut datagrams = raw.datagrams(&payload, 4);
    let corrupt_at = datagrams[4].len() / 2;
    datagrams[4][corrupt_at] ^= 0x20;

    for index in [4, 5, 6] {
        raw.send(&datagrams[index], endpoint.local_addr()).await;
    }
    let metrics = endpoint.metrics().clone();
    wait_for("the corrupted shard to be rejected", || {
        metrics.checksum_failures.get() == 1 && metrics.fragments_accepted.get() == 2
    })
    .await;
    assert_no_message(&mut rx, Duration::from_millis(50)).await;

    raw.send(&datagrams[7], endpoint.local_addr()).await;
    assert_eq!(next_message(&mut rx).await.payload, payload);
    assert_eq!(metrics.decode_failures.get(), 0);
}

#[test]
fn test_corrupted_shard_defeats_the_codec_alone() {
    let codec = ErasureCodec::new(3, 9).unwrap();
    let payload = random_payload(67, 6);
    let shards = codec.encode_payload(&payload).unwrap();

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; 9];
    for index in [5, 6] {
        slots[index] = Some(shards[index].clone());
    }
    assert_matches!(
        codec.decode_payload(slots.clone()),
        Err(TransportError::TooFewShards { present: 2, required: 3 })
    );

    let mut corrupted = shards[4].clone();
    corrupted[0] ^= 0x20;
    slots[4] = Some(corrupted);
    assert_ne!(codec.decode_payload(slots).ok(), Some(payload));
}

#[tokio::test]
async fn test_duplicate_datagrams_deliver_once() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let raw = RawSender::new().await;

    let payload = random_payload(321, 7);
    let datagrams = raw.datagrams(&payload, 0);
    for _ in 0..2 {
        for datagram in &datagrams {
            raw.send(datagram, endpoint.local_addr()).await;
        }
    }

    assert_eq!(next_message(&mut rx).await.payload, payload);
    let metrics = endpoint.metrics().clone();
    wait_for("every datagram to be processed", || {
        metrics.datagrams_received.get() == 18
    })
    .await;
    assert_no_message(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(metrics.messages_completed.get(), 1);
}

#[tokio::test]
async fn test_senders_sharing_a_logical_id() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let (first, second) = (RawSender::new().await, RawSender::new().await);

    let (a, b) = (random_payload(40, 8), random_payload(81, 9));
    let (datagrams_a, datagrams_b) = (first.datagrams(&a, 1234), second.datagrams(&b, 1234));
    for index in 0..3 {
        first.send(&datagrams_a[index], endpoint.local_addr()).await;
        second.send(&datagrams_b[index], endpoint.local_addr()).await;
    }

    let mut received = vec![next_message(&mut rx).await, next_message(&mut rx).await];
    received.sort_by_key(|message| message.sender != first.sender);
    assert_eq!(received[0].sender, first.sender);
    assert_eq!(received[0].payload, a);
    assert_eq!(received[1].sender, second.sender);
    assert_eq!(received[1].payload, b);
}

#[tokio::test]
async fn test_garbage_datagrams_are_counted() {
    init_logging();
    let (endpoint, mut rx) = start_endpoint().await;
    let raw = RawSender::new().await;

    raw.send(b"short", endpoint.local_addr()).await;
    raw.send(&[0u8; 64], endpoint.local_addr()).await;
    let metrics = endpoint.metrics().clone();
    wait_for("garbage to be rejected", || {
        metrics.checksum_failures.get() == 2
    })
    .await;
    assert_no_message(&mut rx, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_unsendable_destination_fails_every_shard() {
    init_logging();
    let (alice, _alice_rx) = start_endpoint().await;

    // the socket has no broadcast permission, so every send_to is refused
    assert_matches!(
        alice.send(b"x", "255.255.255.255:9").await,
        Err(TransportError::SendFailed { failed: 9, total: 9, required: 3 })
    );
    assert_eq!(alice.metrics().send_failures.get(), 9);
    assert_eq!(alice.metrics().datagrams_sent.get(), 0);
    assert_eq!(alice.metrics().messages_sent.get(), 0);
}

#[tokio::test]
async fn test_blocked_handler_does_not_stall_reception() {
    init_logging();
    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    let gate = Mutex::new(gate_rx);
    let (tx, mut rx) = unbounded_channel();
    let handler: MessageHandler = Arc::new(move |message| {
        let _ = gate.lock().recv_timeout(WAIT);
        let _ = tx.send(message);
    });
    let bob = Endpoint::start(
        TransportConfig::dev_default(),
        handler,
        Arc::new(TransportMetrics::new()),
    )
    .await
    .unwrap();
    let (alice, _alice_rx) = start_endpoint().await;

    alice.send(b"first", bob.local_addr()).await.unwrap();
    alice.send(b"second", bob.local_addr()).await.unwrap();
    let metrics = bob.metrics().clone();
    wait_for("both messages to complete behind the handler", || {
        metrics.messages_completed.get() == 2
    })
    .await;
    assert_eq!(metrics.messages_delivered.get(), 0);

    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    assert_eq!(next_message(&mut rx).await.payload, b"first");
    assert_eq!(next_message(&mut rx).await.payload, b"second");
    bob.stop().await;
}

#[tokio::test]
async fn test_stop_ends_delivery() {
    init_logging();
    let (alice, _alice_rx) = start_endpoint().await;
    let (bob, mut bob_rx) = start_endpoint().await;

    timeout(WAIT, bob.stop()).await.unwrap();
    assert_matches!(
        bob.send(b"after stop", alice.local_addr()).await,
        Err(TransportError::Stopped)
    );

    alice.send(b"anyone there?", bob.local_addr()).await.unwrap();
    // the handler is dropped with the delivery task, closing the channel
    assert_matches!(timeout(WAIT, bob_rx.recv()).await, Ok(None));
}

#[tokio::test]
async fn test_metrics_export() {
    init_logging();
    let (alice, _alice_rx) = start_endpoint().await;
    let (bob, mut bob_rx) = start_endpoint().await;
    alice.send(b"metrics", bob.local_addr()).await.unwrap();
    next_message(&mut bob_rx).await;

    let snapshot = bob.metrics().snapshot();
    assert_eq!(snapshot.counter("fec_messages_completed_total"), Some(1));
    let text = prometheus::encode(&snapshot);
    for family in [
        "fec_datagrams_received_total",
        "fec_checksum_failures_total",
        "fec_bundles_evicted_total",
        "fec_bundles_in_flight",
        "fec_reassembly_time_ms_count",
    ] {
        assert!(text.contains(family), "missing {family} in\n{text}");
    }
}
