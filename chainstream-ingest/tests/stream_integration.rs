//! Server ↔ consumer round trips over a real socket.
//!
//! These tests boot the streaming server over an in-memory store, connect
//! the consumer library against it, and verify the protocol end to end:
//! batch alignment filtering, the `from=0` rule, and live tip delivery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainstream_core::NormalizedBlock;
use chainstream_client::{BlockHandler, ClientOptions, StreamClient};
use chainstream_ingest::server::{ServerState, serve};
use chainstream_ingest::store::{BlockStore, MemoryStore};
use common::{block_payload, compressed_batch};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Collects delivered block numbers.
#[derive(Debug, Default)]
struct Collector {
    numbers: parking_lot::Mutex<Vec<u64>>,
}

impl Collector {
    fn snapshot(&self) -> Vec<u64> {
        self.numbers.lock().clone()
    }
}

#[async_trait]
impl BlockHandler for Collector {
    async fn handle(
        &self,
        blocks: Vec<NormalizedBlock>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut numbers = self.numbers.lock();
        for block in blocks {
            numbers.push(block.number()?);
        }
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    url: String,
    cancel: CancellationToken,
}

async fn start_server() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let state = ServerState::new(
        Arc::clone(&store) as Arc<dyn BlockStore>,
        "testnet",
        cancel.child_token(),
    )
    .expect("server state");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(serve(listener, state));

    Harness {
        store,
        url: format!("ws://{addr}"),
        cancel,
    }
}

async fn wait_for_count(collector: &Collector, count: usize) -> Vec<u64> {
    timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = collector.snapshot();
            if snapshot.len() >= count {
                return snapshot;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("expected block count within deadline")
}

#[tokio::test]
async fn subscriber_inside_a_batch_gets_filtered_contiguous_blocks() {
    let harness = start_server().await;
    harness
        .store
        .save_batch(100, 199, &compressed_batch(100..=199))
        .await
        .expect("seed batch");
    harness
        .store
        .save_batch(200, 299, &compressed_batch(200..=299))
        .await
        .expect("seed batch");

    let client = Arc::new(
        StreamClient::new(&harness.url, 150, ClientOptions::default()).expect("client"),
    );
    let collector = Arc::new(Collector::default());
    let client_cancel = CancellationToken::new();

    let run = {
        let client = Arc::clone(&client);
        let collector = Arc::clone(&collector);
        let cancel = client_cancel.clone();
        tokio::spawn(async move { client.run(collector, cancel).await })
    };

    // 150..=199 from the first (filtered) batch, 200..=299 from the second.
    let numbers = wait_for_count(&collector, 150).await;
    assert_eq!(numbers, (150..=299).collect::<Vec<_>>());

    // The resume position lands on 300 once the delivery is acknowledged.
    timeout(Duration::from_secs(1), async {
        while client.position() != 300 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("resume position advanced");

    client_cancel.cancel();
    run.await.expect("join").expect("client run");
    harness.cancel.cancel();
}

#[tokio::test]
async fn stored_batch_frames_arrive_byte_verbatim() {
    use futures::StreamExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    let harness = start_server().await;
    let stored = compressed_batch(100..=199);
    harness
        .store
        .save_batch(100, 199, &stored)
        .await
        .expect("seed batch");

    // A raw socket sees the exact stored bytes: no recompression happened.
    let (mut stream, _) = connect_async(format!("{}/ws?from=150", harness.url))
        .await
        .expect("connect");
    let message = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("frame within deadline")
        .expect("stream open")
        .expect("read");
    match message {
        Message::Binary(frame) => assert_eq!(frame.as_ref(), stored.as_slice()),
        other => panic!("expected a binary frame, got {other:?}"),
    }

    harness.cancel.cancel();
}

#[tokio::test]
async fn from_zero_starts_at_block_one() {
    let harness = start_server().await;
    for number in 1..=3u64 {
        harness
            .store
            .save_block(number, &block_payload(number))
            .await
            .expect("seed block");
    }

    let client = Arc::new(
        StreamClient::new(&harness.url, 0, ClientOptions::default()).expect("client"),
    );
    let collector = Arc::new(Collector::default());
    let client_cancel = CancellationToken::new();

    let run = {
        let client = Arc::clone(&client);
        let collector = Arc::clone(&collector);
        let cancel = client_cancel.clone();
        tokio::spawn(async move { client.run(collector, cancel).await })
    };

    let numbers = wait_for_count(&collector, 3).await;
    assert_eq!(numbers, vec![1, 2, 3]);

    client_cancel.cancel();
    run.await.expect("join").expect("client run");
    harness.cancel.cancel();
}

#[tokio::test]
async fn caught_up_subscriber_receives_live_blocks_one_per_frame() {
    let harness = start_server().await;
    harness
        .store
        .save_block(1, &block_payload(1))
        .await
        .expect("seed block");

    let client = Arc::new(
        StreamClient::new(&harness.url, 1, ClientOptions::default()).expect("client"),
    );
    let collector = Arc::new(Collector::default());
    let client_cancel = CancellationToken::new();

    let run = {
        let client = Arc::clone(&client);
        let collector = Arc::clone(&collector);
        let cancel = client_cancel.clone();
        tokio::spawn(async move { client.run(collector, cancel).await })
    };

    wait_for_count(&collector, 1).await;

    // The subscriber is now at the tip; each newly ingested block arrives
    // as its own frame.
    for number in 2..=5u64 {
        harness
            .store
            .save_block(number, &block_payload(number))
            .await
            .expect("live block");
        let numbers = wait_for_count(&collector, number as usize).await;
        assert_eq!(numbers.last(), Some(&number));
    }
    assert_eq!(collector.snapshot(), vec![1, 2, 3, 4, 5]);

    client_cancel.cancel();
    run.await.expect("join").expect("client run");
    harness.cancel.cancel();
}

#[tokio::test]
async fn slow_handler_applies_backpressure_without_losing_blocks() {
    /// Sleeps per delivery to force frames to pool in the client buffer.
    #[derive(Debug, Default)]
    struct SlowCollector {
        inner: Collector,
    }

    #[async_trait]
    impl BlockHandler for SlowCollector {
        async fn handle(
            &self,
            blocks: Vec<NormalizedBlock>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            sleep(Duration::from_millis(30)).await;
            self.inner.handle(blocks).await
        }
    }

    let harness = start_server().await;
    for number in 1..=40u64 {
        harness
            .store
            .save_block(number, &block_payload(number))
            .await
            .expect("seed block");
    }

    // Tiny buffer so the receiver must park while the handler sleeps.
    let options = ClientOptions::default()
        .with_max_batch_size(256)
        .with_buffer_size(512);
    let client = Arc::new(StreamClient::new(&harness.url, 1, options).expect("client"));
    let collector = Arc::new(SlowCollector::default());
    let client_cancel = CancellationToken::new();

    let run = {
        let client = Arc::clone(&client);
        let collector = Arc::clone(&collector);
        let cancel = client_cancel.clone();
        tokio::spawn(async move { client.run(collector, cancel).await })
    };

    let numbers = wait_for_count(&collector.inner, 40).await;
    assert_eq!(numbers, (1..=40).collect::<Vec<_>>());

    client_cancel.cancel();
    run.await.expect("join").expect("client run");
    harness.cancel.cancel();
}
