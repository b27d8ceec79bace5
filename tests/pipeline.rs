//! End-to-end pipeline tests.
//!
//! Run with: cargo test --test pipeline --features sqlite
//!
//! Drives the full runtime (broker client, ingestor, processor, broadcaster)
//! with the scripted mock transport. Storage is in-memory SQLite, or the mock
//! store where a failing store is needed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use thistle::broadcast::{StreamEvent, Subscription};
use thistle::broker::{
    BrokerError, ConnectionState, MockLink, MockTransport, MockTransportHandle, Publisher,
};
use thistle::config::{Config, SharedConfig};
use thistle::runtime::Runtime;
use thistle::service::{Packet, ServiceError};
use thistle::storage::{MessageFilter, MessageStore, MockMessageStore, SqliteMessageStore};

const CONFIG: &str = r#"
broker:
  host: localhost
  port: 1883
  username: ""
  password: ""
  subscribe_topic: devices/+/telemetry
  publish_topic: thistle/processed
  backoff_floor_ms: 10
  backoff_ceiling_ms: 100
storage:
  type: sqlite
  sqlite:
    path: unused.db
processing:
  poll_interval_ms: 20
  recovery_delay_ms: 50
streaming:
  keepalive_ms: 200
"#;

const WAIT: Duration = Duration::from_secs(5);

struct Pipeline {
    runtime: Runtime,
    transport: MockTransportHandle,
    link: Arc<MockLink>,
    config: Config,
}

impl Pipeline {
    fn start(store: Arc<dyn MessageStore>) -> Self {
        Self::start_with(store, MockLink::with_transport)
    }

    fn start_with(
        store: Arc<dyn MessageStore>,
        make_link: impl FnOnce(MockTransportHandle) -> MockLink,
    ) -> Self {
        let config = Config::from_yaml(CONFIG).expect("test config should parse");
        let (transport, handle) = MockTransport::new();
        let link = Arc::new(make_link(handle.clone()));
        let runtime = Runtime::start(&config, store, Box::new(transport), link.clone());
        Self {
            runtime,
            transport: handle,
            link,
            config,
        }
    }

    async fn sqlite() -> Self {
        let store = SqliteMessageStore::in_memory()
            .await
            .expect("Failed to open in-memory SQLite");
        Self::start(Arc::new(store))
    }

    async fn wait_for_state(&self, state: ConnectionState) {
        let mut states = self.runtime.broker().watch_state();
        tokio::time::timeout(WAIT, states.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for broker state")
            .expect("broker state channel closed");
    }

    async fn connect(&self) {
        self.transport.connect();
        self.wait_for_state(ConnectionState::Connected).await;
    }
}

/// Next message event, skipping keepalives.
async fn next_message(subscription: &mut Subscription) -> Value {
    let keepalive = Duration::from_millis(200);
    tokio::time::timeout(WAIT, async {
        loop {
            match subscription.next(keepalive).await {
                Some(StreamEvent::Message(value)) => return value,
                Some(StreamEvent::Ping) => continue,
                None => panic!("stream ended before a message arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn all_messages(store: &dyn MessageStore) -> Vec<thistle::storage::StoredMessage> {
    let mut messages = store
        .fetch(&MessageFilter {
            limit: 1000,
            ..MessageFilter::default()
        })
        .await
        .unwrap();
    messages.reverse();
    messages
}

#[tokio::test]
async fn test_message_flows_from_broker_to_subscribers_and_back() {
    let pipeline = Pipeline::sqlite().await;
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;

    pipeline
        .transport
        .message("devices/7/telemetry", r#"{"temperature":21}"#);

    assert_eq!(
        next_message(&mut subscription).await,
        json!({"temperature": 21})
    );

    let store = pipeline.runtime.store().clone();
    eventually("record marked processed", || {
        let store = store.clone();
        async move { store.fetch_unprocessed(10).await.unwrap().is_empty() }
    })
    .await;

    let stored = all_messages(store.as_ref()).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].topic, "devices/7/telemetry");
    assert!(stored[0].processed);
    assert_eq!(
        pipeline.link.published(),
        vec![(
            "thistle/processed".to_string(),
            br#"{"temperature":21}"#.to_vec()
        )]
    );

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_ingested_messages_keep_arrival_order() {
    let pipeline = Pipeline::sqlite().await;
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;

    for i in 0..20 {
        pipeline
            .transport
            .message("devices/1/telemetry", format!(r#"{{"seq":{}}}"#, i));
    }

    for i in 0..20 {
        assert_eq!(next_message(&mut subscription).await, json!({"seq": i}));
    }

    let stored = all_messages(pipeline.runtime.store().as_ref()).await;
    for pair in stored.windows(2) {
        assert!(pair[1].id > pair[0].id);
        assert!(pair[1].timestamp > pair[0].timestamp);
    }

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payload_is_marked_but_not_delivered() {
    let pipeline = Pipeline::sqlite().await;
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;

    pipeline.transport.message("devices/1/telemetry", "not json");
    pipeline.transport.message("devices/1/telemetry", r#"{"ok":true}"#);

    assert_eq!(next_message(&mut subscription).await, json!({"ok": true}));

    let store = pipeline.runtime.store().clone();
    eventually("both records processed", || {
        let store = store.clone();
        async move { store.fetch_unprocessed(10).await.unwrap().is_empty() }
    })
    .await;
    assert_eq!(pipeline.link.published().len(), 1);

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes_and_keeps_ingesting() {
    let pipeline = Pipeline::sqlite().await;
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;
    assert_eq!(pipeline.link.subscriptions(), vec!["devices/+/telemetry"]);

    pipeline.transport.fail("connection reset by peer");
    pipeline.wait_for_state(ConnectionState::Reconnecting).await;
    pipeline.transport.fail("connection refused");
    pipeline.connect().await;

    assert_eq!(pipeline.link.subscriptions().len(), 2);

    pipeline
        .transport
        .message("devices/2/telemetry", r#"{"after":"reconnect"}"#);
    assert_eq!(
        next_message(&mut subscription).await,
        json!({"after": "reconnect"})
    );

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_submission_refused_while_disconnected() {
    let pipeline = Pipeline::sqlite().await;
    let state = pipeline
        .runtime
        .app_state(SharedConfig::new(pipeline.config.clone()));

    let result = state
        .submissions
        .submit(&Packet {
            device_id: 1,
            command: 9,
        })
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Broker(BrokerError::NotConnected))
    ));
    assert!(all_messages(pipeline.runtime.store().as_ref()).await.is_empty());
    assert_eq!(
        pipeline.runtime.broker().publish("thistle/processed", b"{}"),
        Err(BrokerError::NotConnected)
    );

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_submission_is_stored_published_and_processed() {
    let pipeline = Pipeline::sqlite().await;
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;
    let state = pipeline
        .runtime
        .app_state(SharedConfig::new(pipeline.config.clone()));

    let submission = state
        .submissions
        .submit(&Packet {
            device_id: 3,
            command: 4,
        })
        .await
        .unwrap();
    assert!(submission.published);

    assert_eq!(
        next_message(&mut subscription).await,
        json!({"device_id": 3, "command": 4})
    );

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_store_outage_marks_nothing_then_resumes() {
    let store = Arc::new(MockMessageStore::new());
    let pipeline = Pipeline::start(store.clone());
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;

    store.set_fail_on_fetch(true);
    pipeline.transport.message("devices/1/telemetry", r#"{"n":1}"#);
    pipeline.transport.message("devices/1/telemetry", r#"{"n":2}"#);

    eventually("both messages stored", || {
        let store = store.clone();
        async move { store.all().await.len() == 2 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.all().await.iter().all(|m| !m.processed));
    assert_eq!(subscription.pending(), 0);

    store.set_fail_on_fetch(false);
    assert_eq!(next_message(&mut subscription).await, json!({"n": 1}));
    assert_eq!(next_message(&mut subscription).await, json!({"n": 2}));

    eventually("both messages processed", || {
        let store = store.clone();
        async move { store.all().await.iter().all(|m| m.processed) }
    })
    .await;

    pipeline.runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_everything_in_order() {
    let store = Arc::new(MockMessageStore::new());
    let pipeline = Pipeline::start(store.clone());
    let mut subscription = pipeline.runtime.broadcaster().register();
    pipeline.connect().await;

    let broker = pipeline.runtime.broker().clone();
    let link = pipeline.link.clone();
    let broadcaster = pipeline.runtime.broadcaster().clone();

    tokio::time::timeout(WAIT, pipeline.runtime.shutdown())
        .await
        .expect("shutdown should complete");

    assert!(link.is_disconnected());
    assert_eq!(broker.state(), ConnectionState::Disconnected);
    assert!(broadcaster.is_shut_down());
    assert_eq!(subscription.next(Duration::from_secs(1)).await, None);
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_shutdown_completes_when_disconnect_is_never_written() {
    let store = Arc::new(MockMessageStore::new());
    let pipeline = Pipeline::start_with(store.clone(), |_| MockLink::new());
    pipeline.connect().await;

    let link = pipeline.link.clone();
    tokio::time::timeout(WAIT, pipeline.runtime.shutdown())
        .await
        .expect("shutdown must not wait on an unflushed disconnect");

    assert!(link.is_disconnected());
    assert!(store.is_closed());
}
