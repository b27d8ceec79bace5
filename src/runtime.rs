//! Component wiring and ordered shutdown.
//!
//! Shutdown runs in dependency order so nothing is delivered to a closing
//! subscriber and nothing is written after the store closes:
//! 1. broker task (no new messages, link disconnected)
//! 2. ingestor (drains what is already queued)
//! 3. processor
//! 4. broadcaster (ends every live stream)
//! 5. store

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broadcast::{BroadcastConfig, Broadcaster};
use crate::broker::{BrokerClient, BrokerLink, Publisher, Transport};
use crate::config::{Config, SharedConfig};
use crate::http::AppState;
use crate::ingest::{ArrivalClock, Ingestor};
use crate::processor::{
    AlwaysPublish, DispatchPolicy, MessageProcessor, NeverPublish, ProcessorConfig,
};
use crate::service::{QueryService, SubmissionService};
use crate::storage::MessageStore;
use crate::utils::shutdown;

/// A spawned background loop and its stop signal.
struct Task {
    name: &'static str,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Task {
    fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (cancel, rx) = shutdown::channel();
        Self {
            name,
            cancel,
            handle: tokio::spawn(run(rx)),
        }
    }

    async fn stop(self) {
        let _ = self.cancel.send(true);
        self.join().await;
    }

    async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Background task failed");
        }
    }
}

/// The running pipeline.
pub struct Runtime {
    broker: Arc<BrokerClient>,
    broadcaster: Broadcaster,
    store: Arc<dyn MessageStore>,
    /// Shared by the ingestor and packet submission.
    clock: Arc<ArrivalClock>,
    publish_topic: String,
    broker_task: Task,
    ingest_task: Task,
    processor_task: Task,
}

impl Runtime {
    /// Start every background task.
    ///
    /// Republication follows `processing.republish`.
    pub fn start(
        config: &Config,
        store: Arc<dyn MessageStore>,
        transport: Box<dyn Transport>,
        link: Arc<dyn BrokerLink>,
    ) -> Self {
        let policy: Arc<dyn DispatchPolicy> = if config.processing.republish {
            Arc::new(AlwaysPublish)
        } else {
            Arc::new(NeverPublish)
        };
        Self::start_with_policy(config, store, transport, link, policy)
    }

    pub fn start_with_policy(
        config: &Config,
        store: Arc<dyn MessageStore>,
        transport: Box<dyn Transport>,
        link: Arc<dyn BrokerLink>,
        policy: Arc<dyn DispatchPolicy>,
    ) -> Self {
        let broker = Arc::new(BrokerClient::new(&config.broker, link));
        let broadcaster = Broadcaster::new(BroadcastConfig::from(&config.streaming));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let client = broker.clone();
        let broker_task = Task::spawn("broker", move |rx| async move {
            client.run(transport, inbound_tx, rx).await
        });

        let clock = Arc::new(ArrivalClock::new());
        let ingestor = Ingestor::with_clock(store.clone(), clock.clone());
        let ingest_task = Task::spawn("ingestor", move |rx| ingestor.run(inbound_rx, rx));

        let publisher: Arc<dyn Publisher> = broker.clone();
        let processor = MessageProcessor::new(
            store.clone(),
            broadcaster.clone(),
            publisher,
            ProcessorConfig::new(&config.broker, &config.processing),
        )
        .with_policy(policy);
        let processor_task = Task::spawn("processor", move |rx| processor.run(rx));

        info!("Runtime started");
        Self {
            broker,
            broadcaster,
            store,
            clock,
            publish_topic: config.broker.publish_topic.clone(),
            broker_task,
            ingest_task,
            processor_task,
        }
    }

    pub fn broker(&self) -> &Arc<BrokerClient> {
        &self.broker
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// State for the HTTP layer.
    pub fn app_state(&self, config: SharedConfig) -> AppState {
        let publisher: Arc<dyn Publisher> = self.broker.clone();
        AppState {
            submissions: Arc::new(
                SubmissionService::new(
                    self.store.clone(),
                    publisher.clone(),
                    self.publish_topic.clone(),
                )
                .with_clock(self.clock.clone()),
            ),
            queries: Arc::new(QueryService::new(self.store.clone())),
            broadcaster: self.broadcaster.clone(),
            store: self.store.clone(),
            publisher,
            config,
        }
    }

    /// Stop everything in dependency order.
    pub async fn shutdown(self) {
        info!("Runtime shutting down");

        self.broker_task.stop().await;
        // The broker task owned the only sender; the ingestor ends once the queue is drained.
        self.ingest_task.join().await;
        self.processor_task.stop().await;
        self.broadcaster.shutdown();
        self.store.close().await;

        info!("Runtime stopped");
    }
}
