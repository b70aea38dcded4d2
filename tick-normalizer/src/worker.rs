//! Partition workers: one ordered task per input partition.
//!
//! The consumer loop hands every message to the worker owning its partition over a bounded
//! channel. A worker processes its messages strictly in order and stores `offset + 1` only
//! once a message reached a terminal state, so the committed position never passes
//! unfinished work. Partitions make progress independently of each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_types::SourceCoordinates;
use futures::future::join_all;
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{OFFSET_STORE_ERRORS, PARTITION_WORKERS};
use crate::pipeline::{Outcome, TickPipeline};

/// Where finished offsets are recorded for the next commit
pub trait OffsetStore: Send + Sync {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError>;
}

/// An input message detached from the consumer, so it can be queued to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct InputMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl InputMessage {
    pub fn source(&self) -> SourceCoordinates {
        SourceCoordinates {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

impl From<&BorrowedMessage<'_>> for InputMessage {
    fn from(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            // An empty message still has to reach a terminal state, it gets dead-lettered
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages buffered per partition before the consumer loop is held back
    pub queue_size: usize,
    /// Pause between attempts when an output could not be published
    pub retry_backoff: Duration,
}

struct PartitionWorker {
    sender: mpsc::Sender<InputMessage>,
    handle: JoinHandle<()>,
}

/// Owns the partition workers and routes messages to them.
pub struct PartitionDispatcher {
    pipeline: Arc<TickPipeline>,
    offsets: Arc<dyn OffsetStore>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
    workers: HashMap<(String, i32), PartitionWorker>,
}

impl PartitionDispatcher {
    pub fn new(
        pipeline: Arc<TickPipeline>,
        offsets: Arc<dyn OffsetStore>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pipeline,
            offsets,
            config,
            shutdown,
            workers: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a message on its partition's worker, starting the worker on first sight of
    /// the partition. Waits while the worker's queue is full.
    pub async fn dispatch(&mut self, message: InputMessage) {
        let key = (message.topic.clone(), message.partition);
        if !self.workers.contains_key(&key) {
            info!(
                topic = %message.topic,
                partition = message.partition,
                "starting partition worker"
            );
            let worker = spawn_worker(
                self.pipeline.clone(),
                self.offsets.clone(),
                &self.config,
                self.shutdown.clone(),
            );
            self.workers.insert(key.clone(), worker);
            metrics::gauge!(PARTITION_WORKERS).set(self.workers.len() as f64);
        }

        let sender = self.workers[&key].sender.clone();
        let offset = message.offset;
        if sender.send(message).await.is_err() {
            // The worker only goes away on shutdown; the message is redelivered after restart
            warn!(
                topic = %key.0,
                partition = key.1,
                offset,
                "partition worker is gone, message not queued"
            );
        }
    }

    /// Stop every worker. Each finishes the message it is working on; anything still queued
    /// is left for redelivery. Returns false if the workers did not stop within `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let handles: Vec<_> = self
            .workers
            .into_values()
            .map(|worker| {
                drop(worker.sender);
                worker.handle
            })
            .collect();

        info!(workers = handles.len(), "waiting for partition workers to finish");
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("partition worker panicked: {e}");
                    }
                }
                true
            }
            Err(_) => {
                warn!(?timeout, "partition workers did not finish in time");
                false
            }
        }
    }
}

fn spawn_worker(
    pipeline: Arc<TickPipeline>,
    offsets: Arc<dyn OffsetStore>,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> PartitionWorker {
    let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
    let retry_backoff = config.retry_backoff;
    let handle = tokio::spawn(run_worker(
        receiver,
        pipeline,
        offsets,
        retry_backoff,
        shutdown,
    ));
    PartitionWorker { sender, handle }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<InputMessage>,
    pipeline: Arc<TickPipeline>,
    offsets: Arc<dyn OffsetStore>,
    retry_backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = receiver.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Some(outcome) =
            process_until_terminal(&pipeline, &message, retry_backoff, &mut shutdown).await
        else {
            // Shut down while an output could not be published; the offset stays put
            break;
        };

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            outcome = outcome.state().as_str(),
            "message finished"
        );

        if let Err(e) = offsets.store_offset(&message.topic, message.partition, message.offset + 1)
        {
            metrics::counter!(OFFSET_STORE_ERRORS).increment(1);
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "failed to store offset: {e}"
            );
        }
    }
}

/// Runs the pipeline on a message until it reaches a terminal state, retrying publish
/// failures. Returns None only if shutdown started before the message could finish.
async fn process_until_terminal(
    pipeline: &TickPipeline,
    message: &InputMessage,
    retry_backoff: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Outcome> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match pipeline
            .process_payload(&message.payload, message.source())
            .await
        {
            Ok(outcome) => return Some(outcome),
            Err(e) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    attempt,
                    "failed to process message, retrying: {e}"
                );
            }
        }

        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            _ = tokio::time::sleep(retry_backoff) => {}
            _ = shutdown.changed() => return None,
        }
    }
}
