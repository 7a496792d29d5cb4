//! Common test utilities for queue-poller integration tests
//!
//! This module provides:
//! - A recording backend wrapping the in-memory queue
//! - Recording handlers and error listeners
//! - Test tracing setup

use async_trait::async_trait;
use queue_poller::{
    DeliveredMessage, HandlerError, InMemoryBackend, InMemoryConfig, PollError, ProviderType,
    QueueBackend, QueueError, QueueUrl, ReceiptHandle, ReceivedMessage,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

#[allow(dead_code)]
pub const QUEUE: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/orders";

/// Route library logs to the test output
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("queue_poller=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Recording Backend
// ============================================================================

/// In-memory backend that records when fetches and deletes happen
#[derive(Clone)]
#[allow(dead_code)]
pub struct RecordingBackend {
    pub queue: InMemoryBackend,
    fetches: Arc<Mutex<Vec<Instant>>>,
    deletes: Arc<Mutex<Vec<(Instant, ReceiptHandle)>>>,
}

#[allow(dead_code)]
impl RecordingBackend {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queue: InMemoryBackend::new(InMemoryConfig {
                visibility_timeout,
                ..Default::default()
            }),
            fetches: Arc::new(Mutex::new(Vec::new())),
            deletes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn send(&self, body: &str) -> queue_poller::MessageId {
        self.queue
            .send_message(&queue_url(), body)
            .expect("in-memory send failed")
    }

    pub fn fetches(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(Instant, ReceiptHandle)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueBackend for RecordingBackend {
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.fetches.lock().unwrap().push(Instant::now());
        self.queue.receive_messages(queue).await
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.queue.delete_message(queue, receipt).await?;
        self.deletes
            .lock()
            .unwrap()
            .push((Instant::now(), receipt.clone()));
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[allow(dead_code)]
pub fn queue_url() -> QueueUrl {
    QueueUrl::new(QUEUE.to_string()).unwrap()
}

// ============================================================================
// Handlers and Listeners
// ============================================================================

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Messages seen by a handler, shared with the test
pub type Seen = Arc<Mutex<Vec<DeliveredMessage>>>;

/// Handler that records messages, sleeps for `delay`, then succeeds or fails
#[allow(dead_code)]
pub fn recording_handler(
    seen: &Seen,
    delay: Duration,
    succeed: bool,
) -> impl Fn(DeliveredMessage) -> HandlerFuture + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |message: DeliveredMessage| -> HandlerFuture {
        let seen = Arc::clone(&seen);
        Box::pin(async move {
            seen.lock().unwrap().push(message);
            tokio::time::sleep(delay).await;
            if succeed {
                Ok(())
            } else {
                Err(anyhow::anyhow!("downstream unavailable"))
            }
        })
    }
}

/// Error listener that stores every error it receives
#[allow(dead_code)]
pub fn collect_errors() -> (
    Arc<Mutex<Vec<PollError>>>,
    impl Fn(PollError) + Send + Sync + 'static,
) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&errors);
    (errors, move |error: PollError| {
        collected.lock().unwrap().push(error)
    })
}
