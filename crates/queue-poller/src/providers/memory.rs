//! In-memory queue backend for testing and development.
//!
//! Behaves like an SQS standard queue as seen by the poller:
//! - Receives return up to `max_batch_size` visible messages, oldest first
//! - Received messages stay invisible until deleted or until their visibility
//!   timeout expires, after which they are delivered again with a higher
//!   delivery count
//! - Deletes require the receipt handle of the current delivery
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! clock control visibility expiry.

use crate::backend::QueueBackend;
use crate::config::ProviderType;
use crate::error::QueueError;
use crate::message::{MessageId, QueueUrl, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Settings for the in-memory backend
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryConfig {
    /// Messages returned by one receive call at most
    pub max_batch_size: usize,
    /// How long a received message stays invisible
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueueUrl, InMemoryQueue>,
}

#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages in FIFO order
    messages: VecDeque<StoredMessage>,
    /// Received messages keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Move messages whose visibility timeout expired back to the visible list
    fn release_expired(&mut self, now: Instant) {
        let expired = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect::<Vec<_>>();

        let mut released = expired
            .into_iter()
            .filter_map(|receipt| self.in_flight.remove(&receipt))
            .map(|entry| entry.message)
            .collect::<Vec<_>>();

        // Redeliver in original send order
        released.sort_by_key(|message| message.sequence);
        for message in released.into_iter().rev() {
            self.messages.push_front(message);
        }
    }
}

#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    message_id: MessageId,
    body: String,
    message_attributes: HashMap<String, String>,
    delivery_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

// ============================================================================
// InMemoryBackend
// ============================================================================

/// In-memory queue backend
///
/// Clones share the same storage, so a test can keep one handle for sending
/// and inspection while the poller owns another.
#[derive(Clone)]
pub struct InMemoryBackend {
    storage: Arc<RwLock<QueueStorage>>,
    config: InMemoryConfig,
    sequence: Arc<std::sync::atomic::AtomicU64>,
}

impl InMemoryBackend {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::default())),
            config,
            sequence: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Add a message to the queue, creating the queue if needed
    pub fn send_message(
        &self,
        queue: &QueueUrl,
        body: impl Into<String>,
    ) -> Result<MessageId, QueueError> {
        self.send_message_with_attributes(queue, body, HashMap::new())
    }

    /// Add a message carrying string message attributes
    pub fn send_message_with_attributes(
        &self,
        queue: &QueueUrl,
        body: impl Into<String>,
        message_attributes: HashMap<String, String>,
    ) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        let message = StoredMessage {
            sequence: self
                .sequence
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            message_id: message_id.clone(),
            body: body.into(),
            message_attributes,
            delivery_count: 0,
        };

        let mut storage = self.storage.write().map_err(|_| lock_poisoned())?;
        storage
            .queues
            .entry(queue.clone())
            .or_default()
            .messages
            .push_back(message);

        Ok(message_id)
    }

    /// Number of messages currently visible
    pub fn visible_count(&self, queue: &QueueUrl) -> usize {
        self.with_queue(queue, |q| {
            let now = Instant::now();
            q.messages.len() + q.in_flight.values().filter(|e| e.visible_at <= now).count()
        })
    }

    /// Number of received messages that are neither deleted nor expired
    pub fn in_flight_count(&self, queue: &QueueUrl) -> usize {
        self.with_queue(queue, |q| {
            let now = Instant::now();
            q.in_flight.values().filter(|e| e.visible_at > now).count()
        })
    }

    fn with_queue(&self, queue: &QueueUrl, f: impl FnOnce(&InMemoryQueue) -> usize) -> usize {
        let storage = match self.storage.read() {
            Ok(storage) => storage,
            Err(poisoned) => poisoned.into_inner(),
        };
        storage.queues.get(queue).map(f).unwrap_or(0)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("config", &self.config)
            .finish()
    }
}

fn lock_poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "LockPoisoned".to_string(),
        message: "in-memory queue storage lock poisoned".to_string(),
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(|_| lock_poisoned())?;
        let Some(state) = storage.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        state.release_expired(now);

        let count = state.messages.len().min(self.config.max_batch_size);
        let mut batch = Vec::with_capacity(count);
        for mut message in state.messages.drain(..count) {
            message.delivery_count += 1;
            let receipt = uuid::Uuid::new_v4().to_string();

            let mut received = ReceivedMessage::new(
                message.message_id.clone(),
                ReceiptHandle::new(receipt.clone()),
                message.body.clone(),
            );
            received.delivery_count = message.delivery_count;
            received.message_attributes = message.message_attributes.clone();
            received.attributes.insert(
                "ApproximateReceiveCount".to_string(),
                message.delivery_count.to_string(),
            );

            state.in_flight.insert(
                receipt,
                InFlightMessage {
                    message,
                    visible_at: now + self.config.visibility_timeout,
                },
            );
            batch.push(received);
        }

        Ok(batch)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(|_| lock_poisoned())?;

        // A receipt is only valid for the delivery that produced it
        storage
            .queues
            .get_mut(queue)
            .and_then(|state| state.in_flight.remove(receipt.as_str()))
            .map(|_| ())
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.to_string(),
            })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
