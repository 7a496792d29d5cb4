//! Backend traits the poll loop depends on, and the connectors that create them.
//!
//! The poller needs exactly two operations from a queue: fetch a batch of
//! available messages, and delete one delivery by its receipt handle. Anything
//! that implements [`QueueBackend`] can be polled.

use crate::config::{AwsSqsConfig, ProviderType};
use crate::error::QueueError;
use crate::message::{QueueUrl, ReceiptHandle, ReceivedMessage};
use crate::providers::AwsSqsProvider;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;

/// Interface implemented by specific queue backends (SQS, in-memory, ...)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Fetch the next batch of available messages. An empty batch is not an error.
    async fn receive_messages(&self, queue: &QueueUrl)
        -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete (acknowledge) one delivery
    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Creates the backend connection the first time a client starts polling
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn QueueBackend>, QueueError>;
}

/// Connector that builds an [`AwsSqsProvider`] from configuration
#[derive(Debug, Clone)]
pub struct SqsConnector {
    config: AwsSqsConfig,
}

impl SqsConnector {
    pub fn new(config: AwsSqsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendConnector for SqsConnector {
    async fn connect(&self) -> Result<Arc<dyn QueueBackend>, QueueError> {
        let provider = AwsSqsProvider::new(self.config.clone()).map_err(|e| e.to_queue_error())?;
        Ok(Arc::new(provider))
    }
}

/// Connector that hands out an already constructed backend
#[derive(Clone)]
pub struct SharedConnector {
    backend: Arc<dyn QueueBackend>,
}

impl SharedConnector {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BackendConnector for SharedConnector {
    async fn connect(&self) -> Result<Arc<dyn QueueBackend>, QueueError> {
        Ok(Arc::clone(&self.backend))
    }
}
