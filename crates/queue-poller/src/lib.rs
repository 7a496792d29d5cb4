//! # Queue Poller
//!
//! Polling consumer for SQS-style message queues with at-least-once delivery.
//!
//! A client repeatedly fetches batches of messages from a remote queue, hands
//! each message to an application handler and deletes it once the handler
//! reports success. Messages whose handler fails stay on the queue and are
//! redelivered by the backend after their visibility timeout.
//!
//! This library provides:
//! - A client facade with lazy start and an explicit stop/shutdown handle
//! - Two pacing modes: overlapping batches, or one batch at a time (`wait`)
//! - Strict or lenient handling of bodies that are not valid JSON
//! - A fixed 5 second backoff after fetch errors, or exponential with jitter
//! - An AWS SQS backend speaking the HTTP query API, and an in-memory backend
//!
//! ## Module Organization
//!
//! - [`client`] - Factory, client handle, handler and error listener types
//! - [`backend`] - Backend and connector traits
//! - [`providers`] - AWS SQS and in-memory backends
//! - [`config`] - Poller and backend configuration
//! - [`retry`] - Fetch backoff policy
//! - [`message`] - Message types and identifiers
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use queue_poller::{DeliveredMessage, HandlerError, PollerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollerConfig::load(None)?;
//! let client = queue_poller::open(config).queue_with_handler(
//!     "https://sqs.us-east-1.amazonaws.com/123456789012/orders",
//!     |message: DeliveredMessage| async move {
//!         println!("{}: {:?}", message.message_id, message.body);
//!         Ok::<_, HandlerError>(())
//!     },
//! )?;
//!
//! tokio::signal::ctrl_c().await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod providers;
pub mod retry;

mod poller;
mod processor;

// Re-export commonly used types at crate root for convenience
pub use backend::{BackendConnector, QueueBackend, SharedConnector, SqsConnector};
pub use client::{ErrorListener, MessageHandler, QueueClient, QueueFactory};
pub use config::{AwsSqsConfig, PollerConfig, ProviderType};
pub use error::{ConfigurationError, HandlerError, PollError, QueueError, ValidationError};
pub use message::{DeliveredMessage, MessageId, Payload, QueueUrl, ReceiptHandle, ReceivedMessage};
pub use providers::{AwsSqsProvider, InMemoryBackend, InMemoryConfig};
pub use retry::{RetryPolicy, DEFAULT_FETCH_BACKOFF};

/// Create a factory for queue clients sharing `config`
///
/// Clients opened from the factory connect to AWS SQS using `config.backend`.
/// Use [`QueueFactory::with_connector`] to poll a different backend.
pub fn open(config: PollerConfig) -> QueueFactory {
    QueueFactory::new(config)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
