//! Queue backend implementations.
//!
//! This module contains concrete implementations of the `QueueBackend` trait:
//! AWS SQS over its HTTP query API, and an in-memory queue for tests and local
//! development.

pub mod aws;
pub mod memory;

pub use aws::{AwsError, AwsSqsProvider};
pub use memory::{InMemoryBackend, InMemoryConfig};
