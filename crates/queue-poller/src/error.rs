//! Error types for queue backends, the poll loop and configuration.

use crate::message::{MessageId, ReceiptHandle};
use std::time::Duration;
use thiserror::Error;

/// Error returned by a user message handler.
pub type HandlerError = anyhow::Error;

/// Errors raised by a queue backend (fetch, delete, connect)
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_url}")]
    QueueNotFound { queue_url: String },

    #[error("Message not found or receipt handle invalid: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Malformed backend response: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::Serialization { .. } => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }
}

/// Errors reported to the client's error listener.
///
/// None of these stop the poll loop. Message-specific variants carry the
/// originating message id, and the raw body where one is available.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Failed to connect to queue backend: {0}")]
    Connect(#[source] QueueError),

    #[error("Failed to fetch messages: {0}")]
    Fetch(#[source] QueueError),

    #[error("Failed to delete message {message_id}: {source}")]
    Delete {
        message_id: MessageId,
        receipt_handle: ReceiptHandle,
        #[source]
        source: QueueError,
    },

    #[error("Message {message_id} body is not valid JSON: {source}")]
    Decode {
        message_id: MessageId,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Handler failed for message {message_id}: {source}")]
    Handler {
        message_id: MessageId,
        body: String,
        #[source]
        source: HandlerError,
    },
}

impl PollError {
    /// Id of the message this error relates to, if any
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Connect(_) | Self::Fetch(_) => None,
            Self::Delete { message_id, .. }
            | Self::Decode { message_id, .. }
            | Self::Handler { message_id, .. } => Some(message_id),
        }
    }

    /// Raw, undecoded body of the message this error relates to, if known
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Self::Decode { body, .. } | Self::Handler { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Check if the error came from the backend transport rather than a message
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Fetch(_) | Self::Delete { .. }
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
