//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue address, e.g. `https://sqs.us-east-1.amazonaws.com/123456789012/orders`
///
/// The address is opaque to the poller and handed to the backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create new queue URL with validation
    pub fn new(url: String) -> Result<Self, ValidationError> {
        if url.is_empty() || url.len() > 2048 {
            return Err(ValidationError::OutOfRange {
                field: "queue_url".to_string(),
                message: "must be 1-2048 characters".to_string(),
            });
        }

        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: "whitespace and control characters are not allowed".to_string(),
            });
        }

        Ok(Self(url))
    }

    /// Get queue URL as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Backend-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token issued with each delivery, required to delete that delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String) -> Self {
        Self(handle)
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message as returned by one fetch call, body still undecoded
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    /// System attributes such as `ApproximateReceiveCount` or `SentTimestamp`
    pub attributes: HashMap<String, String>,
    /// String-valued user attributes attached by the producer
    pub message_attributes: HashMap<String, String>,
    pub delivery_count: u32,
}

impl ReceivedMessage {
    /// Create a received message with no attributes and a delivery count of one
    pub fn new(message_id: MessageId, receipt_handle: ReceiptHandle, body: String) -> Self {
        Self {
            message_id,
            receipt_handle,
            body,
            attributes: HashMap::new(),
            message_attributes: HashMap::new(),
            delivery_count: 1,
        }
    }

    /// Decode the body as JSON
    pub fn decode_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Convert into the form handed to a message handler
    pub fn into_delivered(self, body: Payload) -> DeliveredMessage {
        DeliveredMessage {
            message_id: self.message_id,
            receipt_handle: self.receipt_handle,
            body,
            attributes: self.attributes,
            message_attributes: self.message_attributes,
            delivery_count: self.delivery_count,
        }
    }
}

/// Message body as seen by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body decoded from JSON
    Json(serde_json::Value),
    /// Body that failed to decode, passed through untouched
    Raw(String),
}

impl Payload {
    /// Decoded JSON value, if the body decoded
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Undecoded body, if decoding was skipped
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Raw(body) => Some(body),
        }
    }

    /// Deserialize the decoded body into a concrete type
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Self::Json(value) => T::deserialize(value),
            Self::Raw(body) => serde_json::from_str(body),
        }
    }
}

/// A message handed to a handler
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: Payload,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, String>,
    pub delivery_count: u32,
}

impl DeliveredMessage {
    /// Check if the backend has delivered this message before
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
