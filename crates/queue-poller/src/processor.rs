//! Per-message processing: decode, invoke the handler, delete on success.
//!
//! Every fetched message goes through the same steps:
//!
//! 1. The body is decoded as JSON.
//! 2. If decoding fails and parse errors are not ignored, the message is
//!    deleted and a [`PollError::Decode`] is reported; the handler never sees it.
//!    If parse errors are ignored, the handler gets the raw body instead.
//! 3. The handler runs in its own task, so a panic counts as a failure.
//! 4. On success the message is deleted. On failure it is left on the queue
//!    for the backend to redeliver, and a [`PollError::Handler`] is reported.
//!
//! Processing is complete once the delete call (if any) has returned.

use crate::backend::QueueBackend;
use crate::client::{ErrorSink, HandlerSlot};
use crate::error::{HandlerError, PollError};
use crate::message::{
    DeliveredMessage, MessageId, Payload, QueueUrl, ReceiptHandle, ReceivedMessage,
};
use std::sync::{Arc, PoisonError};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// How processing of one message ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageOutcome {
    /// Handler succeeded and the message was deleted
    Acknowledged,
    /// Handler failed; the message stays on the queue
    HandlerFailed,
    /// Body was not valid JSON; the message was deleted without calling the handler
    DecodeRejected,
    /// Handler succeeded but the delete call failed; the message may be redelivered
    DeleteFailed,
}

/// Processes messages fetched from one queue
pub(crate) struct MessageProcessor {
    backend: Arc<dyn QueueBackend>,
    queue: QueueUrl,
    ignore_parse_errors: bool,
    handler: HandlerSlot,
    errors: ErrorSink,
}

impl MessageProcessor {
    pub(crate) fn new(
        backend: Arc<dyn QueueBackend>,
        queue: QueueUrl,
        ignore_parse_errors: bool,
        handler: HandlerSlot,
        errors: ErrorSink,
    ) -> Self {
        Self {
            backend,
            queue,
            ignore_parse_errors,
            handler,
            errors,
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Run one message through decode, handler and delete
    pub(crate) async fn process(&self, message: ReceivedMessage) -> MessageOutcome {
        let message_id = message.message_id.clone();
        debug!(
            queue = %self.queue,
            message_id = %message_id,
            delivery_count = message.delivery_count,
            "Processing message"
        );

        let payload = match message.decode_body() {
            Ok(value) => Payload::Json(value),
            Err(e) if self.ignore_parse_errors => {
                debug!(
                    queue = %self.queue,
                    message_id = %message_id,
                    error = %e,
                    "Passing undecodable body to handler as raw text"
                );
                Payload::Raw(message.body.clone())
            }
            Err(e) => return self.reject_undecodable(message, e).await,
        };

        let raw_body = message.body.clone();
        let receipt_handle = message.receipt_handle.clone();

        match self.invoke_handler(message.into_delivered(payload)).await {
            Ok(()) => {
                if self.delete(&message_id, &receipt_handle).await {
                    debug!(queue = %self.queue, message_id = %message_id, "Message acknowledged");
                    MessageOutcome::Acknowledged
                } else {
                    MessageOutcome::DeleteFailed
                }
            }
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    message_id = %message_id,
                    error = %e,
                    "Handler failed, message left on queue"
                );
                self.errors.emit(PollError::Handler {
                    message_id,
                    body: raw_body,
                    source: e,
                });
                MessageOutcome::HandlerFailed
            }
        }
    }

    /// Delete a message whose body is not JSON and report it
    async fn reject_undecodable(
        &self,
        message: ReceivedMessage,
        source: serde_json::Error,
    ) -> MessageOutcome {
        warn!(
            queue = %self.queue,
            message_id = %message.message_id,
            error = %source,
            "Message body is not valid JSON, deleting"
        );

        self.delete(&message.message_id, &message.receipt_handle).await;

        self.errors.emit(PollError::Decode {
            message_id: message.message_id,
            body: message.body,
            source,
        });

        MessageOutcome::DecodeRejected
    }

    /// Call the current handler in its own task
    async fn invoke_handler(&self, message: DeliveredMessage) -> Result<(), HandlerError> {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no message handler registered"))?;

        match tokio::spawn(async move { handler.handle(message).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!("message handler panicked: {}", e)),
            Err(e) => Err(anyhow::anyhow!("message handler task failed: {}", e)),
        }
    }

    /// Delete one delivery, reporting a failure; returns whether it succeeded
    async fn delete(&self, message_id: &MessageId, receipt_handle: &ReceiptHandle) -> bool {
        debug!(queue = %self.queue, message_id = %message_id, "Deleting message");

        match self.backend.delete_message(&self.queue, receipt_handle).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    message_id = %message_id,
                    error = %e,
                    "Failed to delete message"
                );
                self.errors.emit(PollError::Delete {
                    message_id: message_id.clone(),
                    receipt_handle: receipt_handle.clone(),
                    source: e,
                });
                false
            }
        }
    }
}
