//! The poll loop: fetch a batch, dispatch it, pace the next fetch.
//!
//! One poll task runs per started client. Each cycle fetches one batch and
//! spawns one task per message, in batch order. What happens next depends on
//! the pacing mode:
//!
//! - `wait = false`: the next fetch starts once `poll_interval` has elapsed
//!   since the start of the current cycle. Batches may overlap.
//! - `wait = true`: the next fetch starts once every message of the batch has
//!   completed (including its delete) *and* `poll_interval` has elapsed since
//!   the start of the cycle.
//!
//! A failed fetch is followed by the retry policy's delay (5 s by default)
//! whatever the pacing mode. A stop request ends the loop before the next
//! cycle and cuts short any pacing or backoff sleep.

use crate::backend::BackendConnector;
use crate::client::{ErrorSink, HandlerSlot};
use crate::config::PollerConfig;
use crate::error::PollError;
use crate::message::QueueUrl;
use crate::processor::{MessageOutcome, MessageProcessor};
use crate::retry::RetryState;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

pub(crate) struct Poller {
    queue: QueueUrl,
    config: Arc<PollerConfig>,
    connector: Arc<dyn BackendConnector>,
    handler: HandlerSlot,
    errors: ErrorSink,
    stop: watch::Receiver<bool>,
    retry: RetryState,
}

impl Poller {
    pub(crate) fn new(
        queue: QueueUrl,
        config: Arc<PollerConfig>,
        connector: Arc<dyn BackendConnector>,
        handler: HandlerSlot,
        errors: ErrorSink,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            config,
            connector,
            handler,
            errors,
            stop,
            retry: RetryState::new(),
        }
    }

    /// Poll until stopped
    pub(crate) async fn run(mut self) {
        info!(
            queue = %self.queue,
            wait = self.config.wait,
            poll_interval_ms = self.config.poll_interval_ms,
            ignore_parse_errors = self.config.ignore_parse_errors,
            "Poll loop started"
        );

        if let Some(processor) = self.connect().await {
            while !self.is_stopped() {
                let next_cycle = self.poll_cycle(&processor).await;
                if !self.sleep_until(next_cycle).await {
                    break;
                }
            }
        }

        info!(queue = %self.queue, "Poll loop stopped");
    }

    /// Open the backend connection, retrying with backoff until it succeeds
    ///
    /// Returns `None` if stopped first.
    async fn connect(&mut self) -> Option<Arc<MessageProcessor>> {
        loop {
            if self.is_stopped() {
                return None;
            }

            match self.connector.connect().await {
                Ok(backend) => {
                    debug!(
                        queue = %self.queue,
                        provider = %backend.provider_type(),
                        "Connected to queue backend"
                    );
                    self.retry.reset();
                    return Some(Arc::new(MessageProcessor::new(
                        backend,
                        self.queue.clone(),
                        self.config.ignore_parse_errors,
                        Arc::clone(&self.handler),
                        self.errors.clone(),
                    )));
                }
                Err(e) => {
                    let delay = self.retry.record_failure(&self.config.retry);
                    warn!(
                        queue = %self.queue,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to connect to queue backend"
                    );
                    self.errors.emit(PollError::Connect(e));

                    if !self.sleep_until(Instant::now() + delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Run one fetch and dispatch; returns the earliest start of the next cycle
    #[instrument(skip_all, fields(queue = %self.queue))]
    async fn poll_cycle(&mut self, processor: &Arc<MessageProcessor>) -> Instant {
        let cycle_start = Instant::now();

        debug!("Polling for messages");
        let batch = match processor.backend().receive_messages(&self.queue).await {
            Ok(batch) => batch,
            Err(e) => {
                let delay = self.retry.record_failure(&self.config.retry);
                warn!(
                    error = %e,
                    consecutive_failures = self.retry.consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Failed to fetch messages"
                );
                self.errors.emit(PollError::Fetch(e));
                return Instant::now() + delay;
            }
        };
        self.retry.reset();

        debug!(count = batch.len(), "Received messages");

        let tasks = batch
            .into_iter()
            .map(|message| {
                let processor = Arc::clone(processor);
                tokio::spawn(async move { processor.process(message).await })
            })
            .collect::<Vec<_>>();

        if self.config.wait {
            wait_for_batch(tasks).await;
        }

        cycle_start + self.config.poll_interval()
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep until `deadline` unless stopped; returns whether polling should go on
    async fn sleep_until(&mut self, deadline: Instant) -> bool {
        if self.is_stopped() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            changed = self.stop.changed() => {
                // Every client handle is gone, so stop can no longer be requested
                if changed.is_err() {
                    tokio::time::sleep_until(deadline).await;
                }
            }
        }

        !self.is_stopped()
    }
}

/// Wait for every message task of a batch
async fn wait_for_batch(tasks: Vec<JoinHandle<MessageOutcome>>) {
    let mut acknowledged = 0usize;
    let total = tasks.len();

    for task in tasks {
        match task.await {
            Ok(MessageOutcome::Acknowledged) => acknowledged += 1,
            Ok(_) => {}
            Err(e) => error!(error = %e, "Message task ended abnormally"),
        }
    }

    debug!(total, acknowledged, "Batch complete");
}
