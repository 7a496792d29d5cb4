//! Queue client facade: handler registration, lazy start and shutdown.
//!
//! A [`QueueFactory`] holds the configuration shared by every queue it opens.
//! Each [`QueueClient`] is bound to one queue URL. Nothing talks to the
//! backend until the first handler is registered with
//! [`QueueClient::on_message`]; that call spawns the poll task, which opens
//! the backend connection and keeps polling until [`QueueClient::stop`] or
//! [`QueueClient::shutdown`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use queue_poller::{open, DeliveredMessage, HandlerError, PollerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = open(PollerConfig::default().with_wait(true));
//! let client = factory.queue("https://sqs.us-east-1.amazonaws.com/123456789012/orders")?;
//!
//! client.on_error(|error| eprintln!("queue error: {}", error));
//! client.on_message(|message: DeliveredMessage| async move {
//!     println!("got {:?}", message.body);
//!     Ok::<_, HandlerError>(())
//! });
//!
//! tokio::time::sleep(Duration::from_secs(60)).await;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::backend::{BackendConnector, SqsConnector};
use crate::config::PollerConfig;
use crate::error::{HandlerError, PollError, ValidationError};
use crate::message::{DeliveredMessage, QueueUrl};
use crate::poller::Poller;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// ============================================================================
// Handler and Listener Types
// ============================================================================

/// Application-provided message handler.
///
/// Returning `Ok(())` acknowledges the message, which is then deleted from the
/// queue. Returning an error leaves the message on the queue; the backend
/// redelivers it after its visibility timeout expires. Handlers run
/// concurrently, one task per message, so implementations must be
/// `Send + Sync`.
///
/// Any `Fn(DeliveredMessage) -> impl Future<Output = Result<(), HandlerError>>`
/// closure is a handler.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use queue_poller::{DeliveredMessage, HandlerError, MessageHandler};
///
/// struct OrderHandler;
///
/// #[async_trait]
/// impl MessageHandler for OrderHandler {
///     async fn handle(&self, message: DeliveredMessage) -> Result<(), HandlerError> {
///         let order: serde_json::Value = message.body.deserialize()?;
///         println!("order {}", order["id"]);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivered message
    async fn handle(&self, message: DeliveredMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(DeliveredMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: DeliveredMessage) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// Callback receiving every error the client reports
pub type ErrorListener = Arc<dyn Fn(PollError) + Send + Sync>;

/// The currently registered handler, shared with the poll task
pub(crate) type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

/// Delivers errors to the registered listener, or logs them when there is none
#[derive(Clone)]
pub(crate) struct ErrorSink {
    queue: QueueUrl,
    listener: Arc<RwLock<Option<ErrorListener>>>,
}

impl ErrorSink {
    pub(crate) fn new(queue: QueueUrl) -> Self {
        Self {
            queue,
            listener: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn set_listener(&self, listener: ErrorListener) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub(crate) fn emit(&self, error: PollError) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match listener {
            Some(listener) => listener(error),
            None => error!(
                queue = %self.queue,
                message_id = ?error.message_id().map(|id| id.as_str()),
                error = %error,
                "Queue error with no error listener registered"
            ),
        }
    }
}

// ============================================================================
// QueueFactory
// ============================================================================

/// Opens [`QueueClient`]s that share one configuration
#[derive(Clone)]
pub struct QueueFactory {
    config: Arc<PollerConfig>,
    connector: Arc<dyn BackendConnector>,
}

impl QueueFactory {
    /// Create a factory whose clients connect to SQS using `config.backend`
    ///
    /// The configuration is not validated here; an invalid backend
    /// configuration surfaces as a [`PollError::Connect`] once polling starts,
    /// and the retry policy is normalized (see [`RetryPolicy::normalized`]).
    ///
    /// [`RetryPolicy::normalized`]: crate::retry::RetryPolicy::normalized
    pub fn new(config: PollerConfig) -> Self {
        let connector = Arc::new(SqsConnector::new(config.backend.clone()));
        Self::with_connector(config, connector)
    }

    /// Create a factory whose clients obtain their backend from `connector`
    ///
    /// The retry policy is normalized so a misconfigured backoff cannot stop
    /// the poll loop.
    pub fn with_connector(mut config: PollerConfig, connector: Arc<dyn BackendConnector>) -> Self {
        config.retry = config.retry.normalized();
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Create a client bound to `queue_url`
    ///
    /// No backend call is made.
    pub fn queue(&self, queue_url: impl Into<String>) -> Result<QueueClient, ValidationError> {
        let queue = QueueUrl::new(queue_url.into())?;
        Ok(QueueClient::new(
            queue,
            Arc::clone(&self.config),
            Arc::clone(&self.connector),
        ))
    }

    /// Create a client bound to `queue_url` and start it with `handler`
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn queue_with_handler<H>(
        &self,
        queue_url: impl Into<String>,
        handler: H,
    ) -> Result<QueueClient, ValidationError>
    where
        H: MessageHandler + 'static,
    {
        let client = self.queue(queue_url)?;
        client.on_message(handler);
        Ok(client)
    }
}

impl std::fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFactory")
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// QueueClient
// ============================================================================

/// Polling consumer bound to one queue
///
/// Cheap to clone; clones control the same poll task. Dropping every clone
/// does not stop polling, only [`stop`](Self::stop) does.
#[derive(Clone)]
pub struct QueueClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    queue: QueueUrl,
    config: Arc<PollerConfig>,
    connector: Arc<dyn BackendConnector>,
    handler: HandlerSlot,
    errors: ErrorSink,
    stop_tx: watch::Sender<bool>,
    /// Set once the poll task has been joined
    exited: watch::Sender<bool>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueClient {
    fn new(
        queue: QueueUrl,
        config: Arc<PollerConfig>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (exited, _) = watch::channel(false);
        let errors = ErrorSink::new(queue.clone());

        Self {
            inner: Arc::new(ClientInner {
                queue,
                config,
                connector,
                handler: Arc::new(RwLock::new(None)),
                errors,
                stop_tx,
                exited,
                started: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Register the message handler, replacing any earlier one
    ///
    /// The first registration starts polling. Messages dispatched after a
    /// replacement go to the new handler.
    ///
    /// # Panics
    ///
    /// The first call panics if made outside of a Tokio runtime.
    pub fn on_message<H>(&self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));

        if !self.is_started() {
            self.start();
        }
    }

    /// Register the error listener, replacing any earlier one
    ///
    /// Without a listener, errors are logged at `error` level.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(PollError) + Send + Sync + 'static,
    {
        self.inner.errors.set_listener(Arc::new(listener));
    }

    /// Spawn the poll task unless it has already been started
    fn start(&self) {
        // The task slot lock orders start against shutdown
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let poller = Poller::new(
            self.inner.queue.clone(),
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.connector),
            Arc::clone(&self.inner.handler),
            self.inner.errors.clone(),
            self.inner.stop_tx.subscribe(),
        );

        *task = Some(tokio::spawn(poller.run()));
    }

    /// Ask the poll task to stop before its next cycle
    ///
    /// Pending pacing and backoff sleeps end immediately. Handlers already
    /// running are not cancelled.
    pub fn stop(&self) {
        self.inner.stop_tx.send_replace(true);
    }

    /// Stop polling and wait for the poll task to exit
    ///
    /// With `wait` enabled this includes the batch in progress. Every
    /// concurrent caller, on any clone, returns only after the poll task has
    /// exited.
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(queue = %self.inner.queue, error = %e, "Poll task ended abnormally");
                }
                self.inner.exited.send_replace(true);
                info!(queue = %self.inner.queue, "Queue client shut down");
            }
            None if self.is_started() => {
                // Another caller owns the join handle
                let mut exited = self.inner.exited.subscribe();
                let _ = exited.wait_for(|exited| *exited).await;
            }
            None => {}
        }
    }

    /// Check whether polling has been started
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Check whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    pub fn queue_url(&self) -> &QueueUrl {
        &self.inner.queue
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.inner.queue)
            .field("started", &self.is_started())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
