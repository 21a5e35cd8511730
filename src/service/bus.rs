use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type ConsumerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handles one message delivered to an address.
pub type ConsumerFn = Arc<dyn Fn(Message) -> ConsumerFuture + Send + Sync>;

type Reply = oneshot::Sender<Result<serde_json::Value, String>>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("No consumer registered at {0}")]
    NoConsumer(String),

    #[error("Request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("Request to {address} failed: {message}")]
    Failed { address: String, message: String },
}

/// A message travelling on the bus.
#[derive(Debug)]
pub struct Message {
    address: String,
    action: Option<String>,
    body: serde_json::Value,
    reply: Option<Reply>,
}

impl Message {
    pub fn new(address: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            address: address.into(),
            action: None,
            body,
            reply: None,
        }
    }

    /// Names the operation a service proxy should invoke.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answers a request; a no-op for fire-and-forget messages.
    pub fn reply(mut self, result: Result<serde_json::Value, String>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Keeps a consumer registered; unregisters it when cancelled.
#[derive(Debug)]
pub struct ConsumerHandle {
    address: String,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn unregister(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// The message channel services and proxies talk over.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    fn register_consumer(&self, address: &str, handler: ConsumerFn) -> ConsumerHandle;

    /// Point-to-point delivery to one consumer of the address.
    fn send(&self, message: Message) -> Result<(), BusError>;

    /// Delivery to every consumer of the address; returns how many got it.
    fn publish(&self, address: &str, body: serde_json::Value) -> usize;

    async fn request(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError>;
}

/// In-process bus: one channel per consumer, round-robin for `send`.
#[derive(Default)]
pub struct LocalEventBus {
    consumers: Arc<DashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
    cursor: AtomicUsize,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer_count(&self, address: &str) -> usize {
        self.consumers
            .get(address)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn live_senders(&self, address: &str) -> Vec<mpsc::UnboundedSender<Message>> {
        let Some(mut senders) = self.consumers.get_mut(address) else {
            return Vec::new();
        };
        senders.retain(|s| !s.is_closed());
        senders.clone()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    fn register_consumer(&self, address: &str, handler: ConsumerFn) -> ConsumerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.consumers
            .entry(address.to_string())
            .or_default()
            .push(tx);

        let addr = address.to_string();
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                // Each delivery runs on its own task so a panicking handler
                // only loses that one message.
                let delivery = tokio::spawn(handler(message));
                if let Err(e) = delivery.await {
                    tracing::error!(address = %addr, error = %e, "consumer panicked");
                }
            }
        });

        ConsumerHandle {
            address: address.to_string(),
            task,
        }
    }

    fn send(&self, message: Message) -> Result<(), BusError> {
        let senders = self.live_senders(&message.address);
        if senders.is_empty() {
            return Err(BusError::NoConsumer(message.address));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % senders.len();
        senders[index]
            .send(message)
            .map_err(|e| BusError::NoConsumer(e.0.address))
    }

    fn publish(&self, address: &str, body: serde_json::Value) -> usize {
        self.live_senders(address)
            .iter()
            .filter(|tx| tx.send(Message::new(address, body.clone())).is_ok())
            .count()
    }

    async fn request(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let address = message.address.clone();
        let (tx, rx) = oneshot::channel();
        message.reply = Some(tx);
        self.send(message)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(BusError::Failed { address, message }),
            Ok(Err(_)) => Err(BusError::Failed {
                address,
                message: "consumer dropped the request".to_string(),
            }),
            Err(_) => Err(BusError::Timeout { address, timeout }),
        }
    }
}

/// Wraps an async closure as a [`ConsumerFn`].
pub fn consumer<F, Fut>(handler: F) -> ConsumerFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message: Message| -> ConsumerFuture { Box::pin(handler(message)) })
}
