use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use relay_core::ExchangeType;

use crate::error::Result;

/// Parameters for an exchange declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDecl {
    pub name: String,
    pub exchange_type: ExchangeType,
    pub durable: bool,
    pub arguments: Map<String, Value>,
}

/// Parameters for a queue declaration. Arguments stay in wire form
/// (`x-*` keys); implementations parse the keys they understand.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDecl {
    pub name: String,
    pub durable: bool,
    pub arguments: Map<String, Value>,
}

/// The queue arguments the relay relies on, parsed out of a declaration's
/// argument map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueArguments {
    pub delivery_limit: Option<u32>,
    pub message_ttl_ms: Option<u64>,
    pub dead_letter_exchange: Option<String>,
    pub queue_type: Option<String>,
}

impl QueueArguments {
    pub fn from_map(arguments: &Map<String, Value>) -> Self {
        QueueArguments {
            delivery_limit: arguments
                .get("x-delivery-limit")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            message_ttl_ms: arguments.get("x-message-ttl").and_then(Value::as_u64),
            dead_letter_exchange: arguments
                .get("x-dead-letter-exchange")
                .and_then(Value::as_str)
                .map(str::to_string),
            queue_type: arguments
                .get("x-queue-type")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Outcome a consumer reports for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Ack,
    Reject,
}

/// One message handed to a consumer.
///
/// Exactly one of `ack`/`reject` must be called. Dropping a delivery
/// unresolved counts as a reject: a consumer that dies mid-message must
/// not silently consume it.
#[derive(Debug)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// How many times this message has been delivered, including this one.
    pub delivery_count: u32,
    pub redelivered: bool,
    done: Option<oneshot::Sender<Resolution>>,
}

impl Delivery {
    pub(crate) fn new(
        routing_key: String,
        body: Vec<u8>,
        content_type: String,
        delivery_count: u32,
        done: oneshot::Sender<Resolution>,
    ) -> Self {
        Delivery {
            routing_key,
            body,
            content_type,
            delivery_count,
            redelivered: delivery_count > 1,
            done: Some(done),
        }
    }

    /// Acknowledge the delivery; the broker forgets the message.
    pub fn ack(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Resolution::Ack);
        }
    }

    /// Reject the delivery; the broker applies the queue's dead-letter
    /// policy (retry ping-pong, then parking once the delivery limit is
    /// exhausted).
    pub fn reject(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Resolution::Reject);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Resolution::Reject);
        }
    }
}

/// The broker contract the relay depends on. Kept to the operations in
/// use: idempotent declarations, binding, publishing, and consuming.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn exchange_declare(&self, decl: &ExchangeDecl) -> Result<()>;

    async fn queue_declare(&self, decl: &QueueDecl) -> Result<()>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Start consuming a queue. At most one consumer per queue; deliveries
    /// arrive on the returned channel with at most `prefetch` unresolved
    /// at a time.
    async fn consume(&self, queue: &str, prefetch: usize) -> Result<mpsc::Receiver<Delivery>>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}
