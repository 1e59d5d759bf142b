use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::topic::topic_namespace;
use crate::{DELIVERY_LIMIT, RETRY_TTL_MS};

/// Exchange types the relay understands. Routing is topic-based
/// everywhere; the enum exists so declarations carry an explicit type on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Topic => "topic",
        }
    }
}

/// Parameters used to declare and bind one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueParams {
    pub name: String,
    pub exchange: String,
    pub routing_key: String,
    pub durable: bool,
    pub arguments: Map<String, Value>,
}

/// A named topic plus its publish/subscribe topology.
///
/// A packet is declared once per logical signal type and reused across
/// publish calls. Consumers subscribe with packets whose topic may carry
/// wildcard segments; producers publish on packets with concrete topics.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub topic: String,
    pub namespace: String,
    /// Expected kwarg names. Documentation only, never validated.
    pub providing_args: Vec<String>,
    pub durable: bool,
    pub exchange_type: ExchangeType,
    /// Discriminates the exchange/queue naming namespace, e.g. "signal".
    pub event_type: String,
    pub extra_exchange_arguments: Map<String, Value>,
    pub extra_queue_arguments: Map<String, Value>,
}

impl Packet {
    /// A durable topic packet under the "signal" event type. This is the
    /// only concrete variant in use.
    pub fn signal(topic: impl Into<String>, providing_args: &[&str]) -> Self {
        let topic = topic.into();
        let namespace = topic_namespace(&topic).to_string();
        Packet {
            topic,
            namespace,
            providing_args: providing_args.iter().map(|s| s.to_string()).collect(),
            durable: true,
            exchange_type: ExchangeType::Topic,
            event_type: "signal".to_string(),
            extra_exchange_arguments: Map::new(),
            extra_queue_arguments: Map::new(),
        }
    }

    /// Attach broker-specific exchange tuning (e.g. delay plugins).
    /// Only meant to be called at definition time.
    pub fn with_exchange_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.extra_exchange_arguments = arguments;
        self
    }

    /// Attach broker-specific queue tuning. Only meant to be called at
    /// definition time.
    pub fn with_queue_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.extra_queue_arguments = arguments;
        self
    }

    /// Exchange name: `packet.{event_type}`, with a `.retry` suffix for
    /// the exchange dead packets are transferred to.
    pub fn exchange_name(&self, fallback: bool) -> String {
        let suffix = if fallback { ".retry" } else { "" };
        format!("packet.{}{}", self.event_type, suffix)
    }

    /// Queue name: `{event_type}:{topic}->{task_name}`, with an `@retry`
    /// suffix for the queue dead packets are transferred to.
    pub fn queue_name(&self, task_name: &str, fallback: bool) -> String {
        let suffix = if fallback { "@retry" } else { "" };
        format!("{}:{}->{}{}", self.event_type, self.topic, task_name, suffix)
    }

    /// Arguments for the primary or fallback queue.
    ///
    /// The pair forms a ping-pong: the primary queue dead-letters into the
    /// retry exchange after `x-delivery-limit` rejections per pass, and
    /// the fallback queue's `x-message-ttl` expiry dead-letters the
    /// message back into the primary exchange for redelivery.
    pub fn queue_arguments(&self, fallback: bool) -> Map<String, Value> {
        let mut args = Map::new();
        // The dead-letter target is always the opposite exchange.
        args.insert(
            "x-dead-letter-exchange".to_string(),
            json!(self.exchange_name(!fallback)),
        );
        if fallback {
            args.insert("x-message-ttl".to_string(), json!(RETRY_TTL_MS));
        } else {
            args.insert("x-delivery-limit".to_string(), json!(DELIVERY_LIMIT));
            args.insert("x-queue-type".to_string(), json!("quorum"));
            for (key, value) in &self.extra_queue_arguments {
                args.insert(key.clone(), value.clone());
            }
        }
        args
    }

    /// Everything needed to declare and bind one of the packet's queues
    /// for a consuming task.
    pub fn queue_params(&self, task_name: &str, fallback: bool) -> QueueParams {
        QueueParams {
            name: self.queue_name(task_name, fallback),
            exchange: self.exchange_name(fallback),
            routing_key: self.topic.clone(),
            durable: true,
            arguments: self.queue_arguments(fallback),
        }
    }
}
