use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use relay_core::Packet;

use crate::error::{DispatchError, Result};

/// Normal handler result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HandlerResponse {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HandlerResponse {
    pub fn ok() -> Self {
        HandlerResponse {
            result: true,
            data: None,
        }
    }
}

/// Result type for packet handlers.
pub type HandlerResult = std::result::Result<HandlerResponse, String>;

/// A unit of work bound to one topic pattern.
///
/// `handle` must be idempotent: the at-least-once delivery contract means
/// a handler can see the same packet more than once, and a failing
/// co-handler on the same message retries the whole message.
///
/// Handlers can be invoked directly in tests; the dispatcher adds
/// matching, identifier extraction, and the time limit.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Unique registration key; also the task-name component of queue
    /// names when the handler consumes standalone.
    fn name(&self) -> &str;

    /// The topic pattern this handler subscribes to. May contain `*`
    /// wildcard segments.
    fn packet(&self) -> &Packet;

    /// Hard execution deadline enforced by the dispatcher.
    fn time_limit(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn handle(&self, identifier: Option<String>, kwargs: &Map<String, Value>)
        -> HandlerResult;
}

/// Explicit handler registration table.
///
/// Built by the application at startup and handed to the dispatcher by
/// reference; registration stays possible after dispatcher construction,
/// up to the first consumed message.
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn PacketHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler. Name collisions are rejected: two handlers
    /// sharing a name would corrupt queue binding.
    pub fn register(&self, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(DispatchError::DuplicateHandler(handler.name().to_string()));
        }
        handlers.push(handler);
        Ok(())
    }

    /// Snapshot of the registered handlers.
    pub fn handlers(&self) -> Vec<Arc<dyn PacketHandler>> {
        self.handlers.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Demo handler that returns its kwargs untouched.
pub struct EchoHandler {
    name: String,
    packet: Packet,
}

impl EchoHandler {
    pub fn new(name: impl Into<String>, topic_pattern: impl Into<String>) -> Self {
        EchoHandler {
            name: name.into(),
            packet: Packet::signal(topic_pattern, &[]),
        }
    }
}

#[async_trait]
impl PacketHandler for EchoHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn packet(&self) -> &Packet {
        &self.packet
    }

    async fn handle(
        &self,
        _identifier: Option<String>,
        kwargs: &Map<String, Value>,
    ) -> HandlerResult {
        Ok(HandlerResponse {
            result: true,
            data: Some(Value::Object(kwargs.clone())),
        })
    }
}
