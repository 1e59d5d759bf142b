use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::broker::{Broker, Delivery, ExchangeDecl, QueueArguments, QueueDecl, Resolution};
use crate::error::{BrokerError, Result};

/// In-memory broker implementing the topic-exchange semantics the
/// external broker provides in production.
///
/// The retry topology is fully emulated: topic bindings (including the
/// broker-native `#` wildcard), per-queue delivery limits with parking
/// once exhausted, and TTL queues that dead-letter into their configured
/// exchange when the TTL elapses. This keeps the whole failure chain
/// testable in-process.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
    /// Open flag of this logical channel. Clones share it; `channel()`
    /// opens a fresh one onto the same broker state.
    open: Arc<AtomicBool>,
}

struct Inner {
    exchanges: DashMap<String, ExchangeState>,
    queues: DashMap<String, Arc<QueueState>>,
}

struct ExchangeState {
    decl: ExchangeDecl,
    /// (queue name, binding pattern) pairs; duplicates coalesce.
    bindings: Mutex<Vec<(String, String)>>,
}

struct QueueState {
    args: QueueArguments,
    tx: mpsc::UnboundedSender<QueuedMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedMessage>>>,
    depth: AtomicUsize,
    /// Messages that exhausted the delivery limit. Operator-visible.
    parked: Mutex<Vec<QueuedMessage>>,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    routing_key: String,
    body: Vec<u8>,
    content_type: String,
    /// Times this message has been delivered to a consumer so far.
    delivery_count: u32,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker {
            inner: Arc::new(Inner {
                exchanges: DashMap::new(),
                queues: DashMap::new(),
            }),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open a fresh logical channel onto the same broker state. Closing
    /// a channel never affects other channels.
    pub fn channel(&self) -> Self {
        MemoryBroker {
            inner: Arc::clone(&self.inner),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of messages waiting in a queue (delivered-but-unresolved
    /// messages excluded).
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of poison messages parked on a queue after exhausting its
    /// delivery limit.
    pub fn parked_count(&self, queue: &str) -> usize {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.parked.lock().len())
            .unwrap_or(0)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.inner.exchanges.contains_key(exchange)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.queues.contains_key(queue)
    }

    pub fn binding_count(&self, exchange: &str) -> usize {
        self.inner
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.lock().len())
            .unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Route a message through an exchange to every queue whose binding
    /// pattern matches the routing key. Unrouted messages are dropped,
    /// as the real broker does.
    fn route(self: &Arc<Self>, exchange: &str, message: QueuedMessage) -> Result<()> {
        let targets: Vec<String> = {
            let state = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
            let bindings = state.bindings.lock();
            bindings
                .iter()
                .filter(|(_, pattern)| exchange_topic_matches(pattern, &message.routing_key))
                .map(|(queue, _)| queue.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!(
                exchange,
                routing_key = %message.routing_key,
                "Message matched no bindings, dropped"
            );
            return Ok(());
        }

        for queue in targets {
            self.enqueue(&queue, message.clone());
        }
        Ok(())
    }

    fn enqueue(self: &Arc<Self>, queue: &str, message: QueuedMessage) {
        let Some(state) = self.queues.get(queue).map(|q| Arc::clone(&q)) else {
            // Binding to a deleted queue; drop.
            return;
        };

        // A queue with a TTL and a dead-letter exchange is a parking
        // queue: messages sit for the TTL, then return to the exchange.
        if let (Some(ttl), Some(dlx)) = (
            state.args.message_ttl_ms,
            state.args.dead_letter_exchange.clone(),
        ) {
            state.depth.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ttl)).await;
                state.depth.fetch_sub(1, Ordering::SeqCst);
                if let Err(err) = inner.route(&dlx, message) {
                    warn!(exchange = %dlx, "TTL dead-letter failed: {err}");
                }
            });
            return;
        }

        state.depth.fetch_add(1, Ordering::SeqCst);
        // Receiver half lives as long as the queue state; send cannot fail
        // while the queue exists.
        let _ = state.tx.send(message);
    }

    /// Apply a queue's dead-letter policy to a rejected message.
    fn dead_letter(self: &Arc<Self>, queue: &str, state: &QueueState, message: QueuedMessage) {
        if let Some(limit) = state.args.delivery_limit {
            if message.delivery_count >= limit {
                warn!(
                    queue,
                    routing_key = %message.routing_key,
                    deliveries = message.delivery_count,
                    "Delivery limit exhausted, message parked"
                );
                state.parked.lock().push(message);
                return;
            }
        }
        match &state.args.dead_letter_exchange {
            Some(dlx) => {
                if let Err(err) = self.route(dlx, message) {
                    warn!(queue, exchange = %dlx, "Dead-letter routing failed: {err}");
                }
            }
            None => {
                debug!(queue, "Rejected message has no dead-letter exchange, dropped");
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn exchange_declare(&self, decl: &ExchangeDecl) -> Result<()> {
        self.ensure_open()?;
        // Redeclaration keeps the original; declarations are idempotent.
        self.inner
            .exchanges
            .entry(decl.name.clone())
            .or_insert_with(|| ExchangeState {
                decl: decl.clone(),
                bindings: Mutex::new(Vec::new()),
            });
        Ok(())
    }

    async fn queue_declare(&self, decl: &QueueDecl) -> Result<()> {
        self.ensure_open()?;
        self.inner.queues.entry(decl.name.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(QueueState {
                args: QueueArguments::from_map(&decl.arguments),
                tx,
                rx: Mutex::new(Some(rx)),
                depth: AtomicUsize::new(0),
                parked: Mutex::new(Vec::new()),
            })
        });
        Ok(())
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.inner.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let state = self
            .inner
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
        let mut bindings = state.bindings.lock();
        let binding = (queue.to_string(), routing_key.to_string());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.inner.route(
            exchange,
            QueuedMessage {
                routing_key: routing_key.to_string(),
                body,
                content_type: content_type.to_string(),
                delivery_count: 0,
            },
        )
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Result<mpsc::Receiver<Delivery>> {
        self.ensure_open()?;
        let state = self
            .inner
            .queues
            .get(queue)
            .map(|q| Arc::clone(&q))
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let mut rx = state
            .rx
            .lock()
            .take()
            .ok_or_else(|| BrokerError::QueueBusy(queue.to_string()))?;

        let (delivery_tx, delivery_rx) = mpsc::channel(prefetch.max(1));
        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();

        tokio::spawn(async move {
            while let Some(mut message) = rx.recv().await {
                state.depth.fetch_sub(1, Ordering::SeqCst);
                message.delivery_count += 1;

                let (done_tx, done_rx) = oneshot::channel();
                let delivery = Delivery::new(
                    message.routing_key.clone(),
                    message.body.clone(),
                    message.content_type.clone(),
                    message.delivery_count,
                    done_tx,
                );

                if delivery_tx.send(delivery).await.is_err() {
                    // Consumer dropped the stream; requeue and stop.
                    message.delivery_count -= 1;
                    state.depth.fetch_add(1, Ordering::SeqCst);
                    let _ = state.tx.send(message);
                    *state.rx.lock() = Some(rx);
                    break;
                }

                match done_rx.await {
                    Ok(Resolution::Ack) => {}
                    // Reject, or the delivery was dropped unresolved.
                    _ => inner.dead_letter(&queue, &state, message),
                }
            }
        });

        Ok(delivery_rx)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Topic matching as the broker's own exchange performs it: `*` matches
/// exactly one segment, `#` matches zero or more.
fn exchange_topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    matches_rec(&pattern, &topic)
}

fn matches_rec(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.first(), topic.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            matches_rec(&pattern[1..], topic)
                || (!topic.is_empty() && matches_rec(pattern, &topic[1..]))
        }
        (Some(&"*"), Some(_)) => matches_rec(&pattern[1..], &topic[1..]),
        (Some(a), Some(b)) if a == b => matches_rec(&pattern[1..], &topic[1..]),
        _ => false,
    }
}
