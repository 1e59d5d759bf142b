use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info};

use relay_broker::{Delivery, PacketPublisher};
use relay_core::{topic_matches, Packet, PacketBody};

use crate::error::{DispatchError, Result};
use crate::handler::HandlerRegistry;

/// Broker consumer that fans deliveries out to registered handlers.
///
/// The dispatcher binds one primary/fallback queue pair per configured
/// packet (typically a single broad pattern like `sap.#`), consumes the
/// primary queues, and re-checks each delivery's routing key against
/// every handler's pattern in-process, because one queue aggregates many
/// handler patterns.
///
/// Acknowledgment is two-phase: a message is acked only after every
/// matched handler completed within its time limit. Any failure rejects
/// the whole message into the retry chain, so handlers that already
/// succeeded on that message may run again on redelivery.
pub struct PacketDispatcher {
    name: String,
    packets: Vec<Packet>,
    prefetch: usize,
    registry: Arc<HandlerRegistry>,
    publisher: Arc<PacketPublisher>,
    shutdown: Arc<Notify>,
}

impl PacketDispatcher {
    pub fn new(
        name: impl Into<String>,
        packets: Vec<Packet>,
        prefetch: usize,
        registry: Arc<HandlerRegistry>,
        publisher: Arc<PacketPublisher>,
    ) -> Self {
        PacketDispatcher {
            name: name.into(),
            packets,
            prefetch,
            registry,
            publisher,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Declare the queue pair for every configured packet and return the
    /// primary queue names. Only primary queues are consumed; fallback
    /// queues exist to hold dead-lettered messages through their TTL.
    pub async fn declare_queues(&self) -> Result<Vec<String>> {
        let mut primaries = Vec::with_capacity(self.packets.len());
        for packet in &self.packets {
            self.publisher.declare_queue(packet, &self.name).await?;
            primaries.push(packet.queue_name(&self.name, false));
        }
        Ok(primaries)
    }

    /// Consume until shutdown. Handler registration is frozen in effect
    /// once the first message arrives.
    pub async fn run(&self) -> Result<()> {
        let queues = self.declare_queues().await?;
        let channel = self.publisher.connection().channel().await?;

        info!(
            worker = %self.name,
            queues = queues.len(),
            handlers = self.registry.len(),
            "Dispatcher starting"
        );

        let mut joins = Vec::with_capacity(queues.len());
        for queue in queues {
            let mut deliveries = channel.consume(&queue, self.prefetch).await?;
            let registry = Arc::clone(&self.registry);
            let shutdown = Arc::clone(&self.shutdown);
            let worker = self.name.clone();

            joins.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => {
                            debug!(worker = %worker, queue = %queue, "Consumer stopping");
                            break;
                        }
                        delivery = deliveries.recv() => {
                            let Some(delivery) = delivery else { break };
                            dispatch_delivery(&worker, &registry, delivery).await;
                        }
                    }
                }
            }));
        }

        for join in joins {
            let _ = join.await;
        }
        Ok(())
    }

    /// Stop all consumer loops. In-flight handler executions finish
    /// their current message first.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

/// Execute every matching handler for one delivery, then resolve it.
async fn dispatch_delivery(worker: &str, registry: &HandlerRegistry, delivery: Delivery) {
    let routing_key = delivery.routing_key.clone();
    if delivery.redelivered {
        debug!(
            worker,
            topic = %routing_key,
            deliveries = delivery.delivery_count,
            "Consuming redelivered packet"
        );
    }

    match execute_matching(registry, &delivery).await {
        Ok(matched) => {
            if matched == 0 {
                debug!(worker, topic = %routing_key, "No handler matched, packet consumed");
            } else {
                debug!(worker, topic = %routing_key, matched, "Packet dispatched");
            }
            delivery.ack();
        }
        Err(err) => {
            error!(worker, topic = %routing_key, "Dispatch failed: {err}");
            delivery.reject();
        }
    }
}

/// Run every handler whose pattern matches the delivery's routing key.
/// Returns the number of matched handlers; the first failure aborts and
/// fails the whole message.
async fn execute_matching(
    registry: &HandlerRegistry,
    delivery: &Delivery,
) -> Result<usize> {
    let body = PacketBody::decode(&delivery.body)?;
    let identifier = body.dispatch_identifier();

    let mut matched = 0;
    for handler in registry.handlers() {
        if !topic_matches(&handler.packet().topic, &delivery.routing_key) {
            continue;
        }
        matched += 1;

        match timeout(
            handler.time_limit(),
            handler.handle(identifier.clone(), &body.kwargs),
        )
        .await
        {
            Ok(Ok(_response)) => {
                debug!(handler = handler.name(), topic = %delivery.routing_key, "Handler succeeded");
            }
            Ok(Err(message)) => {
                return Err(DispatchError::HandlerFailed {
                    name: handler.name().to_string(),
                    message,
                });
            }
            Err(_) => {
                return Err(DispatchError::HandlerTimeout {
                    name: handler.name().to_string(),
                });
            }
        }
    }
    Ok(matched)
}
