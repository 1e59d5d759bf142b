use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use relay_core::{
    topic_is_concrete, Packet, PacketBody, PacketError, RuntimeEnv, CONTENT_TYPE_JSON,
};

use crate::broker::{ExchangeDecl, QueueDecl};
use crate::connection::BrokerConnection;
use crate::error::Result;

/// Declares packet topology and publishes packets over an injected
/// connection.
///
/// Transport errors propagate to the caller; retry is a queue property
/// (the dead-letter ping-pong), never a client behavior.
pub struct PacketPublisher {
    connection: Arc<BrokerConnection>,
    env: RuntimeEnv,
}

impl PacketPublisher {
    pub fn new(connection: Arc<BrokerConnection>, env: RuntimeEnv) -> Self {
        PacketPublisher { connection, env }
    }

    pub fn connection(&self) -> &Arc<BrokerConnection> {
        &self.connection
    }

    /// Declare the packet's primary exchange, and additionally the retry
    /// exchange when `fallback` is set. Idempotent.
    pub async fn declare_exchange(&self, packet: &Packet, fallback: bool) -> Result<()> {
        let channel = self.connection.channel().await?;
        channel
            .exchange_declare(&ExchangeDecl {
                name: packet.exchange_name(false),
                exchange_type: packet.exchange_type,
                durable: packet.durable,
                arguments: packet.extra_exchange_arguments.clone(),
            })
            .await?;
        if fallback {
            channel
                .exchange_declare(&ExchangeDecl {
                    name: packet.exchange_name(true),
                    exchange_type: packet.exchange_type,
                    durable: packet.durable,
                    arguments: Map::new(),
                })
                .await?;
        }
        Ok(())
    }

    /// Declare and bind both queues for a consuming task: the fallback
    /// queue first, so the primary's dead-letter target always exists
    /// before the primary queue can dead-letter into it.
    pub async fn declare_queue(&self, packet: &Packet, task_name: &str) -> Result<()> {
        self.declare_exchange(packet, true).await?;

        let channel = self.connection.channel().await?;
        for fallback in [true, false] {
            let params = packet.queue_params(task_name, fallback);
            channel
                .queue_declare(&QueueDecl {
                    name: params.name.clone(),
                    durable: params.durable,
                    arguments: params.arguments.clone(),
                })
                .await?;
            channel
                .queue_bind(&params.name, &params.exchange, &params.routing_key)
                .await?;
        }
        Ok(())
    }

    /// Publish a packet body on the packet's topic.
    ///
    /// Refuses wildcard topics before any network call. In the dev
    /// environment nothing is sent, so local runs never pollute shared
    /// broker state.
    pub async fn send(
        &self,
        packet: &Packet,
        identifier: impl Into<String>,
        kwargs: Map<String, Value>,
    ) -> Result<()> {
        if !topic_is_concrete(&packet.topic) {
            return Err(PacketError::WildcardTopic(packet.topic.clone()).into());
        }

        if self.env.is_dev() {
            debug!(topic = %packet.topic, "Packet sending disabled in dev environment");
            return Ok(());
        }

        self.declare_exchange(packet, false).await?;

        let body = PacketBody::new(identifier, kwargs).encode()?;
        let channel = self.connection.channel().await?;
        channel
            .publish(
                &packet.exchange_name(false),
                &packet.topic,
                body,
                CONTENT_TYPE_JSON,
            )
            .await?;

        info!(topic = %packet.topic, "Packet published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnector;
    use crate::error::BrokerError;
    use crate::memory::MemoryBroker;
    use serde_json::json;

    fn publisher_with_broker(env: RuntimeEnv) -> (PacketPublisher, MemoryBroker) {
        let broker = MemoryBroker::new();
        let connection = Arc::new(BrokerConnection::new(Arc::new(MemoryConnector::new(
            broker.clone(),
        ))));
        (PacketPublisher::new(connection, env), broker)
    }

    #[tokio::test]
    async fn test_send_publishes_to_bound_queue() {
        let (publisher, broker) = publisher_with_broker(RuntimeEnv::Test);

        let receiver = Packet::signal("sap.#", &["identifier"]);
        publisher.declare_queue(&receiver, "tests.LambdaWorker").await.unwrap();

        let sender = Packet::signal("sap.app.X.user.created", &["identifier"]);
        let mut kwargs = Map::new();
        kwargs.insert("timestamp".to_string(), json!(1700000000));
        publisher.send(&sender, "X", kwargs).await.unwrap();

        let queue = receiver.queue_name("tests.LambdaWorker", false);
        assert_eq!(broker.queue_depth(&queue), 1);

        let channel = publisher.connection().channel().await.unwrap();
        let mut rx = channel.consume(&queue, 1).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "sap.app.X.user.created");
        assert_eq!(delivery.content_type, "application/json");

        let body = PacketBody::decode(&delivery.body).unwrap();
        assert_eq!(body.identifier.as_deref(), Some("X"));
        assert_eq!(body.kwargs["timestamp"], json!(1700000000));
        delivery.ack();
    }

    #[tokio::test]
    async fn test_send_refuses_wildcard_topic() {
        let (publisher, _broker) = publisher_with_broker(RuntimeEnv::Test);
        let packet = Packet::signal("sap.#", &[]);
        let err = publisher.send(&packet, "X", Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Packet(PacketError::WildcardTopic(_))
        ));

        let packet = Packet::signal("sap.*.created", &[]);
        assert!(publisher.send(&packet, "X", Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_dev_env_suppresses_publish() {
        let (publisher, broker) = publisher_with_broker(RuntimeEnv::Dev);
        let packet = Packet::signal("sap.user.created", &[]);
        publisher.send(&packet, "X", Map::new()).await.unwrap();

        // No broker interaction at all: not even the exchange exists.
        assert!(!broker.has_exchange("packet.signal"));
    }

    #[tokio::test]
    async fn test_declare_queue_is_idempotent() {
        let (publisher, broker) = publisher_with_broker(RuntimeEnv::Test);
        let packet = Packet::signal("sap.user.created", &[]);

        publisher.declare_queue(&packet, "workerA").await.unwrap();
        publisher.declare_queue(&packet, "workerA").await.unwrap();

        assert_eq!(broker.binding_count("packet.signal"), 1);
        assert_eq!(broker.binding_count("packet.signal.retry"), 1);
    }

    #[tokio::test]
    async fn test_declare_queue_creates_retry_pair() {
        let (publisher, broker) = publisher_with_broker(RuntimeEnv::Test);
        let packet = Packet::signal("sap.user.created", &[]);
        publisher.declare_queue(&packet, "workerA").await.unwrap();

        assert!(broker.has_queue("signal:sap.user.created->workerA"));
        assert!(broker.has_queue("signal:sap.user.created->workerA@retry"));
        assert!(broker.has_exchange("packet.signal"));
        assert!(broker.has_exchange("packet.signal.retry"));
    }
}
