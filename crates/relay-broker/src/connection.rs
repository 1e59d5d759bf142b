use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::broker::Broker;
use crate::error::Result;
use crate::memory::MemoryBroker;

/// Establishes broker channels. The composition root picks the
/// implementation; everything else depends on the trait.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Broker>>;
}

/// Connector backed by a shared in-memory broker. Every connect returns
/// a channel onto the same broker state, like processes sharing one
/// broker host.
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        MemoryConnector { broker }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(self.broker.channel()))
    }
}

struct Channel {
    broker: Arc<dyn Broker>,
    /// Process id at connect time. A changed pid means the handle was
    /// inherited across a fork and must not be reused.
    pid: u32,
}

/// One logical broker channel, lazily created and cached.
///
/// Owned by the application's composition root and passed by reference
/// into publishers and dispatchers. The cached channel is re-established
/// when it reports closed or when the process identity changed since
/// connect. Concurrent callers serialize on the internal lock, so one
/// channel is never driven from two tasks at once.
pub struct BrokerConnection {
    connector: Arc<dyn Connector>,
    state: Mutex<Option<Channel>>,
}

impl BrokerConnection {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        BrokerConnection {
            connector,
            state: Mutex::new(None),
        }
    }

    /// Current channel, connecting or reconnecting as needed.
    pub async fn channel(&self) -> Result<Arc<dyn Broker>> {
        let mut state = self.state.lock().await;

        if let Some(channel) = state.as_ref() {
            if channel.pid == std::process::id() && channel.broker.is_open() {
                return Ok(Arc::clone(&channel.broker));
            }
            info!("Cached broker channel is stale, reconnecting");
            *state = None;
        }

        let broker = self.connector.connect().await?;
        *state = Some(Channel {
            broker: Arc::clone(&broker),
            pid: std::process::id(),
        });
        Ok(broker)
    }

    /// Close the cached channel, if any. The next `channel()` call
    /// reconnects.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(channel) = state.take() {
            channel.broker.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_is_cached() {
        let broker = MemoryBroker::new();
        let conn = BrokerConnection::new(Arc::new(MemoryConnector::new(broker)));

        let a = conn.channel().await.unwrap();
        let b = conn.channel().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let broker = MemoryBroker::new();
        let conn = BrokerConnection::new(Arc::new(MemoryConnector::new(broker)));

        let a = conn.channel().await.unwrap();
        conn.close().await.unwrap();
        let b = conn.channel().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(b.is_open());
    }

    #[tokio::test]
    async fn test_reconnects_when_channel_reports_closed() {
        let broker = MemoryBroker::new();
        let conn = BrokerConnection::new(Arc::new(MemoryConnector::new(broker)));

        let a = conn.channel().await.unwrap();
        a.close().await.unwrap();
        let b = conn.channel().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
