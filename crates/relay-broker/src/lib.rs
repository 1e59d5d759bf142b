mod broker;
mod connection;
mod error;
mod memory;
mod publisher;

pub use broker::{Broker, Delivery, ExchangeDecl, QueueArguments, QueueDecl};
pub use connection::{BrokerConnection, Connector, MemoryConnector};
pub use error::{BrokerError, Result};
pub use memory::MemoryBroker;
pub use publisher::PacketPublisher;
