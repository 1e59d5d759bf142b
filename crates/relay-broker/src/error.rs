use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection is closed")]
    ConnectionClosed,

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already has a consumer: {0}")]
    QueueBusy(String),

    #[error(transparent)]
    Packet(#[from] relay_core::PacketError),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
