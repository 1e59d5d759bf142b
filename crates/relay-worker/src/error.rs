use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("A handler named '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },

    #[error("Handler '{name}' exceeded its time limit")]
    HandlerTimeout { name: String },

    #[error(transparent)]
    Packet(#[from] relay_core::PacketError),

    #[error(transparent)]
    Broker(#[from] relay_broker::BrokerError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
