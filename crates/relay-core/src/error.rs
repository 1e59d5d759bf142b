use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Topic '{0}' contains wildcard characters and cannot be published to")]
    WildcardTopic(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PacketError>;
