mod body;
mod env;
mod error;
mod packet;
mod topic;

pub use body::PacketBody;
pub use env::RuntimeEnv;
pub use error::{PacketError, Result};
pub use packet::{ExchangeType, Packet, QueueParams};
pub use topic::{topic_is_concrete, topic_matches, topic_namespace};

/// Delivery attempts allowed on a primary queue before the message is
/// parked for operator intervention.
pub const DELIVERY_LIMIT: u32 = 5;

/// How long a dead-lettered message sits in the retry queue before it is
/// returned to the primary exchange (6 hours).
pub const RETRY_TTL_MS: u64 = 1000 * 60 * 60 * 6;

/// Content type of every packet body on the wire.
pub const CONTENT_TYPE_JSON: &str = "application/json";
