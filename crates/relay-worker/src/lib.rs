pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod heartbeat;

pub use config::WorkerConfig;
pub use dispatcher::PacketDispatcher;
pub use error::{DispatchError, Result};
pub use handler::{EchoHandler, HandlerRegistry, HandlerResponse, HandlerResult, PacketHandler};
pub use heartbeat::HeartbeatHandler;
