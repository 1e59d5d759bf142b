use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_broker::{BrokerConnection, MemoryBroker, MemoryConnector, PacketPublisher};
use relay_core::{Packet, RuntimeEnv};
use relay_worker::handler::EchoHandler;
use relay_worker::heartbeat::HeartbeatHandler;
use relay_worker::{HandlerRegistry, PacketDispatcher, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "relay-worker")]
#[command(about = "Topic-routed packet worker", long_about = None)]
struct Args {
    /// Worker name (auto-generated if not provided)
    #[arg(long)]
    name: Option<String>,

    /// Per-queue unacknowledged message cap
    #[arg(short, long)]
    prefetch: Option<usize>,

    /// Topic patterns to bind and consume
    #[arg(short, long)]
    topic: Vec<String>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    if let Some(name) = args.name {
        config.name = Some(name);
    }
    if let Some(prefetch) = args.prefetch {
        config.prefetch = prefetch;
    }
    if !args.topic.is_empty() {
        config.bind_topics = args.topic;
    }

    let env = RuntimeEnv::from_process_env();
    let worker_name = config.worker_name();

    let connection = Arc::new(BrokerConnection::new(Arc::new(MemoryConnector::new(
        MemoryBroker::new(),
    ))));
    let publisher = Arc::new(PacketPublisher::new(connection, env));

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(HeartbeatHandler::new()))?;
    registry.register(Arc::new(EchoHandler::new("relay.Echo", "sap.echo.created")))?;

    tracing::info!(
        worker = %worker_name,
        env = ?env,
        handlers = ?registry.names(),
        "Starting packet worker"
    );

    let packets: Vec<Packet> = config
        .bind_topics
        .iter()
        .map(|topic| Packet::signal(topic.clone(), &[]))
        .collect();

    let dispatcher = Arc::new(PacketDispatcher::new(
        worker_name,
        packets,
        config.prefetch,
        registry,
        publisher,
    ));

    let shutdown_handle = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown_handle.shutdown();
    });

    dispatcher.run().await?;
    Ok(())
}
