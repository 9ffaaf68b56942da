use std::time::Duration;
use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::runtime::Runtime;

use a2a_task_manager::{EchoAgent, NatsTransportFactory, ServerBuilder};

/// A2A task manager serving the echo agent over NATS
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// NATS server to connect to
    #[arg(long, env = "A2A_NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Subject the agent listens on for JSON-RPC requests
    #[arg(long, env = "A2A_SUBJECT", default_value = "a2a.agent")]
    subject: String,

    #[arg(long, env = "A2A_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    connect_timeout_secs: u64,

    /// Events buffered per subscriber before it is dropped as lagging
    #[arg(long, env = "A2A_SUBSCRIBER_CAPACITY", default_value_t = 256)]
    subscriber_capacity: usize,

    /// Delay between streamed echo chunks
    #[arg(long, env = "A2A_CHUNK_DELAY_MS", default_value_t = 50)]
    chunk_delay_ms: u64,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let cli = Cli::parse();
    info!("Starting A2A task manager on {} ({})", cli.subject, cli.nats_url);

    let runtime = Runtime::new()?;

    let server = ServerBuilder::new()
        .with_agent_name("Echo Agent")
        .with_agent_description("Echoes text back, streaming it word by word")
        .with_agent_url(format!("{}/{}", cli.nats_url, cli.subject))
        .with_skill(EchoAgent::skill())
        .with_adapter(EchoAgent::new().with_chunk_delay(Duration::from_millis(cli.chunk_delay_ms)))
        .with_subscriber_capacity(cli.subscriber_capacity)
        .with_transport_factory(NatsTransportFactory::new(
            &cli.nats_url,
            &cli.subject,
            Duration::from_secs(cli.connect_timeout_secs),
        ))
        .with_runtime(runtime)
        .build()?;

    // Run server until shutdown signal
    server.run_until_shutdown()?;

    Ok(())
}
