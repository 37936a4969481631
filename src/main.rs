//! ONNX inference gateway binary.
//!
//! Assembles configuration (defaults, file, environment, CLI flags in
//! rising precedence), initializes logging, and runs the server on a
//! runtime sized by `server.threads`.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use onnx_gateway::config::LoggingConfig;
use onnx_gateway::{run_server, Config};

#[derive(Parser)]
#[command(name = "onnx-gateway")]
#[command(version)]
#[command(about = "ONNX inference gateway with dynamic batching and hot model reload")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Models directory (overrides config)
    #[arg(short, long)]
    models: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_file(&cli.config)?;
    config.apply_env();
    if let Some(models) = cli.models {
        config.models.directory = models;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting ONNX inference gateway"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run_server(config))
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("onnx_gateway={},tower_http=info", config.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}
