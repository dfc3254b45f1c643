//! broker: serve HTTP requests through YAML-configured pipes

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broker::config::load_file;
use broker::executor::traits::PluginRegistry;
use broker::server::{AppState, serve};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "api.yml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(long, default_value_t = 9110)]
    port: u16,

    /// Log filter, e.g. `debug` or `broker::executor=trace`
    #[arg(long, default_value = "info")]
    loglevel: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.loglevel) {
        eprintln!("Invalid log level '{}': {}", args.loglevel, e);
        return ExitCode::FAILURE;
    }

    let registry = match PluginRegistry::with_builtins() {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Cannot register plugins");
            return ExitCode::FAILURE;
        }
    };

    let config = match load_file(&args.config, &registry) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "Cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        config = %args.config.display(),
        pipes = config.pipes.len(),
        init = config.init.is_some(),
        "Configuration loaded"
    );

    // Plugins may block, so init runs off the async workers like requests do.
    let state = match tokio::task::spawn_blocking(move || AppState::initialize(config, registry)).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Init failed");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = serve(state, args.port).await {
        error!(port = args.port, error = %e, "Server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn init_tracing(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(filter)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
