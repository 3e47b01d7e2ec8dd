//! Gatekeeper - policy-driven authorization service.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use gatekeeper::cli::Cli;
use gatekeeper::loader::LoaderSet;
use gatekeeper::registry::ServiceRegistry;
use gatekeeper::server::{AppState, Server};
use gatekeeper::setup_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let sources = cli.sources();
    let loaders = Arc::new(LoaderSet::new(cli.github_token.clone()));
    let registry = Arc::new(ServiceRegistry::new());

    // Startup load: a service that cannot answer correctly must not start.
    let configs = match loaders.load(&sources).await {
        Ok(configs) => configs,
        Err(e) => {
            error!("Failed to load policies: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = registry.load(&configs).await {
        error!("Failed to load policies: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cli.port,
        sources = ?sources,
        "Starting Gatekeeper"
    );

    let state = Arc::new(AppState {
        registry,
        loaders,
        sources,
    });

    if let Err(e) = Server::new(&cli.host, cli.port, state).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gatekeeper shutdown complete");
    ExitCode::SUCCESS
}
