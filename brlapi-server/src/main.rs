//! Host process entry point (spec.md §6): parses the CLI surface the
//! host daemon is expected to supply, wires up a driver and an auth
//! backend, and runs the server until a kill signal arrives.

mod arbitrator;
mod auth;
mod cli;
mod mainloop;
mod rawsuspend;
mod registry;
mod server;

use auth::{KeyfileAuthBackend, NoneAuthBackend};
use brlapi_core::driver::{AuthBackend, CoreTaskRunner, IdentityTextTable};
use brlapi_core::error::Result as CoreResult;
use brlapi_device::driver::ProcessDriver;
use clap::Parser;
use cli::{Cli, LogFormat};
use server::{Server, ServerOpts};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let auth_backend = build_auth_backend(&cli.auth)?;
    auth_backend.begin_server(&parse_auth_methods(&cli.auth)).await?;

    let driver = ProcessDriver::connect_unix(
        &cli.driver_socket,
        "brlapi-device",
        "generic",
        cli.display_size,
    )
    .await?;

    let opts = ServerOpts {
        host: cli.host,
        driver: Arc::new(driver),
        text_table: Arc::new(IdentityTextTable),
        auth_backend,
        core_task: Arc::new(InlineCoreTask),
    };

    let (server, handle) = Server::run(opts).await?;
    tracing::info!("server started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("kill signal received, shutting down");
    drop(handle);
    server.will_close().await;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::Layer::default().event_format(
                    tracing_subscriber::fmt::format().compact(),
                ))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::Layer::default()
                        .event_format(tracing_subscriber::fmt::format().json()),
                )
                .init();
        }
    }
}

fn parse_auth_methods(spec: &str) -> Vec<String> {
    spec.split('+').map(|s| s.trim().to_string()).collect()
}

/// `--auth none` or `--auth keyfile:<path>`; the first `keyfile:` entry
/// wins if several methods are offered.
fn build_auth_backend(spec: &str) -> anyhow::Result<Arc<dyn AuthBackend>> {
    for method in spec.split('+').map(str::trim) {
        if let Some(path) = method.strip_prefix("keyfile:") {
            return Ok(Arc::new(KeyfileAuthBackend::new(path.into())));
        }
    }
    Ok(Arc::new(NoneAuthBackend))
}

/// Runs the given closure inline; suitable when the host process has
/// no separate "core" thread whose event loop needs a hop.
struct InlineCoreTask;

#[async_trait::async_trait]
impl CoreTaskRunner for InlineCoreTask {
    async fn run_on_core_task(&self, _wait: bool, task: Box<dyn FnOnce() + Send>) -> CoreResult<()> {
        task();
        Ok(())
    }
}
