use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use events_agent::api::{ClientOptions, EventsApiClient};
use events_agent::config::AgentConfig;
use events_agent::publish::JsonLinesPublisher;
use events_agent::server;
use events_agent::supervisor::{Supervisor, check_scope};

#[derive(Parser, Debug)]
#[command(name = "events-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "events-agent.toml")]
    config: PathBuf,

    /// Log filter directive, e.g. `debug` or `events_agent=trace`.
    /// Overrides `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,

    /// Serve the status endpoints on this address.
    #[arg(long)]
    status_addr: Option<SocketAddr>,

    /// Append events to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Validate the configuration and token scopes, then exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config = AgentConfig::load(&cli.config)
        .with_context(|| format!("invalid config {}", cli.config.display()))?;
    if cli.status_addr.is_some() {
        config.status_addr = cli.status_addr;
    }
    if cli.output.is_some() {
        config.output = cli.output;
    }

    if cli.check_config {
        for stream in &config.streams {
            check_scope(stream)?;
        }
        tracing::info!(streams = config.streams.len(), "Configuration is valid");
        return Ok(());
    }

    let config = Arc::new(config);
    let client = EventsApiClient::new(ClientOptions {
        api_host: config.api_host.clone(),
        insecure_skip_verify: config.insecure_skip_verify,
        ..ClientOptions::default()
    })?;
    if config.insecure_skip_verify {
        tracing::warn!("TLS certificate verification is disabled");
    }

    let publisher = match &config.output {
        Some(path) => JsonLinesPublisher::open(path).await?,
        None => JsonLinesPublisher::stdout(),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let supervisor = Supervisor::new(Arc::clone(&config), Arc::new(client), publisher);

    let status_server = config.status_addr.map(|addr| {
        let status = supervisor.status();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, status, shutdown).await {
                tracing::error!(error = %e, "Status server failed");
            }
        })
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        streams = config.streams.len(),
        "events-agent is running"
    );
    let result = supervisor.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Some(handle) = status_server {
        let _ = handle.await;
    }

    result?;
    tracing::info!("events-agent stopped");
    Ok(())
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("events_agent=info")),
    };

    // Events go to stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
