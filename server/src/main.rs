use {
    anyhow::Result,
    blindbackup_sdk::signal::shutdown_signal,
    blindbackup_server::config::Config,
    clap::Parser,
    std::path::PathBuf,
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

/// Multi-user backup server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the server config (JSON5).
    #[clap(long, short)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(&cli.config)?;
    blindbackup_server::run(config, async {
        match shutdown_signal().await {
            Ok(signal) => info!(%signal, "shutting down"),
            Err(err) => {
                warn!(?err, "failed to wait for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    })
    .await
}
