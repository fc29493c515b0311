use {
    anyhow::Result,
    blindbackup::{
        cli::{Cli, Command, default_config_path},
        config::Config,
        print_new_key, run, setup_logger,
    },
    clap::Parser,
    tracing::error,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if matches!(cli.command, Command::GenerateKey) {
        return print_new_key();
    }
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;
    run(cli, config)
        .await
        .inspect_err(|err| error!("{err:?}"))
}
