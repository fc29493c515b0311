#![allow(clippy::collapsible_if)]

pub mod cli;
pub mod config;
pub mod counters;
pub mod db;
pub mod download;
mod info;
pub mod local;
pub mod path;
pub mod remote;
pub mod sync;
pub mod term;
pub mod upload;
mod watch;

use {
    crate::{
        cli::{Cli, Command, default_log_path},
        config::Config,
        db::Db,
        download::restore,
        sync::{SyncRequest, sync},
        upload::backup,
    },
    anyhow::{Result, bail},
    blindbackup_protocol::{
        Credentials, EncryptionKey, ObserverId, Password,
        endpoints::{DeleteUser, SaveUser},
    },
    blindbackup_sdk::{SyncOptions, client::Client, crypto::Cipher},
    derivative::Derivative,
    fs_err::{File, OpenOptions},
    parking_lot::Mutex,
    std::{
        io::{self, Write},
        path::Path,
        sync::Mutex as StdMutex,
    },
    tracing::info,
    tracing_subscriber::{EnvFilter, prelude::*},
};

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Ctx {
    pub config: Config,
    #[derivative(Debug = "ignore")]
    pub client: Client,
    #[derivative(Debug = "ignore")]
    pub cipher: Option<Cipher>,
    #[derivative(Debug = "ignore")]
    pub db: Db,
    /// Observer registered by this process. Writes carry it so that
    /// the process can tell its own changes from others'.
    pub origin: Mutex<Option<ObserverId>>,
}

impl Ctx {
    pub fn new(config: Config, password: Password) -> Result<Self> {
        let certificate = config
            .server_certificate
            .as_ref()
            .map(fs_err::read)
            .transpose()?;
        let credentials = Credentials::new(config.login.clone(), password);
        Ok(Self {
            client: Client::with_root_certificate(
                config.server_url.clone(),
                &credentials,
                certificate.as_deref(),
            )?,
            cipher: config.encryption_key.as_ref().map(Cipher::new),
            db: Db::open(&config.state_db_path()?, config.remote_identity())?,
            config,
            origin: Mutex::new(None),
        })
    }

    pub fn origin(&self) -> Option<ObserverId> {
        self.origin.lock().clone()
    }
}

fn prompt_password(prompt: &str) -> Result<Password> {
    let value = rpassword::prompt_password(prompt)?;
    if value.is_empty() {
        bail!("no password provided");
    }
    Ok(Password::new(value))
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let password = match &config.password {
        Some(password) => password.clone(),
        None => prompt_password(&format!("Password for {}: ", config.login))?,
    };
    let ctx = Ctx::new(config, password)?;
    handle_command(cli.command, &ctx).await
}

pub async fn handle_command(command: Command, ctx: &Ctx) -> Result<()> {
    let options = SyncOptions::from(ctx.config.sync);
    match command {
        Command::Backup {
            local_path,
            remote_path,
            overwrite,
        } => {
            let report = backup(ctx, &local_path, &remote_path, overwrite).await?;
            info!("backup complete: {report}");
        }
        Command::Restore {
            remote_path,
            local_path,
            overwrite,
        } => {
            let report = restore(ctx, &remote_path, &local_path, overwrite).await?;
            info!("restore complete: {report}");
        }
        Command::Sync {
            local_path,
            remote_path,
            direction,
            dry_run,
            no_delete,
            mtime_compare,
            size_compare,
        } => {
            let request = SyncRequest {
                local: &local_path,
                remote: &remote_path,
                direction: direction.into(),
                options: SyncOptions {
                    mirror_deletes: options.mirror_deletes && !no_delete,
                    mtime_compare: mtime_compare.map_or(options.mtime_compare, Into::into),
                    size_compare: size_compare.map_or(options.size_compare, Into::into),
                    ..options
                },
                dry_run,
            };
            let report = sync(ctx, &request).await?;
            info!("sync complete: {report}");
        }
        Command::Ls { path, recursive } => info::ls(ctx, &path, recursive).await?,
        Command::Rm { path } => {
            if path.is_root() {
                bail!("refusing to remove the home directory");
            }
            remote::remove(ctx, &path).await?;
            info!("removed {path}");
        }
        Command::Mkdir { path } => {
            remote::mkdir(ctx, &path).await?;
            info!("created {path}");
        }
        Command::Time => info::server_time(ctx).await?,
        Command::Whoami => info::who_am_i(ctx).await?,
        Command::Watch { remote_path, sync } => {
            watch::watch(ctx, &remote_path, sync.as_ref()).await?;
        }
        Command::Users => info::users(ctx).await?,
        Command::SaveUser {
            login,
            home,
            permissions,
            password,
        } => {
            let password = if password {
                Some(prompt_password(&format!("New password for {login}: "))?)
            } else {
                None
            };
            ctx.client
                .request(&SaveUser {
                    login: login.clone(),
                    home,
                    permissions,
                    password,
                })
                .await?;
            info!("saved user {login}");
        }
        Command::DeleteUser { login } => {
            ctx.client.request(&DeleteUser { login: login.clone() }).await?;
            info!("deleted user {login}");
        }
        Command::GenerateKey => print_new_key()?,
    }
    Ok(())
}

/// Doesn't need a config or a server.
pub fn print_new_key() -> Result<()> {
    let key = EncryptionKey::generate()?;
    writeln!(io::stdout(), "{}", key.display_unmasked())?;
    Ok(())
}

fn log_writer(log_file: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    let Some(log_file) = log_file else {
        return Ok(Box::new(io::stdout()));
    };
    if let Some(parent) = log_file.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    Ok(Box::new(file))
}

pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let default_log_file = default_log_path()
        .inspect_err(|err| {
            let _ = writeln!(io::stderr(), "{err}");
        })
        .ok();
    // Defaults to stdout if `data_dir()` fails.
    let log_file = log_file.or(default_log_file.as_deref());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(StdMutex::new(log_writer(log_file)?));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_new(log_filter)?)
        .with(term::TermLayer)
        .init();
    Ok(())
}
