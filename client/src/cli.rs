use {
    crate::path::SanitizedLocalPath,
    anyhow::{Result, anyhow},
    blindbackup_protocol::{Permissions, RelativePath},
    blindbackup_sdk::{
        SyncDirection,
        diff::{SizeCompare, TimeCompare},
    },
    clap::{Parser, Subcommand, ValueEnum},
    std::path::PathBuf,
};

/// Backup and sync client.
///
/// Remote paths are relative to the user's home on the server.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the config (JSON5). Defaults to `blindbackup.json5` in the user config dir.
    #[clap(long, short)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Upload a local file or directory. Nothing is deleted.
    Backup {
        local_path: SanitizedLocalPath,
        remote_path: RelativePath,
        /// Replace files that already exist on the server.
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Download a remote file or directory. Nothing is deleted.
    Restore {
        remote_path: RelativePath,
        local_path: SanitizedLocalPath,
        /// Replace local files that already exist.
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Reconcile a local directory with a remote directory.
    Sync {
        local_path: SanitizedLocalPath,
        remote_path: RelativePath,
        #[arg(short, long, value_enum, default_value_t = Direction::Both)]
        direction: Direction,
        /// Print the plan without executing it.
        #[arg(long)]
        dry_run: bool,
        /// Never delete anything in one-way modes.
        #[arg(long)]
        no_delete: bool,
        /// When one-way modes overwrite a file because of its modification time.
        #[arg(long, value_enum)]
        mtime_compare: Option<MtimeMode>,
        /// When one-way modes overwrite a file because of its size.
        #[arg(long, value_enum)]
        size_compare: Option<SizeMode>,
    },
    /// List a remote directory.
    Ls {
        #[arg(default_value = "")]
        path: RelativePath,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Remove a remote file or directory.
    Rm { path: RelativePath },
    /// Create a remote directory.
    Mkdir { path: RelativePath },
    /// Print the server's clock.
    Time,
    /// Print the current user's name, home and permissions.
    Whoami,
    /// Print remote changes as they happen, optionally syncing a local directory after each batch.
    Watch {
        #[arg(default_value = "")]
        remote_path: RelativePath,
        #[arg(long)]
        sync: Option<SanitizedLocalPath>,
    },
    /// List users of the server.
    Users,
    /// Create or update a user. Asks for a new password if `--password` is set.
    SaveUser {
        login: String,
        home: RelativePath,
        permissions: Permissions,
        #[arg(long)]
        password: bool,
    },
    DeleteUser {
        login: String,
    },
    /// Print a new random encryption key.
    GenerateKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    ToServer,
    FromServer,
    Both,
}

impl From<Direction> for SyncDirection {
    fn from(value: Direction) -> Self {
        match value {
            Direction::ToServer => Self::ToServer,
            Direction::FromServer => Self::FromServer,
            Direction::Both => Self::Bidirectional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MtimeMode {
    Changed,
    Newer,
    Ignore,
}

impl From<MtimeMode> for TimeCompare {
    fn from(value: MtimeMode) -> Self {
        match value {
            MtimeMode::Changed => Self::Changed,
            MtimeMode::Newer => Self::Newer,
            MtimeMode::Ignore => Self::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SizeMode {
    Changed,
    Bigger,
    Ignore,
}

impl From<SizeMode> for SizeCompare {
    fn from(value: SizeMode) -> Self {
        match value {
            SizeMode::Changed => Self::Changed,
            SizeMode::Bigger => Self::Bigger,
            SizeMode::Ignore => Self::Ignore,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("cannot find config dir"))?;
    Ok(config_dir.join("blindbackup.json5"))
}

pub fn default_log_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| anyhow!("cannot find data dir"))?;
    Ok(data_dir.join("blindbackup").join("blindbackup.log"))
}
