use {
    anyhow::{Context as _, Result},
    blindbackup_protocol::{EncryptionKey, Password},
    blindbackup_sdk::{
        SyncOptions,
        diff::{SizeCompare, TimeCompare},
    },
    derivative::Derivative,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    url::Url,
};

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server_url: Url,
    pub login: String,
    /// Asked interactively if not specified.
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub password: Option<Password>,
    /// File content and names are stored in plain form if not specified.
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub encryption_key: Option<EncryptionKey>,
    /// Additional trusted root certificate (PEM), e.g. a self-signed certificate of the server.
    #[serde(default)]
    pub server_certificate: Option<PathBuf>,
    #[serde(default)]
    pub state_db_path: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde", default = "default_mtime_tolerance")]
    pub mtime_tolerance: Duration,
    #[serde(default = "default_mirror_deletes")]
    pub mirror_deletes: bool,
    /// `changed`, `newer` or `ignore`.
    #[serde(default)]
    pub mtime_compare: TimeCompare,
    /// `changed`, `bigger` or `ignore`.
    #[serde(default)]
    pub size_compare: SizeCompare,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mtime_tolerance: default_mtime_tolerance(),
            mirror_deletes: default_mirror_deletes(),
            mtime_compare: TimeCompare::default(),
            size_compare: SizeCompare::default(),
        }
    }
}

impl From<SyncConfig> for SyncOptions {
    fn from(value: SyncConfig) -> Self {
        Self {
            mtime_tolerance: value.mtime_tolerance,
            mirror_deletes: value.mirror_deletes,
            mtime_compare: value.mtime_compare,
            size_compare: value.size_compare,
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_mtime_tolerance() -> Duration {
    SyncOptions::default().mtime_tolerance
}

fn default_mirror_deletes() -> bool {
    SyncOptions::default().mirror_deletes
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = json5::from_str(text)?;
        SyncOptions::from(config.sync).validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path)?;
        Self::parse(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn state_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.state_db_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().context("cannot find data dir")?;
        Ok(data_dir.join("blindbackup").join("state.db"))
    }

    /// Fingerprint of the server, account and key that remote listings depend on.
    /// Sync state recorded under one identity is never applied under another.
    pub fn remote_identity(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [self.server_url.as_str(), &self.login] {
            hasher.update(field.as_bytes());
            hasher.update([0]);
        }
        if let Some(key) = &self.encryption_key {
            hasher.update(b"key");
            hasher.update(key.get().as_slice());
        }
        format!("{:x}", hasher.finalize())
    }
}
