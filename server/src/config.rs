use {
    anyhow::{Context as _, Result, ensure},
    serde::{Deserialize, Serialize},
    std::{
        net::{IpAddr, SocketAddr},
        path::{Path, PathBuf},
        time::Duration,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Directory that contains the home directories of all users.
    pub backup_root: PathBuf,
    /// Certificate and key of the TLS terminator in front of the server.
    /// The server listens on plain HTTP; the pair is only validated and logged at startup.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
    /// `username:homedir:permissions:password` lines, re-read while running.
    pub password_file: PathBuf,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    #[serde(with = "humantime_serde")]
    pub credential_refresh_interval: Duration,
    /// Closes connections that stay silent, including stalled uploads.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How long `PollChanges` waits for events.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            credential_refresh_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(120),
            poll_timeout: Duration::from_secs(20),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path)?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.backup_root.is_dir(),
            "backup root {} is not a directory",
            self.backup_root.display()
        );
        ensure!(
            self.tls_cert_path.is_some() == self.tls_key_path.is_some(),
            "tls_cert_path and tls_key_path must be specified together"
        );
        for path in [&self.tls_cert_path, &self.tls_key_path].into_iter().flatten() {
            ensure!(path.is_file(), "TLS file {} doesn't exist", path.display());
        }
        ensure!(
            !self.limits.credential_refresh_interval.is_zero(),
            "credential_refresh_interval must be positive"
        );
        ensure!(
            !self.limits.poll_timeout.is_zero(),
            "poll_timeout must be positive"
        );
        Ok(())
    }

    /// Certificate and key paths, if configured.
    #[must_use]
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        Some((self.tls_cert_path.as_deref()?, self.tls_key_path.as_deref()?))
    }

    #[must_use]
    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
