//! Starts a real server on a free local port and builds clients pointed at it.

#[cfg(test)]
mod access;
#[cfg(test)]
mod admin;
#[cfg(test)]
mod backup;
#[cfg(test)]
mod sync;

use {
    anyhow::{Result, anyhow},
    blindbackup::{Ctx, config::Config as ClientConfig, path::SanitizedLocalPath},
    blindbackup_protocol::{Credentials, EncryptionKey, Password},
    blindbackup_sdk::Client,
    blindbackup_server::config::{Config, Limits},
    fs_err as fs,
    portpicker::pick_unused_port,
    std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        path::{Path, PathBuf},
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    },
    tempfile::TempDir,
    tokio::{net::TcpStream, sync::oneshot, task::JoinHandle, time::sleep},
    tracing_subscriber::EnvFilter,
    url::Url,
};

pub const USERS: &str = "\
# username:homedir:permissions:password
alice:aliceHome:WDRSTN:alicepass
bob:bobHome:WDRS:bobpass
reader:aliceHome:RS:readerpass
admin::A:adminpass
";

pub const LIMITS: Limits = Limits {
    credential_refresh_interval: Duration::from_millis(100),
    idle_timeout: Duration::from_secs(30),
    poll_timeout: Duration::from_secs(2),
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("info,blindbackup_server=debug"))
        .try_init();
}

pub struct TestServer {
    dir: TempDir,
    url: Url,
    password_file: PathBuf,
    backup_root: PathBuf,
    next_state_db: AtomicU64,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(users: &str) -> Result<Self> {
        init_logging();
        let dir = TempDir::new()?;
        let backup_root = dir.path().join("backup");
        for home in ["aliceHome", "bobHome"] {
            fs::create_dir_all(backup_root.join(home))?;
        }
        let password_file = dir.path().join("passwd.txt");
        fs::write(&password_file, users)?;

        let port = pick_unused_port().ok_or_else(|| anyhow!("no free port"))?;
        let config = Config {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            backup_root: backup_root.clone(),
            tls_cert_path: None,
            tls_key_path: None,
            password_file: password_file.clone(),
            limits: LIMITS,
        };
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(blindbackup_server::run(config, async move {
            let _ = shutdown_rx.await;
        }));

        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let mut attempts = 0_u32;
        while TcpStream::connect(address).await.is_err() {
            attempts = attempts.saturating_add(1);
            if attempts > 100 || task.is_finished() {
                return Err(anyhow!("server didn't start on {address}"));
            }
            sleep(Duration::from_millis(50)).await;
        }

        Ok(Self {
            url: Url::parse(&format!("http://{address}/"))?,
            dir,
            password_file,
            backup_root,
            next_state_db: AtomicU64::new(0),
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn client(&self, login: &str, password: &str) -> Result<Client> {
        let credentials = Credentials::new(login, Password::new(password));
        Client::new(self.url.clone(), &credentials)
    }

    /// A client context with its own state database.
    pub fn ctx(&self, login: &str, password: &str, key: Option<EncryptionKey>) -> Result<Ctx> {
        let index = self.next_state_db.fetch_add(1, Ordering::Relaxed);
        self.ctx_with_state(login, password, key, &format!("{login}-{index}"))
    }

    /// A client context using the state database `state`, which may be shared
    /// with earlier (dropped) contexts.
    pub fn ctx_with_state(
        &self,
        login: &str,
        password: &str,
        key: Option<EncryptionKey>,
        state: &str,
    ) -> Result<Ctx> {
        let mut config = ClientConfig::parse(&format!(
            "{{ server_url: {:?}, login: {login:?} }}",
            self.url.as_str()
        ))?;
        config.encryption_key = key;
        config.state_db_path = Some(self.dir.path().join("state").join(state));
        Ctx::new(config, Password::new(password))
    }

    /// Creates an empty directory for client-side files.
    pub fn local_dir(&self, name: &str) -> Result<SanitizedLocalPath> {
        let path = self.dir.path().join("local").join(name);
        fs::create_dir_all(&path)?;
        SanitizedLocalPath::new(path)
    }

    pub fn write_users(&self, users: &str) -> Result<()> {
        fs::write(&self.password_file, users)?;
        Ok(())
    }

    pub fn read_users(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.password_file)?)
    }

    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?
    }
}
