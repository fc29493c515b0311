//! The user table and its live reloading.
//!
//! The password file is parsed into an immutable [`CredentialTable`]. A request
//! loads the current table once and keeps using it until it completes, while
//! the refresh task swaps in new tables as the file changes.

use {
    anyhow::{Context as _, Result, bail, ensure},
    arc_swap::ArcSwap,
    blindbackup_protocol::{Credentials, Password, Permissions, RelativePath, UserInfo},
    parking_lot::Mutex,
    regex::Regex,
    sha2::{Digest, Sha256},
    std::{
        collections::BTreeMap,
        fmt::{self, Write as _},
        io::ErrorKind,
        path::{Path, PathBuf},
        sync::{Arc, LazyLock},
        time::Duration,
    },
    tokio::{task::JoinHandle, time::interval},
    tracing::{debug, info, warn},
};

#[expect(clippy::unwrap_used, reason = "constant pattern")]
static LOGIN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[a-z][a-z0-9]*$").unwrap());

pub fn check_login(login: &str) -> Result<()> {
    ensure!(LOGIN_REGEX.is_match(login), "invalid user name: {login:?}");
    Ok(())
}

/// A home must fit in one field of a password file line.
pub fn check_home(home: &RelativePath) -> Result<()> {
    ensure!(
        !home.as_str().contains(|c: char| c == ':' || c.is_control()),
        "invalid home directory: {home:?}"
    );
    Ok(())
}

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    /// Relative to the backup root. Empty means the whole backup root.
    pub home: RelativePath,
    pub permissions: Permissions,
    /// As written in the password file: cleartext, `sha256:<hex>` or empty.
    stored_password: String,
}

impl User {
    pub fn new(name: String, home: RelativePath, permissions: Permissions, stored_password: String) -> Self {
        Self {
            name,
            home,
            permissions,
            stored_password,
        }
    }

    pub fn check_password(&self, password: &Password) -> bool {
        password.matches_stored(&self.stored_password)
    }

    pub fn stored_password(&self) -> &str {
        &self.stored_password
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            name: self.name.clone(),
            home: self.home.clone(),
            permissions: self.permissions,
        }
    }

    fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.name,
            self.home.as_str(),
            self.permissions,
            self.stored_password
        )
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("home", &self.home)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of the password file.
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    version: u64,
    users: BTreeMap<String, User>,
}

impl CredentialTable {
    /// Parses a password file. Any malformed line fails the whole file.
    pub fn parse(text: &str) -> Result<Self> {
        let mut users = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let user = parse_line(line).with_context(|| format!("line {}", index.saturating_add(1)))?;
            if users.contains_key(&user.name) {
                bail!("line {}: duplicate user {:?}", index.saturating_add(1), user.name);
            }
            users.insert(user.name.clone(), user);
        }
        Ok(Self { version: 0, users })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Returns the user only if the password matches. Unknown users and wrong
    /// passwords are indistinguishable to the caller.
    pub fn authenticate(&self, credentials: &Credentials) -> Option<&User> {
        self.users
            .get(&credentials.login)
            .filter(|user| user.check_password(&credentials.password))
    }

    pub fn upsert(&mut self, user: User) {
        self.users.insert(user.name.clone(), user);
    }

    pub fn remove(&mut self, name: &str) -> Option<User> {
        self.users.remove(name)
    }

    /// Serializes the table in the password file format.
    pub fn to_file_text(&self) -> String {
        let mut text = String::from("# username:homedir:permissions:password\n");
        for user in self.users.values() {
            let _ = writeln!(text, "{}", user.to_line());
        }
        text
    }
}

fn parse_line(line: &str) -> Result<User> {
    let mut parts = line.splitn(4, ':');
    let (Some(name), Some(home), Some(permissions), Some(password)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("expected 4 fields separated by ':'");
    };
    check_login(name)?;
    let home: RelativePath = home.parse().context("invalid home directory")?;
    check_home(&home)?;
    let permissions: Permissions = permissions.parse()?;
    Ok(User::new(name.to_owned(), home, permissions, password.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    hash: [u8; 32],
}

/// Owns the current [`CredentialTable`] and replaces it when the password file changes.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    current: ArcSwap<CredentialTable>,
    // Serializes refreshes and admin edits. Readers never take it.
    last_state: Mutex<Option<FileState>>,
}

impl CredentialStore {
    /// Loads the password file. Unlike later reloads, a malformed file is an error here.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs_err::read_to_string(&path)?;
        let mut table = CredentialTable::parse(&text)
            .with_context(|| format!("invalid password file {}", path.display()))?;
        table.version = 1;
        info!(users = table.len(), path = %path.display(), "loaded password file");
        Ok(Self {
            path,
            current: ArcSwap::from_pointee(table),
            last_state: Mutex::new(Some(FileState {
                hash: Sha256::digest(text.as_bytes()).into(),
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the latest successfully parsed table. Never blocks.
    pub fn current(&self) -> Arc<CredentialTable> {
        self.current.load_full()
    }

    /// Re-reads the password file and installs a new table if its content changed.
    ///
    /// Returns whether a new table was installed. A file that fails to parse
    /// keeps the previous table active.
    pub fn refresh(&self) -> bool {
        let mut last_state = self.last_state.lock();
        let text = match fs_err::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                // Reported once until the file becomes readable again.
                if last_state.take().is_some() {
                    if err.kind() == ErrorKind::NotFound {
                        warn!(path = %self.path.display(), "password file is missing, keeping current users");
                    } else {
                        warn!(?err, "failed to read password file, keeping current users");
                    }
                }
                return false;
            }
        };
        let state = FileState {
            hash: Sha256::digest(text.as_bytes()).into(),
        };
        if *last_state == Some(state) {
            return false;
        }
        *last_state = Some(state);
        match CredentialTable::parse(&text) {
            Ok(table) => {
                self.install(table);
                true
            }
            Err(err) => {
                warn!(
                    error = format!("{err:#}"),
                    path = %self.path.display(),
                    "credential reload failed, keeping current users"
                );
                false
            }
        }
    }

    fn install(&self, mut table: CredentialTable) {
        table.version = self.current.load().version.saturating_add(1);
        info!(version = table.version, users = table.len(), "installed new credential table");
        self.current.store(Arc::new(table));
    }

    /// Applies `edit` to the table stored in the password file and writes it back.
    ///
    /// The file is re-read first so that manual edits that were not picked up yet
    /// are not lost. The previous file is kept with a `.bak` extension.
    pub fn edit<T>(&self, edit: impl FnOnce(&mut CredentialTable) -> Result<T>) -> Result<T> {
        let mut last_state = self.last_state.lock();
        let text = fs_err::read_to_string(&self.path)?;
        let mut table = CredentialTable::parse(&text)
            .context("password file is invalid, refusing to overwrite it")?;
        let output = edit(&mut table)?;
        let new_text = table.to_file_text();
        let reparsed = CredentialTable::parse(&new_text)
            .context("edited password file doesn't parse, refusing to write it")?;
        ensure!(
            reparsed.users.values().eq(table.users.values()),
            "edited password file doesn't round-trip, refusing to write it"
        );
        write_atomically(&self.path, &new_text)?;
        *last_state = Some(FileState {
            hash: Sha256::digest(new_text.as_bytes()).into(),
        });
        self.install(table);
        Ok(output)
    }

    /// Periodically calls [`Self::refresh`].
    pub fn spawn_refresh_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                let store = Arc::clone(&this);
                match tokio::task::spawn_blocking(move || store.refresh()).await {
                    Ok(changed) => {
                        if changed {
                            debug!("password file changed");
                        }
                    }
                    Err(err) => warn!(?err, "credential refresh task failed"),
                }
            }
        })
    }
}

fn write_atomically(path: &Path, text: &str) -> Result<()> {
    use std::io::Write as _;

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".passwd")
        .suffix(".part")
        .tempfile_in(dir)?;
    file.write_all(text.as_bytes())?;
    file.as_file().sync_all()?;
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    if path.exists() {
        fs_err::copy(path, &backup)?;
    }
    file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, blindbackup_protocol::PermissionBit, tempfile::TempDir};

    const PASSWD: &str = "\
# comment
alice::WD:secret1

bob:bobhome:R:pa:ss
carol:bobhome/sub:RWDSTNA:sha256:2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b
dave:x::
";

    fn credentials(login: &str, password: &str) -> Credentials {
        Credentials::new(login, Password::new(password))
    }

    #[test]
    fn parse_password_file() {
        let table = CredentialTable::parse(PASSWD).unwrap();
        assert_eq!(table.len(), 4);
        let alice = table.get("alice").unwrap();
        assert!(alice.home.is_root());
        assert_eq!(alice.permissions.to_string(), "WD");
        let bob = table.authenticate(&credentials("bob", "pa:ss")).unwrap();
        assert_eq!(bob.home.as_str(), "bobhome");
        assert!(bob.permissions.contains(PermissionBit::Read));
        assert!(table.authenticate(&credentials("carol", "secret")).is_some());
        assert!(table.authenticate(&credentials("alice", "wrong")).is_none());
        assert!(table.authenticate(&credentials("nobody", "secret1")).is_none());
        // Empty password disables the account.
        assert!(table.authenticate(&credentials("dave", "")).is_none());
        assert!(table.get("dave").unwrap().permissions.is_empty());
    }

    #[test]
    fn reject_malformed_files() {
        for text in [
            "alice:home:WD",
            "Alice::WD:x",
            "1alice::WD:x",
            "alice::WX:x",
            "alice:../up:W:x",
            "alice::W:x\nalice::R:y",
            "alice:a\tb:W:x",
        ] {
            CredentialTable::parse(text).unwrap_err();
        }
    }

    #[test]
    fn edit_refuses_unparsable_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd.txt");
        fs_err::write(&path, "alice::WD:secret1\n").unwrap();
        let store = CredentialStore::load(&path).unwrap();
        store
            .edit(|table| {
                table.upsert(User::new(
                    "bob".into(),
                    "a:b".parse().unwrap(),
                    "R".parse().unwrap(),
                    String::new(),
                ));
                Ok(())
            })
            .unwrap_err();
        assert_eq!(fs_err::read_to_string(&path).unwrap(), "alice::WD:secret1\n");
        assert!(store.current().get("bob").is_none());
    }

    #[test]
    fn round_trip_file_text() {
        let table = CredentialTable::parse(PASSWD).unwrap();
        let reparsed = CredentialTable::parse(&table.to_file_text()).unwrap();
        assert_eq!(
            table.users().collect::<Vec<_>>(),
            reparsed.users().collect::<Vec<_>>()
        );
    }

    #[test]
    fn reload_keeps_old_table_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd.txt");
        fs_err::write(&path, "alice::WD:secret1\n").unwrap();
        let store = CredentialStore::load(&path).unwrap();
        let first = store.current();
        assert_eq!(first.version(), 1);
        assert!(!store.refresh());

        fs_err::write(&path, "alice::WD:secret1\nbob:b:R:secret2\n").unwrap();
        assert!(store.refresh());
        let second = store.current();
        assert_eq!(second.version(), 2);
        assert!(second.authenticate(&credentials("bob", "secret2")).is_some());
        // A request holding the old snapshot is not affected.
        assert!(first.get("bob").is_none());

        fs_err::write(&path, "alice::WD:secret1\nbob:b:Q:secret2\n").unwrap();
        assert!(!store.refresh());
        assert_eq!(store.current().version(), 2);
        assert!(store.current().get("bob").is_some());

        fs_err::remove_file(&path).unwrap();
        assert!(!store.refresh());
        assert_eq!(store.current().version(), 2);
    }

    #[test]
    fn edit_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd.txt");
        fs_err::write(&path, "alice::WDA:secret1\n").unwrap();
        let store = CredentialStore::load(&path).unwrap();
        store
            .edit(|table| {
                table.upsert(User::new(
                    "bob".into(),
                    "b".parse().unwrap(),
                    "R".parse().unwrap(),
                    Password::new("secret2").hashed(),
                ));
                Ok(())
            })
            .unwrap();
        assert!(store.current().authenticate(&credentials("bob", "secret2")).is_some());
        let text = fs_err::read_to_string(&path).unwrap();
        assert!(text.contains("bob:b:R:sha256:"));
        assert!(!text.contains("secret2"));
        let backup = fs_err::read_to_string(dir.path().join("passwd.txt.bak")).unwrap();
        assert_eq!(backup, "alice::WDA:secret1\n");
        // The written file is not reloaded again.
        assert!(!store.refresh());
    }
}
