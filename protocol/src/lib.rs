#![allow(clippy::collapsible_else_if)]

pub mod credentials;
pub mod encoding;
pub mod endpoints;
mod path;
pub mod util;

pub use crate::{
    credentials::{Credentials, EncryptionKey, Password},
    path::{PARTIAL_SUFFIX, RelativePath, check_component},
};
use {
    anyhow::{Result, bail},
    chrono::Utc,
    derive_more::{Display, From, Into},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, btree_map},
        fmt,
        str::FromStr,
    },
};

pub type DateTimeUtc = chrono::DateTime<Utc>;

/// Drops sub-microsecond precision so that timestamps survive any filesystem
/// and wire round trip unchanged.
#[must_use]
#[inline]
pub fn normalize_time(time: DateTimeUtc) -> DateTimeUtc {
    DateTimeUtc::from_timestamp_micros(time.timestamp_micros()).unwrap_or(time)
}

/// One class of server operation a user may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionBit {
    Write,
    Delete,
    Read,
    Sync,
    Time,
    Notify,
    Admin,
}

impl PermissionBit {
    /// All bits in the canonical order of the permission string.
    pub const ALL: [PermissionBit; 7] = [
        Self::Write,
        Self::Delete,
        Self::Read,
        Self::Sync,
        Self::Time,
        Self::Notify,
        Self::Admin,
    ];

    #[must_use]
    #[inline]
    pub fn code(self) -> char {
        match self {
            Self::Write => 'W',
            Self::Delete => 'D',
            Self::Read => 'R',
            Self::Sync => 'S',
            Self::Time => 'T',
            Self::Notify => 'N',
            Self::Admin => 'A',
        }
    }

    #[inline]
    pub fn from_code(code: char) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|bit| bit.code() == code)
            .ok_or_else(|| anyhow::anyhow!("unknown permission character {code:?}"))
    }

    fn mask(self) -> u8 {
        match self {
            Self::Write => 1,
            Self::Delete => 1 << 1,
            Self::Read => 1 << 2,
            Self::Sync => 1 << 3,
            Self::Time => 1 << 4,
            Self::Notify => 1 << 5,
            Self::Admin => 1 << 6,
        }
    }
}

/// Unordered set of permission bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Permissions(u8);

impl Permissions {
    #[must_use]
    #[inline]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    #[inline]
    pub fn contains(self, bit: PermissionBit) -> bool {
        self.0 & bit.mask() != 0
    }

    #[inline]
    pub fn insert(&mut self, bit: PermissionBit) {
        self.0 |= bit.mask();
    }

    #[must_use]
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn iter(self) -> impl Iterator<Item = PermissionBit> {
        PermissionBit::ALL
            .into_iter()
            .filter(move |bit| self.contains(*bit))
    }
}

impl FromIterator<PermissionBit> for Permissions {
    #[inline]
    fn from_iter<T: IntoIterator<Item = PermissionBit>>(iter: T) -> Self {
        let mut permissions = Self::empty();
        for bit in iter {
            permissions.insert(bit);
        }
        permissions
    }
}

/// Parses a permission string such as `RWDS`. Order and repetition don't matter,
/// any character outside `WDRSTNA` is an error.
impl FromStr for Permissions {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .map(PermissionBit::from_code)
            .collect()
    }
}

impl fmt::Display for Permissions {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            write!(f, "{}", bit.code())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Permissions {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({self})")
    }
}

impl From<Permissions> for String {
    #[inline]
    fn from(value: Permissions) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Permissions {
    type Error = anyhow::Error;

    #[inline]
    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Coarse outcome category of a failed request. Carries no further detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorCode {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("permission denied")]
    PermissionDenied,
    #[error("path escapes the home directory")]
    PathEscape,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("internal server error")]
    InternalError,
}

/// Metadata of a file or directory. This is everything a listing ever reveals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: RelativePath,
    pub size: u64,
    pub modified_at: DateTimeUtc,
    pub is_dir: bool,
}

impl FileEntry {
    #[must_use]
    #[inline]
    pub fn file(path: RelativePath, size: u64, modified_at: DateTimeUtc) -> Self {
        Self {
            path,
            size,
            modified_at: normalize_time(modified_at),
            is_dir: false,
        }
    }

    #[must_use]
    #[inline]
    pub fn dir(path: RelativePath, modified_at: DateTimeUtc) -> Self {
        Self {
            path,
            size: 0,
            modified_at: normalize_time(modified_at),
            is_dir: true,
        }
    }
}

/// Set of entries keyed by their relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing(BTreeMap<RelativePath, FileEntry>);

impl Listing {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Paths must be unique within a listing.
    #[inline]
    pub fn insert(&mut self, entry: FileEntry) -> Result<()> {
        match self.0.entry(entry.path.clone()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
            btree_map::Entry::Occupied(_) => bail!("duplicate path in listing: {}", entry.path),
        }
    }

    /// Adds or replaces an entry.
    #[inline]
    pub fn upsert(&mut self, entry: FileEntry) {
        self.0.insert(entry.path.clone(), entry);
    }

    #[inline]
    pub fn remove(&mut self, path: &RelativePath) -> Option<FileEntry> {
        self.0.remove(path)
    }

    #[must_use]
    #[inline]
    pub fn get(&self, path: &RelativePath) -> Option<&FileEntry> {
        self.0.get(path)
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, path: &RelativePath) -> bool {
        self.0.contains_key(path)
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.0.values()
    }

    #[inline]
    pub fn paths(&self) -> impl Iterator<Item = &RelativePath> {
        self.0.keys()
    }
}

impl FromIterator<FileEntry> for Listing {
    /// Later duplicates replace earlier ones.
    #[inline]
    fn from_iter<T: IntoIterator<Item = FileEntry>>(iter: T) -> Self {
        let mut listing = Self::new();
        for entry in iter {
            listing.upsert(entry);
        }
        listing
    }
}

impl IntoIterator for Listing {
    type Item = FileEntry;
    type IntoIter = btree_map::IntoValues<RelativePath, FileEntry>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

/// Opaque identifier of a change observer registered with `ListenChanges`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into, Display)]
pub struct ObserverId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    File,
    Directory,
    Delete,
}

/// A change recorded under an observed subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Relative to the observing user's home.
    pub path: RelativePath,
    pub kind: ChangeKind,
    /// Observer that caused the change, if the writer declared one.
    pub origin: Option<ObserverId>,
}

/// Public part of a user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub home: RelativePath,
    pub permissions: Permissions,
}
