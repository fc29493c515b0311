use {
    anyhow::{Result, bail},
    serde::{Deserialize, Serialize, de::Error},
    std::{fmt, str::FromStr},
};

/// Name suffix of uploads that are still in flight.
///
/// Such files are never listed and clients cannot address them.
pub const PARTIAL_SUFFIX: &str = ".~partial";

/// Normalized `/`-separated path relative to some root (a user's home, a sync root).
///
/// The empty string is the root itself. Components are never empty, `.` or `..`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelativePath(String);

impl RelativePath {
    #[must_use]
    #[inline]
    pub fn root() -> Self {
        Self(String::new())
    }

    #[must_use]
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|part| !part.is_empty())
    }

    #[must_use]
    #[inline]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    #[inline]
    pub fn join(&self, name: &str) -> Result<Self> {
        check_component(name)?;
        if self.is_root() {
            Ok(Self(name.to_owned()))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    #[inline]
    pub fn join_path(&self, other: &RelativePath) -> RelativePath {
        if self.is_root() {
            other.clone()
        } else if other.is_root() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, other.0))
        }
    }

    #[must_use]
    #[inline]
    pub fn parent(&self) -> Option<RelativePath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(pos) => Self(self.0.get(..pos).unwrap_or_default().to_owned()),
            None => Self::root(),
        })
    }

    #[must_use]
    #[inline]
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    /// Component-wise prefix check: `home` is not a prefix of `home2`.
    #[must_use]
    #[inline]
    pub fn starts_with(&self, base: &RelativePath) -> bool {
        self.strip_prefix(base).is_some()
    }

    #[must_use]
    #[inline]
    pub fn strip_prefix(&self, base: &RelativePath) -> Option<RelativePath> {
        if base.is_root() {
            return Some(self.clone());
        }
        let rest = self.0.strip_prefix(&base.0)?;
        if rest.is_empty() {
            Some(Self::root())
        } else {
            rest.strip_prefix('/').map(|rest| Self(rest.to_owned()))
        }
    }
}

impl FromStr for RelativePath {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        for part in trimmed.split('/') {
            check_component(part)?;
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl<'de> Deserialize<'de> for RelativePath {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl fmt::Display for RelativePath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Checks a single path component.
#[inline]
pub fn check_component(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("path component cannot be empty");
    }
    if name == "." || name == ".." {
        bail!("path component cannot be {name:?}");
    }
    if name.contains(['/', '\\', '\0']) {
        bail!("path component contains a forbidden character: {name:?}");
    }
    if name.ends_with(PARTIAL_SUFFIX) {
        bail!("path component uses a reserved suffix: {name:?}");
    }
    Ok(())
}
