use {
    anyhow::{Result, anyhow, bail},
    blindbackup_protocol::RelativePath,
    std::{
        fmt::{self, Display},
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Absolute, canonical, UTF-8 local path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedLocalPath(String);

fn canonicalize(path: &Path) -> Result<PathBuf> {
    if path.try_exists()? {
        return Ok(fs_err::canonicalize(path)?);
    }

    // Only works if last component is `Component::Normal`.
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("unsupported path (must end with file or dir name): {path:?}"))?;
    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => bail!("unsupported path (couldn't get parent): {path:?}"),
    };
    Ok(canonicalize(parent)?.join(file_name))
}

impl SanitizedLocalPath {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = canonicalize(path.as_ref())?;
        match path.into_os_string().into_string() {
            Ok(path) => Ok(Self(path)),
            Err(path) => bail!("unsupported path (not valid unicode): {path:?}"),
        }
    }

    /// Local location of `relative` inside this directory.
    #[must_use]
    pub fn join(&self, relative: &RelativePath) -> PathBuf {
        relative
            .components()
            .fold(PathBuf::from(&self.0), |path, name| path.join(name))
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for SanitizedLocalPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl Display for SanitizedLocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SanitizedLocalPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
