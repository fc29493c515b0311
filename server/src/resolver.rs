//! Confinement of client-supplied paths to the user's home directory.
//!
//! Resolution is purely lexical and happens before any filesystem access.
//! Symbolic links are dealt with by [`crate::storage`], which never follows them.

use {
    crate::error::{DispatchError, DispatchResult},
    blindbackup_protocol::{RelativePath, check_component},
    std::path::{Path, PathBuf},
    tracing::warn,
};

/// A path that is known to be inside a user's home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Relative to the user's home.
    pub relative: RelativePath,
    /// Relative to the backup root.
    pub from_root: RelativePath,
    pub absolute: PathBuf,
}

impl ResolvedPath {
    /// Whether this is the user's home directory itself.
    pub fn is_home(&self) -> bool {
        self.relative.is_root()
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `home` + `client_path` to a location under the backup root.
    ///
    /// `.` and empty segments are dropped and `..` removes the previous segment.
    /// A `..` that would leave the home directory, or a segment that is not a valid
    /// file name, rejects the whole path.
    pub fn resolve(&self, home: &RelativePath, client_path: &str) -> DispatchResult<ResolvedPath> {
        let reject = || {
            warn!(%home, ?client_path, "rejected path outside of home directory");
            DispatchError::PathEscape(client_path.to_owned())
        };
        let mut stack: Vec<&str> = Vec::new();
        for segment in client_path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        return Err(reject());
                    }
                }
                name => {
                    if check_component(name).is_err() {
                        return Err(reject());
                    }
                    stack.push(name);
                }
            }
        }

        let relative = stack
            .into_iter()
            .try_fold(RelativePath::root(), |path, name| path.join(name))
            .map_err(|_| reject())?;
        let from_root = home.join_path(&relative);
        let home_dir = self.local_path(home);
        let absolute = self.local_path(&from_root);
        if !absolute.starts_with(&home_dir) {
            return Err(reject());
        }
        Ok(ResolvedPath {
            relative,
            from_root,
            absolute,
        })
    }

    /// Location of a path relative to the backup root.
    pub fn local_path(&self, from_root: &RelativePath) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(from_root.components());
        path
    }
}

#[cfg(test)]
mod tests {
    use {super::*, blindbackup_protocol::ErrorCode};

    fn resolver() -> PathResolver {
        PathResolver::new("/srv/backup")
    }

    fn home(s: &str) -> RelativePath {
        s.parse().unwrap()
    }

    #[test]
    fn normalizes_inside_home() {
        let resolved = resolver().resolve(&home("bobhome"), "./a//b/../c/").unwrap();
        assert_eq!(resolved.relative.as_str(), "a/c");
        assert_eq!(resolved.from_root.as_str(), "bobhome/a/c");
        assert_eq!(resolved.absolute, PathBuf::from("/srv/backup/bobhome/a/c"));

        let resolved = resolver().resolve(&home(""), "/notes.txt").unwrap();
        assert_eq!(resolved.absolute, PathBuf::from("/srv/backup/notes.txt"));

        assert!(resolver().resolve(&home("bobhome"), "a/..").unwrap().is_home());
        assert!(resolver().resolve(&home("bobhome"), "").unwrap().is_home());
    }

    #[test]
    fn rejects_escapes() {
        for path in [
            "..",
            "../aliceHome/secret.txt",
            "a/../../bobhome2/x",
            "/../x",
            "a\\..\\..\\x",
            "a/b\0",
            "file.~partial",
        ] {
            let err = resolver().resolve(&home("bobhome"), path).unwrap_err();
            assert_eq!(err.code(), ErrorCode::PathEscape, "{path:?}");
        }
        // Same rule for a user whose home is the whole backup root.
        resolver().resolve(&home(""), "../etc/passwd").unwrap_err();
    }

    #[test]
    fn sibling_homes_do_not_alias() {
        let resolved = resolver().resolve(&home("home2"), "x").unwrap();
        assert!(!resolved.absolute.starts_with("/srv/backup/home"));
        assert!(resolved.absolute.starts_with("/srv/backup/home2"));
    }
}
