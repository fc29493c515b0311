//! Filesystem effects of requests on already resolved paths.
//!
//! Everything here is blocking and never follows symbolic links.

use {
    crate::{
        error::{DispatchError, DispatchResult},
        resolver::ResolvedPath,
    },
    anyhow::Context as _,
    blindbackup_protocol::{DateTimeUtc, FileEntry, PARTIAL_SUFFIX, RelativePath, check_component},
    fs_err::{self as fs, File},
    std::{
        fs::Metadata,
        io::{self, Write},
        path::{Path, PathBuf},
        time::SystemTime,
    },
    tempfile::NamedTempFile,
    tokio::sync::mpsc::Sender,
    tracing::{debug, warn},
};

/// Maximum number of entries in a single listing frame.
pub const LIST_BATCH_LEN: usize = 1000;

pub type ListSender = Sender<DispatchResult<Option<Vec<FileEntry>>>>;

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

/// An upload that is being received. The data is written to a hidden
/// temporary file next to the target, which is removed if this is dropped
/// without calling [`PendingUpload::commit`].
#[derive(Debug)]
pub struct PendingUpload {
    file: NamedTempFile,
    target: PathBuf,
    overwrite: bool,
    written: u64,
}

impl PendingUpload {
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written = self
            .written
            .saturating_add(data.len().try_into().unwrap_or(u64::MAX));
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Moves the received file to its final path.
    pub fn commit(mut self, modified_at: Option<DateTimeUtc>) -> DispatchResult<()> {
        self.file.flush()?;
        let file = self.file.as_file();
        if let Some(modified_at) = modified_at {
            file.set_modified(SystemTime::from(modified_at))?;
        }
        file.sync_all()?;
        let persisted = if self.overwrite {
            self.file.persist(&self.target)
        } else {
            self.file.persist_noclobber(&self.target)
        };
        persisted.map_err(|err| DispatchError::io(err.error))?;
        debug!(target = %self.target.display(), size = self.written, "upload committed");
        Ok(())
    }
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Fails with `NotFound` if any existing component of the path, starting
    /// from the backup root, is a symbolic link.
    fn check_no_symlinks(&self, path: &ResolvedPath) -> DispatchResult<()> {
        let mut current = self.root.clone();
        for component in path.from_root.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    warn!(path = %current.display(), "refusing to follow symlink");
                    return Err(DispatchError::NotFound);
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn metadata(&self, path: &ResolvedPath) -> DispatchResult<Metadata> {
        self.check_no_symlinks(path)?;
        Ok(fs::symlink_metadata(&path.absolute)?)
    }

    /// Returns metadata of a file or directory. The entry path is the path
    /// relative to the user's home.
    pub fn stat(&self, path: &ResolvedPath) -> DispatchResult<FileEntry> {
        let metadata = self.metadata(path)?;
        to_entry(path.relative.clone(), &metadata)
    }

    pub fn open_file(&self, path: &ResolvedPath) -> DispatchResult<(File, u64)> {
        let metadata = self.metadata(path)?;
        if metadata.is_dir() {
            return Err(DispatchError::Conflict("is a directory"));
        }
        let file = File::open(&path.absolute)?;
        Ok((file, metadata.len()))
    }

    /// Prepares to receive a file at `path`, creating missing parent directories.
    pub fn start_upload(&self, path: &ResolvedPath, overwrite: bool) -> DispatchResult<PendingUpload> {
        if path.is_home() {
            return Err(DispatchError::PermissionDenied);
        }
        self.check_no_symlinks(path)?;
        match fs::symlink_metadata(&path.absolute) {
            Ok(metadata) if metadata.is_dir() => {
                return Err(DispatchError::Conflict("is a directory"));
            }
            Ok(_) if !overwrite => return Err(DispatchError::Conflict("already exists")),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let parent = path
            .absolute
            .parent()
            .context("upload target has no parent")?;
        create_dir_all(parent)?;
        let file = tempfile::Builder::new()
            .prefix(".")
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(parent)?;
        Ok(PendingUpload {
            file,
            target: path.absolute.clone(),
            overwrite,
            written: 0,
        })
    }

    /// Removes a file or a directory tree. Returns whether it was a directory.
    pub fn remove(&self, path: &ResolvedPath) -> DispatchResult<bool> {
        if path.is_home() {
            return Err(DispatchError::PermissionDenied);
        }
        let metadata = self.metadata(path)?;
        if metadata.is_dir() {
            fs::remove_dir_all(&path.absolute)?;
        } else {
            fs::remove_file(&path.absolute)?;
        }
        Ok(metadata.is_dir())
    }

    /// Creates a directory and its missing parents.
    pub fn make_dir(&self, path: &ResolvedPath) -> DispatchResult<()> {
        self.check_no_symlinks(path)?;
        create_dir_all(&path.absolute)
    }

    /// Sends the entries under `path` to `tx` in batches, sorted by path within
    /// each directory. Returns `false` if the receiver went away.
    pub fn list(&self, path: &ResolvedPath, recursive: bool, tx: &ListSender) -> DispatchResult<bool> {
        let metadata = self.metadata(path)?;
        if !metadata.is_dir() {
            return Err(DispatchError::Conflict("not a directory"));
        }
        let mut batch = Vec::new();
        if !list_dir(&path.absolute, &RelativePath::root(), recursive, tx, &mut batch)? {
            return Ok(false);
        }
        if !batch.is_empty() && tx.blocking_send(Ok(Some(batch))).is_err() {
            return Ok(false);
        }
        Ok(true)
    }
}

fn create_dir_all(path: &Path) -> DispatchResult<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        // A file in place of one of the directories.
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(DispatchError::Conflict("not a directory"))
        }
        Err(err) => Err(err.into()),
    }
}

fn to_entry(path: RelativePath, metadata: &Metadata) -> DispatchResult<FileEntry> {
    let modified_at = DateTimeUtc::from(metadata.modified()?);
    Ok(if metadata.is_dir() {
        FileEntry::dir(path, modified_at)
    } else {
        FileEntry::file(path, metadata.len(), modified_at)
    })
}

fn list_dir(
    dir: &Path,
    relative: &RelativePath,
    recursive: bool,
    tx: &ListSender,
    batch: &mut Vec<FileEntry>,
) -> DispatchResult<bool> {
    let mut children = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let Ok(name) = item.file_name().into_string() else {
            warn!(dir = %dir.display(), "skipping file with non-UTF-8 name");
            continue;
        };
        if check_component(&name).is_err() {
            // In-flight uploads and other names clients can't address.
            continue;
        }
        let metadata = match item.metadata() {
            Ok(metadata) => metadata,
            // Removed while listing.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if metadata.file_type().is_symlink() {
            continue;
        }
        children.push((name, metadata));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, metadata) in children {
        let path = relative.join(&name)?;
        batch.push(to_entry(path.clone(), &metadata)?);
        if batch.len() >= LIST_BATCH_LEN
            && tx.blocking_send(Ok(Some(std::mem::take(batch)))).is_err()
        {
            return Ok(false);
        }
        if recursive && metadata.is_dir() {
            match list_dir(&dir.join(&name), &path, true, tx, batch) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(DispatchError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
    }
    Ok(true)
}
