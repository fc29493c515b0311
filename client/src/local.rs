//! Local side of a transfer: scanning a tree and writing files into it.

use {
    anyhow::{Context as _, Result, bail},
    blindbackup_protocol::{
        DateTimeUtc, FileEntry, Listing, PARTIAL_SUFFIX, RelativePath, check_component,
    },
    fs_err as fs,
    std::{
        fs::Metadata,
        io,
        path::{Path, PathBuf},
        time::SystemTime,
    },
    tracing::warn,
};

/// Lists everything under `root` with paths relative to it.
///
/// Symbolic links and names that can't be stored on the server are skipped.
/// A missing root is an empty tree.
pub fn scan(root: &Path) -> Result<Listing> {
    let mut listing = Listing::new();
    match fs::symlink_metadata(root) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => bail!("not a directory: {}", root.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(listing),
        Err(err) => return Err(err.into()),
    }
    scan_dir(root, &RelativePath::root(), &mut listing)?;
    Ok(listing)
}

fn scan_dir(dir: &Path, relative: &RelativePath, listing: &mut Listing) -> Result<()> {
    for item in fs::read_dir(dir)? {
        let item = item?;
        let Ok(name) = item.file_name().into_string() else {
            warn!(dir = %dir.display(), "skipping file with non-UTF-8 name");
            continue;
        };
        if name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        if let Err(err) = check_component(&name) {
            warn!(dir = %dir.display(), %err, "skipping file");
            continue;
        }
        let metadata = match fs::symlink_metadata(item.path()) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if metadata.file_type().is_symlink() {
            warn!(path = %item.path().display(), "skipping symlink");
            continue;
        }
        let path = relative.join(&name)?;
        listing.insert(to_entry(path.clone(), &metadata)?)?;
        if metadata.is_dir() {
            scan_dir(&item.path(), &path, listing)?;
        }
    }
    Ok(())
}

fn to_entry(path: RelativePath, metadata: &Metadata) -> Result<FileEntry> {
    let modified_at = DateTimeUtc::from(metadata.modified()?);
    Ok(if metadata.is_dir() {
        FileEntry::dir(path, modified_at)
    } else {
        FileEntry::file(path, metadata.len(), modified_at)
    })
}

/// Where a download is written before it replaces the target.
pub fn partial_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid target path: {}", target.display()))?;
    Ok(target.with_file_name(format!(".{name}{PARTIAL_SUFFIX}")))
}

/// Moves a completely written download into place.
pub fn commit_download(
    partial: &Path,
    target: &Path,
    modified_at: Option<DateTimeUtc>,
) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).open(partial)?;
    if let Some(modified_at) = modified_at {
        file.file().set_modified(SystemTime::from(modified_at))?;
    }
    file.sync_all()?;
    drop(file);
    fs::rename(partial, target)?;
    Ok(())
}

/// Removes a file or a directory with everything inside. Missing paths are fine.
pub fn remove(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}
