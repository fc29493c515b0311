//! Remote side of a transfer.
//!
//! Paths given here are plaintext paths relative to the user's home. With an
//! encryption key configured, names are encrypted before they are sent and
//! sizes reported by the server are mapped back to plaintext sizes.

use {
    crate::{Ctx, local},
    anyhow::{Context as _, Result},
    blindbackup_protocol::{
        DateTimeUtc, ErrorCode, FileEntry, Listing, RelativePath,
        endpoints::{DownloadFile, ListDirectory, MakeDirectory, RemovePath, Stat, UploadFile},
    },
    blindbackup_sdk::{client::error_code, crypto::original_size},
    futures::TryStreamExt,
    std::path::Path,
    tracing::{debug, warn},
};

/// Path as the server sees it.
pub fn remote_path(ctx: &Ctx, path: &RelativePath) -> Result<String> {
    Ok(match &ctx.cipher {
        Some(cipher) => cipher.encrypt_path(path)?.as_str().to_owned(),
        None => path.as_str().to_owned(),
    })
}

/// Converts an entry reported by the server into its plaintext form.
pub fn decrypt_entry(ctx: &Ctx, entry: FileEntry) -> Result<FileEntry> {
    let Some(cipher) = &ctx.cipher else {
        return Ok(entry);
    };
    let path = cipher.decrypt_path(&entry.path)?;
    let size = if entry.is_dir {
        0
    } else {
        original_size(entry.size)
            .with_context(|| format!("invalid encrypted file size: {}", entry.size))?
    };
    Ok(FileEntry {
        path,
        size,
        ..entry
    })
}

/// Lists `root` on the server. A missing root is an empty tree.
///
/// Entries that can't be decrypted with the configured key are skipped.
pub async fn list(ctx: &Ctx, root: &RelativePath, recursive: bool) -> Result<Listing> {
    let request = ListDirectory {
        path: remote_path(ctx, root)?,
        recursive,
    };
    let entries = ctx.client.stream(&request);
    tokio::pin!(entries);
    let mut listing = Listing::new();
    loop {
        let entry = match entries.try_next().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) if error_code(&err) == Some(ErrorCode::NotFound) => {
                debug!(%root, "remote directory doesn't exist");
                return Ok(Listing::new());
            }
            Err(err) => return Err(err),
        };
        let stored_path = entry.path.clone();
        match decrypt_entry(ctx, entry) {
            Ok(entry) => listing.upsert(entry),
            Err(err) => warn!(%root, path = %stored_path, %err, "skipping foreign remote entry"),
        }
    }
    Ok(listing)
}

pub async fn stat(ctx: &Ctx, path: &RelativePath) -> Result<FileEntry> {
    let entry = ctx
        .client
        .request(&Stat {
            path: remote_path(ctx, path)?,
        })
        .await?;
    decrypt_entry(ctx, entry)
}

pub async fn upload(
    ctx: &Ctx,
    local_path: &Path,
    path: &RelativePath,
    modified_at: DateTimeUtc,
    overwrite: bool,
) -> Result<()> {
    let request = UploadFile {
        path: remote_path(ctx, path)?,
        modified_at: Some(modified_at),
        overwrite,
        origin: ctx.origin(),
    };
    match &ctx.cipher {
        Some(cipher) => {
            ctx.client
                .encrypt_and_upload(&request, local_path, cipher)
                .await
        }
        None => {
            let file = fs_err::File::open(local_path)?;
            ctx.client.upload(&request, file).await
        }
    }
}

/// Downloads a file and puts it at `target`, replacing an existing file.
/// Returns the plaintext size.
pub async fn download(
    ctx: &Ctx,
    path: &RelativePath,
    target: &Path,
    modified_at: Option<DateTimeUtc>,
) -> Result<u64> {
    let request = DownloadFile {
        path: remote_path(ctx, path)?,
    };
    if let Some(parent) = target.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let partial = local::partial_path(target)?;
    let result = match &ctx.cipher {
        Some(cipher) => {
            ctx.client
                .download_and_decrypt(&request, &partial, cipher)
                .await
        }
        None => {
            let mut file = fs_err::File::create(&partial)?;
            ctx.client.download(&request, &mut file).await
        }
    };
    let size = match result {
        Ok(size) => size,
        Err(err) => {
            let _ = fs_err::remove_file(&partial);
            return Err(err);
        }
    };
    local::commit_download(&partial, target, modified_at)?;
    Ok(size)
}

pub async fn remove(ctx: &Ctx, path: &RelativePath) -> Result<()> {
    ctx.client
        .request(&RemovePath {
            path: remote_path(ctx, path)?,
            origin: ctx.origin(),
        })
        .await
}

pub async fn mkdir(ctx: &Ctx, path: &RelativePath) -> Result<()> {
    ctx.client
        .request(&MakeDirectory {
            path: remote_path(ctx, path)?,
            origin: ctx.origin(),
        })
        .await
}
