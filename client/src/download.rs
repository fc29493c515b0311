use {
    crate::{Ctx, counters::TransferReport, path::SanitizedLocalPath, remote},
    anyhow::{Result, bail},
    blindbackup_protocol::{ErrorCode, FileEntry, RelativePath},
    blindbackup_sdk::client::error_code,
    fs_err as fs,
    std::{io, path::Path},
    tracing::{info, warn},
};

fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Downloads a remote file or tree to `local_path`.
///
/// Existing local files are only replaced with `overwrite`; otherwise they are skipped.
/// Nothing is ever deleted.
pub async fn restore(
    ctx: &Ctx,
    remote_path: &RelativePath,
    local_path: &SanitizedLocalPath,
    overwrite: bool,
) -> Result<TransferReport> {
    // Without the sync permission only single files can be restored,
    // and their modification time is unknown.
    let entry = match remote::stat(ctx, remote_path).await {
        Ok(entry) => Some(entry),
        Err(err) if error_code(&err) == Some(ErrorCode::PermissionDenied) => None,
        Err(err) => return Err(err),
    };
    let mut report = TransferReport::default();
    if entry.as_ref().is_some_and(|entry| entry.is_dir) {
        let listing = remote::list(ctx, remote_path, true).await?;
        fs::create_dir_all(local_path)?;
        for entry in listing.iter() {
            download_entry(ctx, remote_path, local_path, entry, overwrite, &mut report).await;
        }
        return Ok(report);
    }

    if !overwrite && exists(local_path.as_path())? {
        bail!("{local_path} already exists (use --overwrite to replace it)");
    }
    let modified_at = entry.map(|entry| entry.modified_at);
    let size = remote::download(ctx, remote_path, local_path.as_path(), modified_at).await?;
    info!(size, "downloaded {remote_path} to {local_path}");
    report.transferred = 1;
    Ok(report)
}

async fn download_entry(
    ctx: &Ctx,
    remote_root: &RelativePath,
    local_root: &SanitizedLocalPath,
    entry: &FileEntry,
    overwrite: bool,
    report: &mut TransferReport,
) {
    let target = local_root.join(&entry.path);
    let result = if entry.is_dir {
        fs::create_dir_all(&target).map_err(Into::into)
    } else {
        match exists(&target) {
            Ok(true) if !overwrite => {
                info!("skipped {}: already exists", entry.path);
                report.skipped = report.skipped.saturating_add(1);
                return;
            }
            Ok(_) => {
                let remote_path = remote_root.join_path(&entry.path);
                remote::download(ctx, &remote_path, &target, Some(entry.modified_at))
                    .await
                    .map(|_| {
                        info!("downloaded {}", entry.path);
                        report.transferred = report.transferred.saturating_add(1);
                    })
            }
            Err(err) => Err(err),
        }
    };
    if let Err(err) = result {
        warn!(?err, "failed to download {}", entry.path);
        report.failed = report.failed.saturating_add(1);
    }
}
