use {
    crate::{Ctx, counters::TransferReport, local, path::SanitizedLocalPath, remote},
    anyhow::{Result, bail, ensure},
    blindbackup_protocol::{
        DateTimeUtc, ErrorCode, FileEntry, RelativePath, util::maybe_block_in_place,
    },
    blindbackup_sdk::client::error_code,
    fs_err as fs,
    tracing::{info, warn},
};

/// Uploads a local file or tree to `remote_path`.
///
/// Existing remote files are only replaced with `overwrite`; otherwise they are skipped.
/// Nothing is ever deleted.
pub async fn backup(
    ctx: &Ctx,
    local_path: &SanitizedLocalPath,
    remote_path: &RelativePath,
    overwrite: bool,
) -> Result<TransferReport> {
    let metadata = fs::symlink_metadata(local_path.as_path())?;
    let mut report = TransferReport::default();
    if metadata.is_file() {
        ensure!(!remote_path.is_root(), "cannot replace the home directory with a file");
        let modified_at = DateTimeUtc::from(metadata.modified()?);
        match remote::upload(ctx, local_path.as_path(), remote_path, modified_at, overwrite).await
        {
            Err(err) if error_code(&err) == Some(ErrorCode::Conflict) => {
                bail!("{remote_path} already exists on the server (use --overwrite to replace it)");
            }
            result => result?,
        }
        info!("uploaded {local_path} to {remote_path}");
        report.transferred = 1;
        return Ok(report);
    }
    ensure!(metadata.is_dir(), "not a file or directory: {local_path}");

    let listing = maybe_block_in_place(|| local::scan(local_path.as_path()))?;
    if !remote_path.is_root() {
        remote::mkdir(ctx, remote_path).await?;
    }
    for entry in listing.iter() {
        upload_entry(ctx, local_path, remote_path, entry, overwrite, &mut report).await;
    }
    Ok(report)
}

async fn upload_entry(
    ctx: &Ctx,
    local_root: &SanitizedLocalPath,
    remote_root: &RelativePath,
    entry: &FileEntry,
    overwrite: bool,
    report: &mut TransferReport,
) {
    let remote_path = remote_root.join_path(&entry.path);
    let result = if entry.is_dir {
        remote::mkdir(ctx, &remote_path).await
    } else {
        let local_path = local_root.join(&entry.path);
        remote::upload(ctx, &local_path, &remote_path, entry.modified_at, overwrite).await
    };
    match result {
        Ok(()) if entry.is_dir => {}
        Ok(()) => {
            info!("uploaded {}", entry.path);
            report.transferred = report.transferred.saturating_add(1);
        }
        Err(err) if !entry.is_dir && error_code(&err) == Some(ErrorCode::Conflict) => {
            info!("skipped {}: already exists on the server", entry.path);
            report.skipped = report.skipped.saturating_add(1);
        }
        Err(err) => {
            warn!(?err, "failed to upload {}", entry.path);
            report.failed = report.failed.saturating_add(1);
        }
    }
}
