use {
    crate::{Ctx, counters::SyncReport, local, path::SanitizedLocalPath, remote},
    anyhow::Result,
    blindbackup_protocol::{ErrorCode, RelativePath, util::maybe_block_in_place},
    blindbackup_sdk::{
        SyncDiffEngine, SyncDirection, SyncOptions,
        client::error_code,
        diff::{Side, SyncOperation, agreed_listing},
    },
    tracing::{info, warn},
};

/// A pair of directories to reconcile.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub local: &'a SanitizedLocalPath,
    pub remote: &'a RelativePath,
    pub direction: SyncDirection,
    pub options: SyncOptions,
    pub dry_run: bool,
}

fn describe(operation: &SyncOperation) -> String {
    match operation {
        SyncOperation::Copy { path, to, .. } => format!("copy {path} to {to}"),
        SyncOperation::Delete {
            path,
            side,
            is_dir: true,
        } => format!("delete directory {path} on {side}"),
        SyncOperation::Delete { path, side, .. } => format!("delete {path} on {side}"),
        SyncOperation::Mkdir { path, side } => format!("create directory {path} on {side}"),
    }
}

/// Makes `request.local` and `request.remote` agree according to the direction.
///
/// Conflicts and failed operations are reported and skipped; the rest of the
/// plan still runs. Afterwards the entries both sides agree on are stored as
/// the baseline for the next bidirectional sync of this pair.
pub async fn sync(ctx: &Ctx, request: &SyncRequest<'_>) -> Result<SyncReport> {
    request.options.validate()?;
    let client_listing = maybe_block_in_place(|| local::scan(request.local.as_path()))?;
    let server_listing = remote::list(ctx, request.remote, true).await?;
    let baseline = if request.direction == SyncDirection::Bidirectional {
        ctx.db.baseline(request.local, request.remote)?
    } else {
        None
    };
    let mut engine = SyncDiffEngine::new(request.options);
    if let Some(baseline) = &baseline {
        engine = engine.with_baseline(baseline);
    }
    let plan = engine.diff(&server_listing, &client_listing, request.direction);

    let mut report = SyncReport::default();
    for conflict in &plan.conflicts {
        warn!(path = %conflict.path, reason = %conflict.reason, "conflict, skipped");
        report.conflicts = report.conflicts.saturating_add(1);
    }
    if request.dry_run {
        for operation in &plan.operations {
            info!("would {}", describe(operation));
        }
        return Ok(report);
    }

    for operation in &plan.operations {
        match execute(ctx, request, operation).await {
            Ok(()) => {
                info!("{}", describe(operation));
                report.record(operation);
            }
            Err(err) => {
                warn!(?err, "failed to {}", describe(operation));
                report.failed = report.failed.saturating_add(1);
            }
        }
    }

    let client_listing = maybe_block_in_place(|| local::scan(request.local.as_path()))?;
    let server_listing = remote::list(ctx, request.remote, true).await?;
    let agreed = agreed_listing(&server_listing, &client_listing, &request.options);
    ctx.db
        .set_baseline(request.local, request.remote, &agreed)?;
    Ok(report)
}

async fn execute(ctx: &Ctx, request: &SyncRequest<'_>, operation: &SyncOperation) -> Result<()> {
    let path = operation.path();
    let local_path = request.local.join(path);
    let remote_path = request.remote.join_path(path);
    match operation {
        SyncOperation::Copy {
            to: Side::Server,
            source,
            ..
        } => remote::upload(ctx, &local_path, &remote_path, source.modified_at, true).await,
        SyncOperation::Copy {
            to: Side::Client,
            source,
            ..
        } => remote::download(ctx, &remote_path, &local_path, Some(source.modified_at))
            .await
            .map(drop),
        SyncOperation::Delete {
            side: Side::Server, ..
        } => match remote::remove(ctx, &remote_path).await {
            Err(err) if error_code(&err) == Some(ErrorCode::NotFound) => Ok(()),
            result => result,
        },
        SyncOperation::Delete {
            side: Side::Client, ..
        } => maybe_block_in_place(|| local::remove(&local_path)),
        SyncOperation::Mkdir {
            side: Side::Server, ..
        } => remote::mkdir(ctx, &remote_path).await,
        SyncOperation::Mkdir {
            side: Side::Client, ..
        } => Ok(fs_err::create_dir_all(&local_path)?),
    }
}
