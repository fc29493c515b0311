use {
    crate::{
        Ctx,
        path::SanitizedLocalPath,
        remote::remote_path,
        sync::{SyncRequest, sync},
    },
    anyhow::Result,
    blindbackup_protocol::{
        ChangeEvent, ChangeKind, ErrorCode, ObserverId, RelativePath,
        endpoints::{ListenChanges, PollChanges},
    },
    blindbackup_sdk::{SyncDirection, client::error_code, signal::shutdown_signal},
    std::{pin::pin, time::Duration},
    tracing::{info, warn},
};

/// Longer than any sensible server poll timeout.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

async fn listen(ctx: &Ctx, remote: &RelativePath) -> Result<ObserverId> {
    let id = ctx
        .client
        .request(&ListenChanges {
            path: remote_path(ctx, remote)?,
        })
        .await?;
    *ctx.origin.lock() = Some(id.clone());
    Ok(id)
}

fn describe(ctx: &Ctx, event: &ChangeEvent) -> String {
    let path = match &ctx.cipher {
        Some(cipher) => cipher
            .decrypt_path(&event.path)
            .map_or_else(|_| format!("{} (undecryptable)", event.path), |path| path.to_string()),
        None => event.path.to_string(),
    };
    let kind = match event.kind {
        ChangeKind::File => "file written",
        ChangeKind::Directory => "directory created",
        ChangeKind::Delete => "deleted",
    };
    format!("{kind}: {path}")
}

/// Prints changes made by other clients under `remote` until interrupted.
/// With `local`, the pair is synced once at start and after every batch of changes.
pub async fn watch(
    ctx: &Ctx,
    remote: &RelativePath,
    local: Option<&SanitizedLocalPath>,
) -> Result<()> {
    let mut id = listen(ctx, remote).await?;
    info!("watching {remote}");
    let request = local.map(|local| SyncRequest {
        local,
        remote,
        direction: SyncDirection::Bidirectional,
        options: ctx.config.sync.into(),
        dry_run: false,
    });
    if let Some(request) = &request {
        let report = sync(ctx, request).await?;
        info!("initial sync complete: {report}");
    }

    let mut shutdown = pin!(shutdown_signal());
    loop {
        let poll_request = PollChanges { id: id.clone() };
        let poll = ctx
            .client
            .request_with_timeout(&poll_request, Some(POLL_REQUEST_TIMEOUT));
        let events = tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!(%signal, "stopped watching");
                return Ok(());
            }
            events = poll => events,
        };
        let events = match events {
            Ok(events) => events,
            Err(err) if error_code(&err) == Some(ErrorCode::NotFound) => {
                warn!("observer expired, listening again");
                id = listen(ctx, remote).await?;
                continue;
            }
            Err(err) => return Err(err),
        };
        let foreign: Vec<&ChangeEvent> = events
            .iter()
            .filter(|event| event.origin.as_ref() != Some(&id))
            .collect();
        for event in &foreign {
            info!("{}", describe(ctx, event));
        }
        if foreign.is_empty() {
            continue;
        }
        if let Some(request) = &request {
            match sync(ctx, request).await {
                Ok(report) => info!("sync complete: {report}"),
                Err(err) => warn!(?err, "sync failed"),
            }
        }
    }
}
