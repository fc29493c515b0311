use {
    crate::{
        admin,
        config::Limits,
        credentials::{CredentialStore, CredentialTable, User},
        error::{DispatchError, DispatchResult},
        notify::ChangeHub,
        permissions::{Authorization, OperationKind, authorize},
        resolver::{PathResolver, ResolvedPath},
        storage::{ListSender, Storage},
    },
    anyhow::anyhow,
    blindbackup_protocol::{
        ChangeKind, Credentials, normalize_time,
        endpoints::{
            DeleteUser, GetServerTime, GetUsers, ListDirectory, ListenChanges, MakeDirectory,
            PollChanges, RemovePath, Response, SaveUser, Stat, WhoAmI,
        },
        util::maybe_block_in_place,
    },
    chrono::Utc,
    std::sync::Arc,
    tracing::{debug, warn},
};

/// State shared by all connections.
#[derive(Debug, Clone)]
pub struct Shared {
    pub store: Arc<CredentialStore>,
    pub resolver: Arc<PathResolver>,
    pub storage: Arc<Storage>,
    pub hub: Arc<ChangeHub>,
    pub limits: Limits,
}

/// Everything a single authenticated request needs.
#[derive(Debug, Clone)]
pub struct Context {
    pub shared: Shared,
    /// Credential table the request was authenticated against. It stays the
    /// same for the whole request even if the password file is reloaded.
    pub table: Arc<CredentialTable>,
    pub user: User,
}

impl Shared {
    /// Checks the `Authorization` header value against the current credential table.
    pub fn authenticate(&self, header: Option<&str>) -> DispatchResult<Context> {
        let credentials = header
            .ok_or_else(|| anyhow!("missing authorization header"))
            .and_then(Credentials::from_basic_header)
            .map_err(|err| {
                warn!(error = %err, "authentication failed: malformed credentials");
                DispatchError::AuthenticationFailed
            })?;
        let table = self.store.current();
        let Some(user) = table.authenticate(&credentials).cloned() else {
            warn!(login = %credentials.login, "authentication failed");
            return Err(DispatchError::AuthenticationFailed);
        };
        Ok(Context {
            shared: self.clone(),
            table,
            user,
        })
    }
}

impl Context {
    pub fn check(&self, operation: OperationKind) -> DispatchResult<()> {
        match authorize(self.user.permissions, operation) {
            Authorization::Allowed => Ok(()),
            Authorization::Denied => {
                debug!(user = %self.user.name, ?operation, "permission denied");
                Err(DispatchError::PermissionDenied)
            }
        }
    }

    pub fn resolve(&self, client_path: &str) -> DispatchResult<ResolvedPath> {
        self.shared.resolver.resolve(&self.user.home, client_path)
    }

    pub fn storage(&self) -> &Storage {
        &self.shared.storage
    }

    pub fn hub(&self) -> &ChangeHub {
        &self.shared.hub
    }
}

pub async fn remove_path(ctx: Context, request: RemovePath) -> DispatchResult<Response<RemovePath>> {
    ctx.check(OperationKind::Delete)?;
    let path = ctx.resolve(&request.path)?;
    let was_dir = maybe_block_in_place(|| ctx.storage().remove(&path))?;
    debug!(user = %ctx.user.name, path = %path.from_root, was_dir, "removed");
    ctx.hub()
        .record(&path.from_root, ChangeKind::Delete, request.origin.as_ref());
    Ok(())
}

pub async fn make_directory(
    ctx: Context,
    request: MakeDirectory,
) -> DispatchResult<Response<MakeDirectory>> {
    ctx.check(OperationKind::Write)?;
    let path = ctx.resolve(&request.path)?;
    maybe_block_in_place(|| ctx.storage().make_dir(&path))?;
    ctx.hub()
        .record(&path.from_root, ChangeKind::Directory, request.origin.as_ref());
    Ok(())
}

pub async fn list_directory(
    ctx: Context,
    request: ListDirectory,
    tx: ListSender,
) -> DispatchResult<()> {
    ctx.check(OperationKind::List)?;
    let path = ctx.resolve(&request.path)?;
    let storage = Arc::clone(&ctx.shared.storage);
    let completed =
        tokio::task::spawn_blocking(move || storage.list(&path, request.recursive, &tx))
            .await
            .map_err(anyhow::Error::from)??;
    if !completed {
        debug!(user = %ctx.user.name, "listing receiver closed");
    }
    Ok(())
}

pub async fn stat(ctx: Context, request: Stat) -> DispatchResult<Response<Stat>> {
    ctx.check(OperationKind::Stat)?;
    let path = ctx.resolve(&request.path)?;
    maybe_block_in_place(|| ctx.storage().stat(&path))
}

pub async fn get_server_time(
    ctx: Context,
    _request: GetServerTime,
) -> DispatchResult<Response<GetServerTime>> {
    ctx.check(OperationKind::ServerTime)?;
    Ok(normalize_time(Utc::now()))
}

pub async fn listen_changes(
    ctx: Context,
    request: ListenChanges,
) -> DispatchResult<Response<ListenChanges>> {
    ctx.check(OperationKind::Notify)?;
    let path = ctx.resolve(&request.path)?;
    Ok(ctx
        .hub()
        .listen(&ctx.user.name, &ctx.user.home, &path.from_root))
}

pub async fn poll_changes(
    ctx: Context,
    request: PollChanges,
) -> DispatchResult<Response<PollChanges>> {
    ctx.check(OperationKind::Notify)?;
    ctx.hub()
        .poll(&ctx.user.name, &request.id, ctx.shared.limits.poll_timeout)
        .await
}

pub async fn get_users(ctx: Context, _request: GetUsers) -> DispatchResult<Response<GetUsers>> {
    ctx.check(OperationKind::Admin)?;
    Ok(admin::users(&ctx.table))
}

pub async fn save_user(ctx: Context, request: SaveUser) -> DispatchResult<Response<SaveUser>> {
    ctx.check(OperationKind::Admin)?;
    maybe_block_in_place(|| admin::save_user(&ctx.shared.store, &ctx.user.name, request))
}

pub async fn delete_user(ctx: Context, request: DeleteUser) -> DispatchResult<Response<DeleteUser>> {
    ctx.check(OperationKind::Admin)?;
    maybe_block_in_place(|| admin::delete_user(&ctx.shared.store, &ctx.user.name, &request.login))
}

pub async fn who_am_i(ctx: Context, _request: WhoAmI) -> DispatchResult<Response<WhoAmI>> {
    ctx.check(OperationKind::WhoAmI)?;
    Ok(ctx.user.info())
}
