#![allow(clippy::collapsible_else_if)]

pub mod admin;
pub mod config;
mod content_streaming;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod notify;
pub mod permissions;
pub mod resolver;
pub mod storage;

use {
    crate::{
        config::Config,
        credentials::CredentialStore,
        error::{DispatchError, DispatchResult, status_code},
        handler::{Context, Shared},
        notify::ChangeHub,
        resolver::PathResolver,
        storage::Storage,
    },
    anyhow::Result,
    blindbackup_protocol::{
        ErrorCode,
        encoding::{self, from_url_token},
        endpoints::{
            ContentRequest, DeleteUser, DownloadFile, GetServerTime, GetUsers, ListDirectory,
            ListenChanges, MakeDirectory, PollChanges, RemovePath, RequestToResponse,
            RequestToStreamingResponse, SaveUser, Stat, StreamingResponseItem, UploadFile, WhoAmI,
        },
    },
    blindbackup_sdk::server::serve_connection,
    bytes::{BufMut, Bytes, BytesMut},
    http_body_util::{BodyExt, Full, StreamBody, combinators::BoxBody},
    hyper::{
        Method, Request, Response, StatusCode,
        body::{self, Frame},
        header::AUTHORIZATION,
    },
    serde::{Serialize, de::DeserializeOwned},
    std::{convert::Infallible, future::Future, pin::pin, sync::Arc},
    tokio::{
        net::TcpListener,
        sync::mpsc::{self, Sender},
    },
    tokio_stream::{StreamExt, wrappers::ReceiverStream},
    tracing::{debug, error, info, warn},
};

pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Serves requests until `shutdown` completes.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    config.validate()?;
    let store = Arc::new(CredentialStore::load(&config.password_file)?);
    let hub = Arc::new(ChangeHub::new());
    let shared = Shared {
        store: Arc::clone(&store),
        resolver: Arc::new(PathResolver::new(&config.backup_root)),
        storage: Arc::new(Storage::new(&config.backup_root)),
        hub: Arc::clone(&hub),
        limits: config.limits,
    };
    let refresh_task = store.spawn_refresh_task(config.limits.credential_refresh_interval);
    let expiry_task = hub.spawn_expiry_task(config.limits.poll_timeout);

    let address = config.socket_address();
    let listener = TcpListener::bind(address).await?;
    info!(%address, root = %config.backup_root.display(), "listening");
    if let Some((cert, key)) = config.tls_files() {
        info!(
            cert = %cert.display(),
            key = %key.display(),
            "serving plain HTTP, TLS is expected to be terminated in front of this address"
        );
    }

    let mut shutdown = pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "new connection");
                    let shared = shared.clone();
                    let idle_timeout = shared.limits.idle_timeout;
                    tokio::spawn(serve_connection(stream, peer, idle_timeout, move |request| {
                        handle_request(shared.clone(), request)
                    }));
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            () = &mut shutdown => break,
        }
    }

    refresh_task.abort();
    expiry_task.abort();
    info!("server stopped");
    Ok(())
}

async fn handle_request(
    shared: Shared,
    request: Request<body::Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = try_handle_request(shared, request).await.unwrap_or_else(|status| {
        let mut response = Response::new(BodyExt::boxed(Full::new(Bytes::from(
            status.canonical_reason().unwrap_or_default(),
        ))));
        *response.status_mut() = status;
        response
    });
    debug!(%method, %path, status = %response.status(), "request handled");
    Ok(response)
}

async fn try_handle_request(
    shared: Shared,
    request: Request<body::Incoming>,
) -> Result<Response<ResponseBody>, StatusCode> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let ctx = match shared.authenticate(header) {
        Ok(ctx) => ctx,
        Err(err) => return Ok(reply::<()>(Err(err))),
    };

    let path = request.uri().path().to_owned();
    if let Some(token) = path.strip_prefix(UploadFile::CONTENT_PATH) {
        if request.method() == Method::PUT {
            let descriptor = parse_token::<UploadFile>(token)?;
            content_streaming::upload(ctx, request, descriptor).await
        } else if request.method() == Method::GET {
            let descriptor = parse_token::<DownloadFile>(token)?;
            content_streaming::download(ctx, descriptor).await
        } else {
            Err(StatusCode::METHOD_NOT_ALLOWED)
        }
    } else if request.method() != Method::POST {
        Err(StatusCode::NOT_FOUND)
    } else if path == RemovePath::PATH {
        wrap_request(ctx, request, handler::remove_path).await
    } else if path == MakeDirectory::PATH {
        wrap_request(ctx, request, handler::make_directory).await
    } else if path == ListDirectory::PATH {
        wrap_stream(ctx, request, handler::list_directory).await
    } else if path == Stat::PATH {
        wrap_request(ctx, request, handler::stat).await
    } else if path == GetServerTime::PATH {
        wrap_request(ctx, request, handler::get_server_time).await
    } else if path == ListenChanges::PATH {
        wrap_request(ctx, request, handler::listen_changes).await
    } else if path == PollChanges::PATH {
        wrap_request(ctx, request, handler::poll_changes).await
    } else if path == GetUsers::PATH {
        wrap_request(ctx, request, handler::get_users).await
    } else if path == SaveUser::PATH {
        wrap_request(ctx, request, handler::save_user).await
    } else if path == DeleteUser::PATH {
        wrap_request(ctx, request, handler::delete_user).await
    } else if path == WhoAmI::PATH {
        wrap_request(ctx, request, handler::who_am_i).await
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn wrap_request<T, F, Fut>(
    ctx: Context,
    request: Request<body::Incoming>,
    f: F,
) -> Result<Response<ResponseBody>, StatusCode>
where
    T: RequestToResponse + DeserializeOwned,
    <T as RequestToResponse>::Response: Serialize,
    F: FnOnce(Context, T) -> Fut,
    Fut: Future<Output = DispatchResult<<T as RequestToResponse>::Response>>,
{
    let request = parse_request(request).await?;
    Ok(reply(f(ctx, request).await))
}

type FrameSender<T> = Sender<DispatchResult<Option<Vec<StreamingResponseItem<T>>>>>;

async fn wrap_stream<T, F, Fut>(
    ctx: Context,
    request: Request<body::Incoming>,
    f: F,
) -> Result<Response<ResponseBody>, StatusCode>
where
    T: RequestToStreamingResponse + DeserializeOwned + Send + 'static,
    StreamingResponseItem<T>: Serialize + Send + 'static,
    F: FnOnce(Context, T, FrameSender<T>) -> Fut + Send + 'static,
    Fut: Future<Output = DispatchResult<()>> + Send,
{
    let (tx, mut rx) = mpsc::channel(5);
    let request = parse_request::<T>(request).await?;
    tokio::spawn(async move {
        match f(ctx, request, tx.clone()).await {
            Ok(()) => {
                let _ = tx.send(Ok(None)).await;
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        }
    });

    // A failure before the first frame gets a proper status code.
    let first = rx.recv().await;
    if let Some(Err(err)) = first {
        return Ok(reply::<()>(Err(err)));
    }
    let frames = tokio_stream::iter(first)
        .chain(ReceiverStream::new(rx))
        .map(|item| Ok(Frame::data(encode_frame(item))));
    Ok(Response::new(BodyExt::boxed(StreamBody::new(frames))))
}

async fn parse_request<T: DeserializeOwned>(
    request: Request<body::Incoming>,
) -> Result<T, StatusCode> {
    let bytes = request
        .into_body()
        .collect()
        .await
        .map_err(|err| {
            warn!(?err, "failed to read request body");
            StatusCode::BAD_REQUEST
        })?
        .to_bytes();
    encoding::deserialize(&bytes).map_err(|err| {
        warn!(?err, "failed to deserialize request body");
        StatusCode::BAD_REQUEST
    })
}

fn parse_token<T: DeserializeOwned>(token: &str) -> Result<T, StatusCode> {
    from_url_token(token).map_err(|err| {
        warn!(?err, "invalid content request");
        StatusCode::BAD_REQUEST
    })
}

/// Collapses an error to its code, logging what the client won't see.
fn to_code(err: DispatchError) -> ErrorCode {
    match &err {
        DispatchError::Internal(err) => error!(?err, "request failed"),
        DispatchError::PathEscape(_) | DispatchError::AuthenticationFailed => {}
        err => debug!(%err, "request rejected"),
    }
    err.code()
}

/// Encodes a unary reply. The HTTP status mirrors the error code.
pub(crate) fn reply<T: Serialize>(result: DispatchResult<T>) -> Response<ResponseBody> {
    let result = result.map_err(to_code);
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(code) => status_code(*code),
    };
    let bytes = encoding::serialize(&result).unwrap_or_else(|err| {
        error!(?err, "failed to serialize response");
        encoding::serialize(&Err::<(), _>(ErrorCode::InternalError)).unwrap_or_default()
    });
    let mut response = Response::new(BodyExt::boxed(Full::new(Bytes::from(bytes))));
    *response.status_mut() = status;
    response
}

/// Encodes one frame of a streaming reply: `u32` LE length followed by the data.
fn encode_frame<T: Serialize>(item: DispatchResult<Option<Vec<T>>>) -> Bytes {
    let item = item.map_err(to_code);
    let mut buf = BytesMut::zeroed(4);
    if let Err(err) = encoding::serialize_into((&mut buf).writer(), &item) {
        error!(?err, "failed to serialize response frame");
        buf.truncate(4);
        let _ = encoding::serialize_into(
            (&mut buf).writer(),
            &Err::<Option<Vec<T>>, _>(ErrorCode::InternalError),
        );
    }
    let len = u32::try_from(buf.len().saturating_sub(4)).unwrap_or(u32::MAX);
    if let Some(prefix) = buf.get_mut(..4) {
        prefix.copy_from_slice(&len.to_le_bytes());
    }
    buf.freeze()
}
