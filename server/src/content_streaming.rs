use {
    crate::{
        ResponseBody,
        error::DispatchResult,
        handler::Context,
        permissions::OperationKind,
        reply,
    },
    blindbackup_protocol::{
        ChangeKind,
        endpoints::{DownloadFile, UploadFile},
        util::{maybe_block_in_place, stream_file},
    },
    http_body_util::{BodyExt, StreamBody},
    hyper::{
        Request, Response, StatusCode,
        body::{self, Frame},
        header::CONTENT_LENGTH,
    },
    std::sync::Arc,
    tokio::{sync::Mutex, time::timeout},
    tokio_stream::StreamExt,
    tracing::{debug, warn},
};

fn content_length(request: &Request<body::Incoming>) -> Result<u64, StatusCode> {
    request
        .headers()
        .get(CONTENT_LENGTH)
        .ok_or_else(|| {
            warn!("missing content length in request");
            StatusCode::LENGTH_REQUIRED
        })?
        .to_str()
        .map_err(|err| {
            warn!(%err, "invalid content length in request");
            StatusCode::BAD_REQUEST
        })?
        .parse()
        .map_err(|err| {
            warn!(%err, "invalid content length in request");
            StatusCode::BAD_REQUEST
        })
}

pub async fn upload(
    ctx: Context,
    mut request: Request<body::Incoming>,
    descriptor: UploadFile,
) -> Result<Response<ResponseBody>, StatusCode> {
    let content_length = content_length(&request)?;
    let prepared = ctx.check(OperationKind::Write).and_then(|()| {
        let path = ctx.resolve(&descriptor.path)?;
        let pending = maybe_block_in_place(|| ctx.storage().start_upload(&path, descriptor.overwrite))?;
        Ok((path, pending))
    });
    let (path, mut pending) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return Ok(reply::<()>(Err(err))),
    };

    let idle_timeout = ctx.shared.limits.idle_timeout;
    loop {
        let frame = match timeout(idle_timeout, request.body_mut().frame()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                warn!(path = %path.from_root, received = pending.written(), "upload stalled");
                return Err(StatusCode::REQUEST_TIMEOUT);
            }
        };
        let frame = frame.map_err(|err| {
            debug!(%err, "failed to read request frame");
            StatusCode::BAD_REQUEST
        })?;
        let Some(data) = frame.data_ref() else {
            continue;
        };
        if let Err(err) = maybe_block_in_place(|| pending.write(data)) {
            return Ok(reply::<()>(Err(err.into())));
        }
        if pending.written() > content_length {
            warn!(content_length, received = pending.written(), "request body too long");
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    if content_length != pending.written() {
        warn!(content_length, received = pending.written(), "content length mismatch");
        return Err(StatusCode::BAD_REQUEST);
    }

    let result: DispatchResult<()> =
        maybe_block_in_place(|| pending.commit(descriptor.modified_at)).map(|()| {
            debug!(user = %ctx.user.name, path = %path.from_root, content_length, "uploaded");
            ctx.hub()
                .record(&path.from_root, ChangeKind::File, descriptor.origin.as_ref());
        });
    Ok(reply(result))
}

pub async fn download(
    ctx: Context,
    descriptor: DownloadFile,
) -> Result<Response<ResponseBody>, StatusCode> {
    let opened = ctx.check(OperationKind::Read).and_then(|()| {
        let path = ctx.resolve(&descriptor.path)?;
        maybe_block_in_place(|| ctx.storage().open_file(&path))
    });
    let (file, len) = match opened {
        Ok(opened) => opened,
        Err(err) => return Ok(reply::<()>(Err(err))),
    };
    // A read error ends the body early, which the client sees as a length mismatch.
    let frames = stream_file(Arc::new(Mutex::new(file)))
        .map_while(|chunk| chunk.ok())
        .map(|bytes| Ok(Frame::data(bytes)));
    Response::builder()
        .header(CONTENT_LENGTH, len)
        .body(BodyExt::boxed(StreamBody::new(frames)))
        .map_err(|err| {
            warn!(%err, "failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
