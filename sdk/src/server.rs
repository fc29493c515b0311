use {
    hyper::{
        Request, Response,
        body::{Body, Incoming},
        server::conn::http1,
        service::service_fn,
    },
    hyper_util::rt::{TokioIo, TokioTimer},
    std::{convert::Infallible, error::Error, future::Future, io, net::SocketAddr, time::Duration},
    tokio::io::{AsyncRead, AsyncWrite},
    tracing::{debug, warn},
};

/// Serves HTTP/1.1 requests arriving on `io` until the peer disconnects.
///
/// A connection that doesn't send request headers within `idle_timeout` is closed.
pub async fn serve_connection<C, H, Fut, B>(
    io: C,
    peer: SocketAddr,
    idle_timeout: Duration,
    handler: H,
) where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: Fn(Request<Incoming>) -> Fut,
    Fut: Future<Output = Result<Response<B>, Infallible>>,
    B: Body + 'static,
    <B as Body>::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let serving = http1::Builder::new()
        .keep_alive(true)
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout)
        .serve_connection(TokioIo::new(io), service_fn(handler))
        .await;
    if let Err(err) = serving {
        if let Some(err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
            match err.kind() {
                io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset => {
                    debug!(%peer, error = ?err, "connection closed by peer");
                }
                _ => warn!(%peer, error = ?err, "error while serving"),
            }
        } else if err.is_incomplete_message() {
            debug!(%peer, error = ?err, "interrupted request");
        } else if err.is_timeout() {
            debug!(%peer, "idle connection closed");
        } else {
            warn!(%peer, error = ?err, "failed to serve HTTP");
        }
    }
}
