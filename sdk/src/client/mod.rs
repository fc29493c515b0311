mod content;

use {
    anyhow::{Error, Result, bail, format_err},
    blindbackup_protocol::{
        Credentials, ErrorCode,
        encoding::{self, deserialize},
        endpoints::{RequestToResponse, RequestToStreamingResponse},
    },
    byteorder::{ByteOrder, LE},
    cadd::{ops::Cadd, prelude::IntoType},
    futures::{Stream, StreamExt},
    reqwest::{Certificate, Method, StatusCode, Url, header::AUTHORIZATION},
    serde::{Serialize, de::DeserializeOwned},
    std::{future::Future, time::Duration},
    stream_generator::generate_try_stream,
    tokio::time::{sleep, timeout},
    tracing::{instrument, warn},
};

/// Reuse created client or clone it in order to reuse a connection pool.
#[derive(Clone)]
pub struct Client {
    reqwest: reqwest::Client,
    server_url: Url,
    authorization: String,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Loading large files may take a long time.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3600 * 24);

#[must_use]
#[inline]
pub fn upload_timeout(upload_size: u64) -> Duration {
    // Assuming upload speed above 1 MB/s.
    DEFAULT_TIMEOUT.saturating_add(Duration::from_micros(upload_size))
}

/// Returns the server's error category if `err` was reported by the server.
#[must_use]
#[inline]
pub fn error_code(err: &Error) -> Option<ErrorCode> {
    err.downcast_ref::<ErrorCode>().copied()
}

impl Client {
    #[inline]
    pub fn new(server_url: Url, credentials: &Credentials) -> Result<Self> {
        Self::with_root_certificate(server_url, credentials, None)
    }

    /// Creates a client that additionally trusts the specified PEM certificate,
    /// e.g. a self-signed certificate of the server.
    #[inline]
    pub fn with_root_certificate(
        server_url: Url,
        credentials: &Credentials,
        pem: Option<&[u8]>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT);
        if let Some(pem) = pem {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }
        Ok(Self {
            server_url,
            authorization: credentials.to_basic_header(),
            reqwest: builder.build()?,
        })
    }

    #[must_use]
    #[inline]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    #[instrument(skip_all)]
    #[inline(never)]
    pub async fn request_with_timeout<R>(
        &self,
        request: &R,
        timeout: Option<Duration>,
    ) -> Result<R::Response>
    where
        R: RequestToResponse + Serialize + Send + Sync,
        R::Response: DeserializeOwned + Send + Sync,
    {
        let url = self.server_url.join(R::PATH)?;
        let body = encoding::serialize(&request)?;
        let (status, bytes) = ok_or_retry(|| async {
            let mut post_request = self
                .reqwest
                .request(Method::POST, url.clone())
                .header(AUTHORIZATION, &self.authorization)
                .body(body.clone());
            if let Some(timeout) = timeout {
                post_request = post_request.timeout(timeout);
            }

            let response = post_request.send().await.map_err(RequestError::transport)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(RequestError::transport)?;
            Ok((status, bytes))
        })
        .await?;
        parse_response(status, &bytes)
    }

    #[inline]
    pub async fn request<R>(&self, request: &R) -> Result<R::Response>
    where
        R: RequestToResponse + Serialize + Send + Sync,
        R::Response: DeserializeOwned + Send + Sync,
    {
        self.request_with_timeout(request, None).await
    }

    /// Sends a request with a streaming response. Items arrive in batches
    /// and are yielded one by one.
    #[inline(never)]
    pub fn stream<R>(
        &self,
        request: &R,
    ) -> impl Stream<Item = Result<R::ResponseItem>> + use<R>
    where
        R: RequestToStreamingResponse + Serialize + Send + Sync + 'static,
        R::ResponseItem: DeserializeOwned + Send + Sync + 'static,
    {
        let this = self.clone();
        let request = encoding::serialize(&request);
        generate_try_stream(|mut y| async move {
            let mut response = timeout(
                DEFAULT_TIMEOUT,
                this.reqwest
                    .request(Method::POST, this.server_url.join(R::PATH)?)
                    .timeout(RESPONSE_TIMEOUT)
                    .header(AUTHORIZATION, &this.authorization)
                    .body(request?)
                    .send(),
            )
            .await??;
            if !response.status().is_success() {
                let status = response.status();
                let bytes = response.bytes().await?;
                return Err(status_error::<()>(status, &bytes));
            }
            let mut buf = Vec::new();
            while let Some(chunk) = timeout(DEFAULT_TIMEOUT, response.chunk()).await?? {
                buf.extend_from_slice(&chunk);
                while let Some((bytes, index)) = take_chunk(&buf)? {
                    let data = deserialize::<Result<Option<Vec<R::ResponseItem>>, ErrorCode>>(
                        bytes,
                    )??;

                    buf.drain(..index);
                    if let Some(data) = data {
                        for item in data {
                            y.send(Ok(item)).await;
                        }
                    } else {
                        return Ok(());
                    }
                }
            }
            bail!("unexpected end of response");
        })
        .boxed()
    }
}

/// Decodes a reply body. Error replies carry an encoded `ErrorCode` as well.
fn parse_response<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T> {
    match deserialize::<Result<T, ErrorCode>>(bytes) {
        Ok(response) => Ok(response?),
        Err(_) => Err(status_error::<T>(status, bytes)),
    }
}

fn status_error<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Error {
    match deserialize::<Result<T, ErrorCode>>(bytes) {
        Ok(Err(code)) => code.into(),
        _ => format_err!(
            "server returned {status}: {}",
            String::from_utf8_lossy(bytes).trim()
        ),
    }
}

fn take_chunk(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = LE::read_u32(buf).try_into_type::<usize>()?;
    let end = len.cadd(4_usize)?;
    if let Some(bytes) = buf.get(4..end) {
        Ok(Some((bytes, end)))
    } else {
        Ok(None)
    }
}

/// Retries the request if an error arises due to the transport.
async fn ok_or_retry<T, F, Fut>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    const NUM_RETRIES: usize = 5;
    const RETRY_PERIOD: Duration = Duration::from_secs(2);
    let mut attempt = 0;
    loop {
        attempt = attempt.cadd(1_usize)?;
        let transport_err = match f().await {
            Ok(x) => break Ok(x),
            Err(RequestError::Application(err)) => break Err(err),
            Err(RequestError::Transport(err)) => err,
        };
        if attempt >= NUM_RETRIES {
            break Err(transport_err);
        }
        warn!(error = %transport_err, attempt, "transport failed, will retry");
        sleep(RETRY_PERIOD).await;
    }
}

enum RequestError {
    Transport(Error),
    Application(Error),
}

impl RequestError {
    fn application(err: impl Into<Error>) -> Self {
        Self::Application(err.into())
    }

    fn transport(err: impl Into<Error>) -> Self {
        Self::Transport(err.into())
    }
}

impl From<RequestError> for Error {
    #[inline]
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport(err) | RequestError::Application(err) => err,
        }
    }
}
