use {
    super::{Client, DEFAULT_TIMEOUT, RESPONSE_TIMEOUT, RequestError, ok_or_retry, status_error, upload_timeout},
    crate::crypto::{Cipher, DecryptingWriter, original_size},
    anyhow::{Context as _, Result, ensure, format_err},
    blindbackup_protocol::{
        encoding::to_url_token,
        endpoints::{ContentRequest, DownloadFile, UploadFile},
        util::{maybe_block_in_place, stream_file},
    },
    fs_err::File,
    reqwest::{
        Body, Response, Url,
        header::{AUTHORIZATION, CONTENT_LENGTH},
    },
    serde::Serialize,
    std::{
        fmt::Debug,
        io::{Read, Seek, SeekFrom, Write},
        path::Path,
        sync::Arc,
    },
    tokio::{sync::Mutex, time::timeout},
    tracing::instrument,
};

impl Client {
    fn content_url<R: ContentRequest + Serialize>(&self, request: &R) -> Result<Url> {
        let path = format!("{}{}", R::CONTENT_PATH, to_url_token(request)?);
        Ok(self.server_url.join(&path)?)
    }

    /// Uploads `file` as the content of `request.path`. The file is sent as is.
    #[instrument(skip_all, fields(path = %request.path))]
    #[inline(never)]
    pub async fn upload(
        &self,
        request: &UploadFile,
        mut file: impl Read + Seek + Send + 'static,
    ) -> Result<()> {
        let size = file.seek(SeekFrom::End(0))?;
        let file = Arc::new(Mutex::new(file));
        let url = self.content_url(request)?;
        ok_or_retry(|| async {
            file.lock()
                .await
                .rewind()
                .map_err(RequestError::application)?;
            let response = self
                .reqwest
                .put(url.clone())
                .timeout(upload_timeout(size))
                .header(AUTHORIZATION, &self.authorization)
                .header(CONTENT_LENGTH, size)
                .body(Body::wrap_stream(stream_file(Arc::clone(&file))))
                .send()
                .await
                .map_err(RequestError::transport)?;
            let status = response.status();
            if !status.is_success() {
                let bytes = response.bytes().await.map_err(RequestError::transport)?;
                return Err(RequestError::Application(status_error::<()>(status, &bytes)));
            }
            Ok(())
        })
        .await
    }

    /// Encrypts the local file at `local_path` and uploads it.
    #[inline]
    pub async fn encrypt_and_upload(
        &self,
        request: &UploadFile,
        local_path: impl AsRef<Path> + Send,
        cipher: &Cipher,
    ) -> Result<()> {
        let encrypted = maybe_block_in_place(|| cipher.encrypt_file(local_path.as_ref()))?;
        self.upload(request, encrypted.file).await
    }

    /// Downloads the content of a remote file into `output`.
    /// Returns the number of bytes received.
    #[instrument(skip_all, fields(path = %request.path))]
    #[inline(never)]
    pub async fn download(&self, request: &DownloadFile, output: &mut (impl Write + Send)) -> Result<u64> {
        let mut response = self.content(request).await?;
        let declared_size = content_length(&response)?;
        let mut received = 0_u64;
        while let Some(chunk) = timeout(DEFAULT_TIMEOUT, response.chunk()).await?? {
            received = received.saturating_add(chunk.len() as u64);
            maybe_block_in_place(|| output.write_all(&chunk))?;
        }
        ensure!(
            received == declared_size,
            "content length mismatch; received {received}, declared {declared_size}",
        );
        output.flush()?;
        Ok(received)
    }

    /// Downloads a remote file, decrypts it and writes it to `local_path`.
    #[instrument(skip_all, fields(path = %request.path, ?local_path))]
    #[inline(never)]
    pub async fn download_and_decrypt(
        &self,
        request: &DownloadFile,
        local_path: impl AsRef<Path> + Debug,
        cipher: &Cipher,
    ) -> Result<u64> {
        let mut response = self.content(request).await?;
        let encrypted_size = content_length(&response)?;
        let expected_size = original_size(encrypted_size)
            .ok_or_else(|| format_err!("invalid encrypted size: {encrypted_size}"))?;
        let file = File::create(local_path.as_ref())?;
        let mut decryptor = DecryptingWriter::new(cipher, file);
        let mut received = 0_u64;
        while let Some(chunk) = timeout(DEFAULT_TIMEOUT, response.chunk()).await?? {
            received = received.saturating_add(chunk.len() as u64);
            maybe_block_in_place(|| decryptor.write_all(&chunk))?;
        }
        ensure!(
            received == encrypted_size,
            "encrypted size mismatch; received {received}, declared {encrypted_size}",
        );
        let (_, actual_size) = maybe_block_in_place(|| decryptor.finish())?;
        ensure!(
            actual_size == expected_size,
            "content size mismatch; actual {actual_size}, expected {expected_size}",
        );
        Ok(actual_size)
    }

    async fn content(&self, request: &DownloadFile) -> Result<Response> {
        let url = self.content_url(request)?;
        ok_or_retry(|| async {
            let response = timeout(
                DEFAULT_TIMEOUT,
                self.reqwest
                    .get(url.clone())
                    .header(AUTHORIZATION, &self.authorization)
                    .timeout(RESPONSE_TIMEOUT)
                    .send(),
            )
            .await
            .map_err(RequestError::transport)?
            .map_err(RequestError::transport)?;
            let status = response.status();
            if !status.is_success() {
                let bytes = response.bytes().await.map_err(RequestError::transport)?;
                return Err(RequestError::Application(status_error::<()>(status, &bytes)));
            }
            Ok(response)
        })
        .await
    }
}

fn content_length(response: &Response) -> Result<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .context("missing content length header")?
        .to_str()?
        .parse()
        .context("failed content length parsing")
}
