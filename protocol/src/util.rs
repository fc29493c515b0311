use {
    bytes::Bytes,
    std::{io::Read, sync::Arc},
    tokio::{
        runtime::{Handle, RuntimeFlavor},
        sync::{Mutex, mpsc},
        task::block_in_place,
    },
    tokio_stream::{Stream, wrappers::ReceiverStream},
    tracing::warn,
};

const CONTENT_CHUNK_LEN: usize = 64 * 1024;

/// Reads `file` on a blocking-friendly task and yields its content in chunks.
///
/// The reader is shared so that the caller can rewind it and stream it again on retry.
pub fn stream_file(
    file: Arc<Mutex<impl Read + Send + 'static>>,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(5);
    tokio::spawn(async move {
        let mut file = file.lock().await;
        let mut buf = vec![0u8; CONTENT_CHUNK_LEN];
        loop {
            match maybe_block_in_place(|| file.read(&mut buf)) {
                Ok(0) => break,
                Ok(len) => {
                    let chunk = Bytes::copy_from_slice(buf.get(..len).unwrap_or_default());
                    if tx.send(Ok(chunk)).await.is_err() {
                        break; // receiver closed
                    }
                }
                Err(err) => {
                    warn!(?err, "failed to read content file");
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Runs blocking `f` without stalling other tasks when the runtime allows it.
#[inline]
pub fn maybe_block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}
