use std::fmt::Debug;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};
use crate::error::ApnsError;

/// The read direction of a connection, running in its own task
#[async_trait]
pub trait ReadHandler: Send + 'static {
    type Summary: Debug + Send + 'static;

    async fn read<R>(self, transport: R, cancel: CancellationToken) -> Result<Self::Summary, ApnsError>
    where
        R: AsyncRead + Send + Unpin + 'static;
}

/// One side of a connection that is driven by [drive]. The write direction runs on the
///  driving task, and the handler's state outlives individual connections.
///
/// Implementations shut down their write direction themselves when they are done writing.
#[async_trait]
pub trait ConnectionHandler: Send {
    type Reader: ReadHandler;

    /// Called once per connection, before writing starts
    fn reader(&mut self) -> Self::Reader;

    /// Returns the number of bytes written
    async fn write<W>(&mut self, transport: W, cancel: CancellationToken) -> Result<u64, ApnsError>
    where
        W: AsyncWrite + Send + Unpin + 'static;

    /// Called after both directions of a connection are done
    fn on_disconnect(&mut self);
}

/// Runs a single connection to completion: the read side in a spawned task, the write side
///  on the calling task. Once the write side is done, the read side gets `read_drain_timeout`
///  to see the peer's last words before it is cancelled.
///
/// The reader owns the read half and releases it when it returns. A half from
///  [tokio::io::split] can not shut down the read direction by itself, so the receive
///  direction closes together with the stream, which happens once both halves are gone
///  at the end of this function.
///
/// The result is the write side's.
pub async fn drive<H, S>(handler: &mut H, stream: S, cancel: &CancellationToken, read_drain_timeout: Duration) -> Result<u64, ApnsError>
where
    H: ConnectionHandler,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let read_cancel = cancel.child_token();
    let reader = handler.reader();
    let mut read_task = tokio::spawn(
        reader.read(read_half, read_cancel.clone())
            .in_current_span()
    );

    let write_result = handler.write(write_half, cancel.clone()).await;

    let read_result = match timeout(read_drain_timeout, &mut read_task).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!("read side still busy after {:?} - cancelling it", read_drain_timeout);
            read_cancel.cancel();
            read_task.await
        }
    };

    handler.on_disconnect();

    match read_result {
        Ok(Ok(summary)) => debug!("read side finished: {:?}", summary),
        Ok(Err(e)) => warn!("read side failed: {}", e),
        Err(e) => error!("read task terminated abnormally: {}", e),
    }
    write_result
}
