use std::io;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use crate::error::ApnsError;

enum WriteCommand {
    Write(BytesMut),
    Flush(oneshot::Sender<io::Result<()>>),
    Shutdown(oneshot::Sender<io::Result<()>>),
}

/// Double buffer in front of a transport's write half.
///
/// Frames are serialized into the active buffer while the other buffer is being written by
///  a separate task that owns the transport. There is at most one physical write in flight:
///  the active buffer can only be handed off once the previous one came back.
///
/// All waiting is cancellation aware. After cancellation the writer must not be used any
///  more since a buffer's bytes may have been dropped.
pub struct BufferedWriter {
    capacity: usize,
    active: BytesMut,
    /// `None` while the other buffer is with the transport task
    spare: Option<BytesMut>,
    commands: mpsc::Sender<WriteCommand>,
    returned: mpsc::Receiver<io::Result<BytesMut>>,
    bytes_written: Arc<AtomicU64>,
    cancel: CancellationToken,
    transport_task: JoinHandle<()>,
}

impl BufferedWriter {
    /// `bytes_written` is shared with whoever reports on throughput, and it is never reset:
    ///  one counter can outlive many connections
    pub fn new<W>(transport: W, capacity: usize, bytes_written: Arc<AtomicU64>, cancel: CancellationToken) -> BufferedWriter
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (commands_send, commands_recv) = mpsc::channel(1);
        let (returned_send, returned_recv) = mpsc::channel(2);

        let transport_task = tokio::spawn(transport_loop(transport, commands_recv, returned_send));

        BufferedWriter {
            capacity,
            active: BytesMut::with_capacity(capacity),
            spare: Some(BytesMut::with_capacity(capacity)),
            commands: commands_send,
            returned: returned_recv,
            bytes_written,
            cancel,
            transport_task,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.active
    }

    pub fn buffered_len(&self) -> usize {
        self.active.len()
    }

    /// space left in the active buffer
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.active.len())
    }

    /// Number of bytes handed to the transport so far. This does not mean they reached the
    ///  network, let alone the peer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    /// Hands the active buffer to the transport, waiting for a previous write to finish first
    pub async fn flush(&mut self) -> Result<(), ApnsError> {
        if self.active.is_empty() {
            return Ok(());
        }

        let spare = match self.spare.take() {
            Some(spare) => spare,
            None => self.await_returned().await?,
        };
        let full = mem::replace(&mut self.active, spare);
        let len = full.len() as u64;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ApnsError::Cancelled),
            sent = self.commands.send(WriteCommand::Write(full)) => sent.map_err(|_| ApnsError::ConnectionClosed)?,
        }

        self.bytes_written.fetch_add(len, Ordering::AcqRel);
        trace!("handed {} bytes to the transport", len);
        Ok(())
    }

    /// Like [BufferedWriter::flush], but returns `false` instead of waiting if the previous
    ///  write is still in progress. An empty buffer counts as flushed.
    pub fn try_flush(&mut self) -> Result<bool, ApnsError> {
        if self.active.is_empty() {
            return Ok(true);
        }

        let spare = match self.spare.take() {
            Some(spare) => spare,
            None => match self.returned.try_recv() {
                Ok(Ok(buf)) => buf,
                Ok(Err(e)) => return Err(ApnsError::Io(e)),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(false),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(ApnsError::ConnectionClosed),
            },
        };

        let full = mem::replace(&mut self.active, spare);
        let len = full.len() as u64;
        match self.commands.try_send(WriteCommand::Write(full)) {
            Ok(()) => {
                self.bytes_written.fetch_add(len, Ordering::AcqRel);
                trace!("handed {} bytes to the transport", len);
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(WriteCommand::Write(full))) => {
                self.spare = Some(mem::replace(&mut self.active, full));
                Ok(false)
            }
            Err(_) => Err(ApnsError::ConnectionClosed),
        }
    }

    /// Waits for an outstanding write to complete and flushes the transport itself. Bytes in
    ///  the active buffer are not affected.
    pub async fn wait(&mut self) -> Result<(), ApnsError> {
        if self.spare.is_none() {
            let spare = self.await_returned().await?;
            self.spare = Some(spare);
        }

        let (ack_send, ack_recv) = oneshot::channel();
        self.send_command(WriteCommand::Flush(ack_send)).await?;
        self.await_ack(ack_recv).await
    }

    /// Shuts down the transport's write direction after any outstanding write completed
    pub async fn shutdown(&mut self) -> Result<(), ApnsError> {
        if self.spare.is_none() {
            let spare = self.await_returned().await?;
            self.spare = Some(spare);
        }

        let (ack_send, ack_recv) = oneshot::channel();
        self.send_command(WriteCommand::Shutdown(ack_send)).await?;
        self.await_ack(ack_recv).await
    }

    async fn await_returned(&mut self) -> Result<BytesMut, ApnsError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApnsError::Cancelled),
            returned = self.returned.recv() => match returned {
                Some(Ok(buf)) => Ok(buf),
                Some(Err(e)) => Err(ApnsError::Io(e)),
                None => Err(ApnsError::ConnectionClosed),
            },
        }
    }

    async fn send_command(&mut self, command: WriteCommand) -> Result<(), ApnsError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApnsError::Cancelled),
            sent = self.commands.send(command) => sent.map_err(|_| ApnsError::ConnectionClosed),
        }
    }

    async fn await_ack(&mut self, ack: oneshot::Receiver<io::Result<()>>) -> Result<(), ApnsError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApnsError::Cancelled),
            result = ack => match result {
                Ok(result) => result.map_err(ApnsError::Io),
                Err(_) => Err(ApnsError::ConnectionClosed),
            },
        }
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        self.transport_task.abort();
    }
}

async fn transport_loop<W: AsyncWrite + Unpin>(
    mut transport: W,
    mut commands: mpsc::Receiver<WriteCommand>,
    returned: mpsc::Sender<io::Result<BytesMut>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Write(mut buf) => {
                match transport.write_all(&buf).await {
                    Ok(()) => {
                        buf.clear();
                        if returned.send(Ok(buf)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("error writing to the transport: {}", e);
                        let _ = returned.send(Err(e)).await;
                        break;
                    }
                }
            }
            WriteCommand::Flush(ack) => {
                let _ = ack.send(transport.flush().await);
            }
            WriteCommand::Shutdown(ack) => {
                let _ = ack.send(transport.shutdown().await);
            }
        }
    }
    trace!("transport task terminating");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tokio::io::AsyncReadExt;

    fn writer_on_duplex(capacity: usize, duplex_size: usize) -> (BufferedWriter, tokio::io::DuplexStream, Arc<AtomicU64>) {
        let (client, server) = tokio::io::duplex(duplex_size);
        let counter = Arc::new(AtomicU64::new(0));
        let writer = BufferedWriter::new(client, capacity, counter.clone(), CancellationToken::new());
        (writer, server, counter)
    }

    #[tokio::test]
    async fn test_flush_hands_bytes_to_transport() {
        let (mut writer, mut server, counter) = writer_on_duplex(64, 1024);

        writer.buffer_mut().put_slice(b"hello");
        assert_eq!(writer.remaining(), 59);
        writer.flush().await.unwrap();
        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(counter.load(Ordering::Acquire), 5);

        writer.buffer_mut().put_slice(b" world");
        writer.flush().await.unwrap();
        writer.wait().await.unwrap();
        assert_eq!(writer.bytes_written(), 11);

        let mut received = [0u8; 11];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello world");
    }

    #[tokio::test]
    async fn test_empty_flush_is_a_no_op() {
        let (mut writer, _server, counter) = writer_on_duplex(64, 1024);
        writer.flush().await.unwrap();
        assert!(writer.try_flush().unwrap());
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_try_flush_with_write_outstanding() {
        // the duplex only takes 4 bytes until the peer reads, so the first write stays outstanding
        let (mut writer, mut server, _) = writer_on_duplex(64, 4);

        writer.buffer_mut().put_slice(b"12345678");
        assert!(writer.try_flush().unwrap());

        writer.buffer_mut().put_slice(b"abcd");
        tokio::task::yield_now().await;
        assert!(!writer.try_flush().unwrap());
        assert_eq!(writer.buffered_len(), 4);

        let mut received = vec![0u8; 8];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"12345678");

        // the blocking variant waits for the returned buffer
        writer.flush().await.unwrap();
        writer.shutdown().await.unwrap();

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"abcd");
        assert_eq!(writer.bytes_written(), 12);
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let (mut writer, server, _) = writer_on_duplex(64, 1024);
        drop(server);

        writer.buffer_mut().put_slice(b"lost");
        writer.flush().await.unwrap();
        writer.buffer_mut().put_slice(b"also lost");
        assert!(matches!(writer.flush().await, Err(ApnsError::Io(_))));
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let (client, _server) = tokio::io::duplex(4);
        let cancel = CancellationToken::new();
        let mut writer = BufferedWriter::new(client, 64, Arc::new(AtomicU64::new(0)), cancel.clone());

        writer.buffer_mut().put_slice(b"more than four bytes");
        writer.flush().await.unwrap();

        cancel.cancel();
        assert!(matches!(writer.wait().await, Err(ApnsError::Cancelled)));
    }
}
