use std::io::ErrorKind;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use crate::error::ApnsError;
use crate::net::driver::ReadHandler;
use crate::protocol::ErrorResponse;

/// What the read side of a connection reports to the write side
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorSignal {
    Response(ErrorResponse),
    /// The peer closed the connection without sending anything, so everything written so
    ///  far was accepted
    AcceptAll,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ReadSummary {
    pub bytes_read: u64,
    pub error_responses: usize,
    /// `true` if the peer closed the connection, as opposed to a transport error or
    ///  cancellation
    pub clean_eof: bool,
}

/// Read side of a push connection: parses the 6 byte error responses APNs may send and
///  forwards them to the write side.
pub struct ErrorStreamReader {
    signals: mpsc::UnboundedSender<ErrorSignal>,
    buffer_size: usize,
}

impl ErrorStreamReader {
    pub fn new(signals: mpsc::UnboundedSender<ErrorSignal>, buffer_size: usize) -> ErrorStreamReader {
        ErrorStreamReader {
            signals,
            buffer_size: buffer_size.max(ErrorResponse::SERIALIZED_LEN),
        }
    }

    /// Reads until EOF, a transport error or cancellation. A malformed error response is
    ///  a protocol violation and terminates reading with an error; so does any transport
    ///  error other than a connection reset.
    pub async fn run<R: AsyncRead + Unpin>(self, mut transport: R, cancel: CancellationToken) -> Result<ReadSummary, ApnsError> {
        let mut buf = vec![0u8; self.buffer_size];
        let mut filled = 0;
        let mut summary = ReadSummary::default();

        loop {
            let read_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("read side cancelled after {} bytes", summary.bytes_read);
                    return Ok(summary);
                }
                r = transport.read(&mut buf[filled..]) => r,
            };

            let n = match read_result {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!("connection reset by peer");
                    return Ok(summary);
                }
                Err(e) => {
                    warn!("error reading from the transport: {}", e);
                    return Err(e.into());
                }
            };

            if n == 0 {
                if filled > 0 {
                    warn!("connection closed with {} bytes of an incomplete error response", filled);
                }
                if summary.bytes_read == 0 {
                    debug!("peer closed the connection without an error response");
                    let _ = self.signals.send(ErrorSignal::AcceptAll);
                }
                summary.clean_eof = true;
                return Ok(summary);
            }

            summary.bytes_read += n as u64;
            filled += n;

            let mut offset = 0;
            while filled - offset >= ErrorResponse::SERIALIZED_LEN {
                let response = match ErrorResponse::deser(&mut &buf[offset..filled]) {
                    Ok(response) => response,
                    Err(e) => {
                        error!("received invalid error response: {}", e);
                        return Err(e);
                    }
                };
                debug!("received error response {:?}", response);
                summary.error_responses += 1;

                if self.signals.send(ErrorSignal::Response(response)).is_err() {
                    trace!("write side is gone - discarding error response");
                }
                offset += ErrorResponse::SERIALIZED_LEN;
            }

            // keep the start of an incomplete response for the next read
            buf.copy_within(offset..filled, 0);
            filled -= offset;
        }
    }
}

#[async_trait]
impl ReadHandler for ErrorStreamReader {
    type Summary = ReadSummary;

    async fn read<R>(self, transport: R, cancel: CancellationToken) -> Result<ReadSummary, ApnsError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.run(transport, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Identifier, StatusCode};
    use tokio::io::AsyncWriteExt;

    fn reader() -> (ErrorStreamReader, mpsc::UnboundedReceiver<ErrorSignal>) {
        let (send, recv) = mpsc::unbounded_channel();
        (ErrorStreamReader::new(send, 256), recv)
    }

    fn response(status: StatusCode, identifier: u32) -> ErrorResponse {
        ErrorResponse { status, identifier: Identifier::from_raw(identifier) }
    }

    #[tokio::test]
    async fn test_clean_eof_without_data_accepts_all() {
        let (reader, mut signals) = reader();
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let summary = reader.run(client, CancellationToken::new()).await.unwrap();
        assert!(summary.clean_eof);
        assert_eq!(summary.bytes_read, 0);
        assert_eq!(signals.recv().await, Some(ErrorSignal::AcceptAll));
        assert_eq!(signals.recv().await, None);
    }

    #[tokio::test]
    async fn test_responses_split_across_reads() {
        let (reader, mut signals) = reader();
        let (client, mut server) = tokio::io::duplex(64);

        let handle = tokio::spawn(reader.run(client, CancellationToken::new()));

        let mut wire = Vec::new();
        response(StatusCode::ProcessingError, 3).ser(&mut wire);
        response(StatusCode::Shutdown, 9).ser(&mut wire);

        server.write_all(&wire[..4]).await.unwrap();
        server.flush().await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(&wire[4..9]).await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(&wire[9..]).await.unwrap();
        drop(server);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.bytes_read, 12);
        assert_eq!(summary.error_responses, 2);
        assert!(summary.clean_eof);

        assert_eq!(signals.recv().await, Some(ErrorSignal::Response(response(StatusCode::ProcessingError, 3))));
        assert_eq!(signals.recv().await, Some(ErrorSignal::Response(response(StatusCode::Shutdown, 9))));
        assert_eq!(signals.recv().await, None);
    }

    #[tokio::test]
    async fn test_malformed_response_is_fatal() {
        let (reader, mut signals) = reader();
        let (client, mut server) = tokio::io::duplex(64);

        server.write_all(&[9, 1, 0, 0, 0, 1]).await.unwrap();
        drop(server);

        match reader.run(client, CancellationToken::new()).await {
            Err(ApnsError::MalformedErrorResponse { tag }) => assert_eq!(tag, 9),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(signals.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_read_is_not_clean() {
        let (reader, mut signals) = reader();
        let (client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = reader.run(client, cancel).await.unwrap();
        assert!(!summary.clean_eof);
        assert_eq!(signals.recv().await, None);
    }

    #[tokio::test]
    async fn test_trailing_partial_response_is_dropped() {
        let (reader, mut signals) = reader();
        let (client, mut server) = tokio::io::duplex(64);

        server.write_all(&[8, 8, 0]).await.unwrap();
        drop(server);

        let summary = reader.run(client, CancellationToken::new()).await.unwrap();
        assert!(summary.clean_eof);
        assert_eq!(summary.bytes_read, 3);
        assert_eq!(signals.recv().await, None);
    }
}
