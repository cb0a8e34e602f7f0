use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::error::ApnsError;
use crate::model::Device;
use crate::net::driver::{ConnectionHandler, ReadHandler};
use crate::protocol::{DecodedFrame, ErrorResponse, FrameCodec, Identifier, StatusCode};

/// The APNs side of a connection, for running with [drive](crate::net::driver::drive) on
///  the server end of a test transport.
///
/// It reports every frame it decodes, and it closes the connection once its client does.
///  If it is set up to reject a device, it answers the first frame for that device with an
///  error response naming the frame before it, and closes the connection right away
///  without looking at further frames - like APNs does.
pub struct MockApnsPeer {
    frames: mpsc::UnboundedSender<DecodedFrame>,
    reject: Option<(Device, StatusCode)>,
    response: Option<oneshot::Receiver<ErrorResponse>>,
}

impl MockApnsPeer {
    pub fn new() -> (MockApnsPeer, mpsc::UnboundedReceiver<DecodedFrame>) {
        let (frames_send, frames_recv) = mpsc::unbounded_channel();
        let peer = MockApnsPeer {
            frames: frames_send,
            reject: None,
            response: None,
        };
        (peer, frames_recv)
    }

    pub fn rejecting(device: Device, status: StatusCode) -> (MockApnsPeer, mpsc::UnboundedReceiver<DecodedFrame>) {
        let (mut peer, frames) = MockApnsPeer::new();
        peer.reject = Some((device, status));
        (peer, frames)
    }
}

pub struct MockPeerReader {
    frames: mpsc::UnboundedSender<DecodedFrame>,
    reject: Option<(Device, StatusCode)>,
    response: oneshot::Sender<ErrorResponse>,
}

#[async_trait]
impl ReadHandler for MockPeerReader {
    type Summary = u64;

    async fn read<R>(self, mut transport: R, cancel: CancellationToken) -> Result<u64, ApnsError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut bytes_read = 0;

        loop {
            while let Some(frame) = codec.decode(&mut buf)? {
                if let Some((device, status)) = self.reject {
                    if frame.token.as_ref() == device.token() {
                        let identifier = frame.identifier.unwrap_or(Identifier::ZERO);
                        let response = ErrorResponse {
                            status,
                            identifier: Identifier::from_raw(identifier.to_raw().wrapping_sub(1)),
                        };
                        debug!("rejecting frame {} with {:?}", identifier, status);
                        let _ = self.frames.send(frame);
                        let _ = self.response.send(response);
                        return Ok(bytes_read);
                    }
                }
                let _ = self.frames.send(frame);
            }

            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(bytes_read),
                n = transport.read_buf(&mut buf) => n?,
            };
            if n == 0 {
                return Ok(bytes_read);
            }
            bytes_read += n as u64;
        }
    }
}

#[async_trait]
impl ConnectionHandler for MockApnsPeer {
    type Reader = MockPeerReader;

    fn reader(&mut self) -> MockPeerReader {
        let (response_send, response_recv) = oneshot::channel();
        self.response = Some(response_recv);
        MockPeerReader {
            frames: self.frames.clone(),
            reject: self.reject,
            response: response_send,
        }
    }

    async fn write<W>(&mut self, mut transport: W, cancel: CancellationToken) -> Result<u64, ApnsError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let response = match self.response.take() {
            Some(response) => tokio::select! {
                _ = cancel.cancelled() => None,
                r = response => r.ok(),
            },
            None => None,
        };

        let mut written = 0;
        if let Some(response) = response {
            let mut buf = BytesMut::new();
            response.ser(&mut buf);
            transport.write_all(&buf).await?;
            written = buf.len() as u64;
        }
        transport.shutdown().await?;
        Ok(written)
    }

    fn on_disconnect(&mut self) {
    }
}
