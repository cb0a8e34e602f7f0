//! Utilities for testing code that pushes notifications: a scripted APNs peer, an in-memory
//!  connector and helpers for building and decoding test traffic. They are used by this
//!  crate's own tests, and they are exported for application testing.

pub mod connector;
pub mod peer;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use crate::error::ApnsError;
use crate::model::Device;
use crate::protocol::{DecodedFrame, FrameCodec};

pub use connector::DuplexConnector;
pub use peer::MockApnsPeer;

/// Builds a [Notification](crate::model::Notification) with a small payload for devices
///  created by [test_device]
#[macro_export]
macro_rules! notification {
    ([$($device:expr),*]) => {
        $crate::notification!("{}" => [$($device),*])
    };
    ($payload:literal => [$($device:expr),*]) => {
        $crate::model::Notification::new($payload, 0, 10, [$($crate::test_util::test_device($device)),*])
            .expect("test payload exceeds the size limit")
    };
}

/// convenience function for unit test code: the same number always gives the same device,
///  and different numbers give different devices
pub fn test_device(number: u8) -> Device {
    let mut token = [0u8; 32];
    token[0] = number;
    token[31] = number;
    Device::new(token)
}

/// Reads until exactly `count` frames were decoded
pub async fn read_frames<R: AsyncRead + Unpin>(transport: &mut R, count: usize) -> Result<Vec<DecodedFrame>, ApnsError> {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();

    loop {
        while frames.len() < count {
            match codec.decode(&mut buf)? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        if frames.len() == count {
            return Ok(frames);
        }
        if transport.read_buf(&mut buf).await? == 0 {
            return Err(ApnsError::ConnectionClosed);
        }
    }
}

/// Reads frames until the peer closes its write direction
pub async fn read_frames_to_end<R: AsyncRead + Unpin>(transport: &mut R) -> Result<Vec<DecodedFrame>, ApnsError> {
    let mut raw = Vec::new();
    transport.read_to_end(&mut raw).await?;
    let mut buf = BytesMut::from(raw.as_slice());

    let mut codec = FrameCodec::default();
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf)? {
        frames.push(frame);
    }
    if !buf.is_empty() {
        return Err(ApnsError::Truncated);
    }
    Ok(frames)
}
