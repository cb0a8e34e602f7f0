//! Wire format of the legacy binary APNs protocol.
//!
//! Notifications go out as frames, one frame per target device. The provider never gets
//!  a positive acknowledgement: the only thing APNs ever sends back is a single 6 byte
//!  error response, after which it drops the connection. That error response references a
//!  write by its [Identifier].

pub mod error_response;
pub mod frame;
pub mod identifier;

pub use error_response::{ErrorResponse, StatusCode};
pub use frame::{DecodedFrame, FrameCodec, FrameFormat, FrameRef};
pub use identifier::Identifier;

/// Length of a device token on the wire
pub const TOKEN_LEN: usize = 32;

/// Upper bound for a notification's payload
pub const MAX_PAYLOAD_LEN: usize = 2048;
