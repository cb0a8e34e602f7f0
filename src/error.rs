use thiserror::Error;

/// Errors that callers of the push pipeline need to tell apart. Business level outcomes
///  (rejected notifications, partial delivery) are never reported through this type; they
///  arrive as a [crate::push::Completion] instead.
#[derive(Debug, Error)]
pub enum ApnsError {
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("device token must be {expected} bytes, got {actual}")]
    InvalidTokenLength { expected: usize, actual: usize },

    #[error("device token is not valid hex: {0:?}")]
    InvalidTokenHex(String),

    #[error("malformed error response: expected tag 8, got {tag}")]
    MalformedErrorResponse { tag: u8 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("buffer underflow")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("connection closed")]
    ConnectionClosed,
}

pub type ApnsResult<T> = Result<T, ApnsError>;
