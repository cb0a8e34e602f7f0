use std::time::Duration;
use anyhow::bail;
use crate::protocol::FrameFormat;

pub const PRODUCTION_HOST: &str = "gateway.push.apple.com";
pub const SANDBOX_HOST: &str = "gateway.sandbox.push.apple.com";
pub const GATEWAY_PORT: u16 = 2195;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub host: String,
    pub port: u16,

    /// Capacity of each of the writer's two buffers. A buffer is handed to the transport when
    ///  it can no longer hold a maximum size frame, so this bounds the number of bytes in
    ///  flight on the provider side to twice this value.
    pub buffer_size: usize,

    /// Bound of the input queue. Producers wait (or fail fast with `try_send`) while it is
    ///  full.
    pub input_capacity: usize,

    /// Size of the read buffer for error responses. These are 6 bytes each and APNs sends
    ///  at most one per connection, so this need not be big.
    pub read_buffer_size: usize,

    pub frame_format: FrameFormat,

    /// APNs never acknowledges successful writes. These thresholds decide when a write is old
    ///  enough that the absence of an error response counts as success.
    pub presumption: PresumptionConfig,

    /// If set, bytes that could not be handed to the transport opportunistically are flushed
    ///  at the latest after this delay
    pub late_flush_delay: Option<Duration>,

    /// Time the read side gets to drain straggling error responses once the write side of a
    ///  connection is done
    pub read_drain_timeout: Duration,

    pub reconnect: ReconnectConfig,
}

impl PushConfig {
    pub fn new(host: impl Into<String>, port: u16) -> PushConfig {
        let buffer_size = 1024 * 1024;
        PushConfig {
            host: host.into(),
            port,
            buffer_size,
            input_capacity: 1024,
            read_buffer_size: 256,
            frame_format: FrameFormat::ItemBased,
            presumption: PresumptionConfig::for_buffer_size(buffer_size),
            late_flush_delay: Some(Duration::from_millis(1)),
            read_drain_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn production() -> PushConfig {
        Self::new(PRODUCTION_HOST, GATEWAY_PORT)
    }

    pub fn sandbox() -> PushConfig {
        Self::new(SANDBOX_HOST, GATEWAY_PORT)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            bail!("host must not be empty");
        }
        if self.buffer_size < 4096 {
            bail!("buffer size must be at least 4096 bytes to hold a maximum size frame");
        }
        if self.input_capacity == 0 {
            bail!("input capacity must be positive");
        }
        if self.read_buffer_size < crate::protocol::ErrorResponse::SERIALIZED_LEN {
            bail!("read buffer must hold at least one error response");
        }
        self.reconnect.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PresumptionConfig {
    /// a write is presumed delivered once this many bytes were written after it
    pub after_bytes: u64,
    /// ... or once it is this old
    pub after: Duration,
    /// ... or once this many device writes happened after it
    pub after_notifications: u64,
}

impl PresumptionConfig {
    pub fn for_buffer_size(buffer_size: usize) -> PresumptionConfig {
        PresumptionConfig {
            after_bytes: 3 * buffer_size as u64,
            after: Duration::from_secs(30),
            after_notifications: buffer_size as u64 / 100 + 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// growth of the delay per failed attempt, in eighths (16 doubles the delay)
    pub factor_eighths: u32,
    /// fraction of each delay that is randomized, in `[0, 1)`
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            factor_eighths: 16,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.factor_eighths < 8 {
            bail!("reconnect delay must not shrink: factor_eighths is {}", self.factor_eighths);
        }
        if !(0.0..1.0).contains(&self.jitter) {
            bail!("jitter must be in [0, 1), was {}", self.jitter);
        }
        if self.initial_delay > self.max_delay {
            bail!("initial reconnect delay exceeds the maximum");
        }
        Ok(())
    }
}
