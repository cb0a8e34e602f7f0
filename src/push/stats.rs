use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Throughput counters of a push connection, shared with its handles
#[derive(Debug)]
pub struct PushStats {
    started: Instant,
    notifications_written: AtomicU64,
    bytes_written: Arc<AtomicU64>,
}

impl PushStats {
    pub fn new() -> PushStats {
        PushStats {
            started: Instant::now(),
            notifications_written: AtomicU64::new(0),
            bytes_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// number of frames written, including rewrites after reconnecting
    pub fn notifications_written(&self) -> u64 {
        self.notifications_written.load(Ordering::Acquire)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn on_notification_written(&self) -> u64 {
        self.notifications_written.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn bytes_written_counter(&self) -> Arc<AtomicU64> {
        self.bytes_written.clone()
    }
}

impl Default for PushStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PushStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let messages = self.notifications_written();
        let megabytes = self.bytes_written() as f64 / (1024.0 * 1024.0);
        let elapsed = self.elapsed();
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);

        write!(f, "Wrote {} Msg totaling {:.2}MB in {:.1?} at {:.2}MB/s {:.2}kMsg/s",
               messages, megabytes, elapsed, megabytes / seconds, messages as f64 / seconds / 1000.0)
    }
}
