use tokio::time::Instant;
use crate::config::PresumptionConfig;
use crate::model::Notification;

/// Notifications whose frames went to the transport in the same buffer.
#[derive(Debug)]
pub(crate) struct WriteLog {
    pub notifications: Vec<Notification>,
    /// stream offset where the buffer's bytes end
    pub position: u64,
    pub queued_at: Instant,
    /// device writes on this connection engine at the time of queueing
    pub notification_count: u64,
}

impl WriteLog {
    pub fn new(notifications: Vec<Notification>, position: u64, notification_count: u64) -> WriteLog {
        WriteLog {
            notifications,
            position,
            queued_at: Instant::now(),
            notification_count,
        }
    }

    /// APNs does not acknowledge successful writes, so a write counts as delivered once it
    ///  is far enough behind in bytes, time or number of writes without an error response
    ///  referring to it
    pub fn is_presumed_delivered(&self, presumption: &PresumptionConfig, bytes_written: u64, notification_count: u64) -> bool {
        self.position + presumption.after_bytes < bytes_written
            || self.queued_at.elapsed() > presumption.after
            || self.notification_count + presumption.after_notifications < notification_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;

    fn presumption() -> PresumptionConfig {
        PresumptionConfig {
            after_bytes: 300,
            after: Duration::from_secs(30),
            after_notifications: 20,
        }
    }

    #[rstest]
    #[case::fresh(1000, 50, false)]
    #[case::bytes_at_threshold(1200, 50, false)]
    #[case::bytes_beyond_threshold(1201, 50, true)]
    #[case::count_at_threshold(1000, 60, false)]
    #[case::count_beyond_threshold(1000, 61, true)]
    #[tokio::test(start_paused = true)]
    async fn test_presumed_by_volume(#[case] bytes_written: u64, #[case] notification_count: u64, #[case] expected: bool) {
        let log = WriteLog::new(vec![], 900, 40);
        assert_eq!(log.is_presumed_delivered(&presumption(), bytes_written, notification_count), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presumed_by_age() {
        let log = WriteLog::new(vec![], 900, 40);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!log.is_presumed_delivered(&presumption(), 900, 40));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(log.is_presumed_delivered(&presumption(), 900, 40));
    }
}
