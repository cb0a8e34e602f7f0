use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use crate::error::ApnsError;
use crate::model::Notification;
use crate::push::{FlushRequest, FlushStatus, PushStats, QueueItem};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("input queue is full")]
    Full(Notification),
    #[error("push connection is closed")]
    Closed(Notification),
}

impl SubmitError {
    pub fn into_notification(self) -> Notification {
        match self {
            SubmitError::Full(n) | SubmitError::Closed(n) => n,
        }
    }
}

/// Producer side of a push connection's input queue. The queue is complete once all
///  handles are dropped (or [PushHandle::complete]d).
#[derive(Clone)]
pub struct PushHandle {
    sender: mpsc::Sender<QueueItem>,
    stats: Arc<PushStats>,
}

impl PushHandle {
    pub(crate) fn new(sender: mpsc::Sender<QueueItem>, stats: Arc<PushStats>) -> PushHandle {
        PushHandle { sender, stats }
    }

    /// Waits while the input queue is full
    pub async fn send(&self, notification: Notification) -> Result<(), SubmitError> {
        match self.sender.reserve().await {
            Ok(permit) => {
                permit.send(QueueItem::Notification(notification));
                Ok(())
            }
            Err(_) => Err(SubmitError::Closed(notification)),
        }
    }

    /// Fails instead of waiting if the input queue is full
    pub fn try_send(&self, notification: Notification) -> Result<(), SubmitError> {
        match self.sender.try_reserve() {
            Ok(permit) => {
                permit.send(QueueItem::Notification(notification));
                Ok(())
            }
            Err(TrySendError::Full(())) => Err(SubmitError::Full(notification)),
            Err(TrySendError::Closed(())) => Err(SubmitError::Closed(notification)),
        }
    }

    /// Returns once all notifications sent before were handed to the transport. A blocking
    ///  flush additionally waits for the transport to flush.
    pub async fn flush(&self, blocking: bool) -> Result<(), ApnsError> {
        let done = self.enqueue_flush(blocking).await?;

        match done.await {
            Ok(FlushStatus::Flushed) => Ok(()),
            Ok(FlushStatus::Cancelled) => Err(ApnsError::Cancelled),
            Ok(FlushStatus::Failed) | Err(_) => Err(ApnsError::ConnectionClosed),
        }
    }

    /// Queues a flush request without waiting for its resolution
    pub(crate) async fn enqueue_flush(&self, blocking: bool) -> Result<oneshot::Receiver<FlushStatus>, ApnsError> {
        let (request, done) = FlushRequest::new(blocking);
        self.sender.send(QueueItem::Flush(request)).await
            .map_err(|_| ApnsError::ConnectionClosed)?;
        Ok(done)
    }

    /// Consumes this handle. There is no separate completion message: the input queue is
    ///  complete once the last clone of the handle is dropped.
    pub fn complete(self) {
        drop(self);
    }

    pub fn stats(&self) -> &PushStats {
        &self.stats
    }
}
