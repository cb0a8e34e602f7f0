//! The push connection engine and the types it exchanges with producers and consumers.

pub mod buffered_writer;
pub mod connection;
pub mod handle;
pub mod reader;
pub mod stats;
mod write_log;

use tokio::sync::{mpsc, oneshot};
use crate::model::{Device, Notification};
use crate::protocol::StatusCode;

pub use connection::PushConnection;
pub use handle::{PushHandle, SubmitError};
pub use reader::{ErrorSignal, ErrorStreamReader, ReadSummary};
pub use stats::PushStats;

/// An entry of the push connection's input queue
#[derive(Debug)]
pub enum QueueItem {
    Notification(Notification),
    /// Requests that buffered bytes are handed to the transport once all notifications
    ///  queued before it are written
    Flush(FlushRequest),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlushStatus {
    /// buffered bytes were handed to the transport - and for a blocking flush, the transport
    ///  was flushed
    Flushed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
pub struct FlushRequest {
    pub blocking: bool,
    done: oneshot::Sender<FlushStatus>,
}

impl FlushRequest {
    pub fn new(blocking: bool) -> (FlushRequest, oneshot::Receiver<FlushStatus>) {
        let (done, recv) = oneshot::channel();
        (FlushRequest { blocking, done }, recv)
    }

    pub(crate) fn resolve(self, status: FlushStatus) {
        let _ = self.done.send(status);
    }
}

/// The final word on a notification. Every notification that goes into a push connection
///  comes out as exactly one completion.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// All devices accepted (or presumed accepted)
    Delivered,
    /// APNs reported `status` for the device at the notification's `device_index`; devices
    ///  before it were accepted, devices after it were never looked at
    Partial { status: StatusCode },
    /// Not delivered to any device from `device_index` on
    Failed,
}

#[derive(Debug)]
pub struct Completion {
    pub notification: Notification,
    pub outcome: Outcome,
}

/// A device that APNs rejected explicitly, e.g. for deregistration
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RejectedDevice {
    pub device: Device,
    pub status: StatusCode,
}

/// Consumer side of a push connection. Both streams end once the connection is closed.
pub struct PushOutputs {
    pub completions: mpsc::UnboundedReceiver<Completion>,
    pub rejected_devices: mpsc::UnboundedReceiver<RejectedDevice>,
}
