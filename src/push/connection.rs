use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use crate::config::PushConfig;
use crate::error::ApnsError;
use crate::model::Notification;
use crate::net::driver::ConnectionHandler;
use crate::protocol::{ErrorResponse, Identifier};
use crate::push::buffered_writer::BufferedWriter;
use crate::push::reader::{ErrorSignal, ErrorStreamReader};
use crate::push::stats::PushStats;
use crate::push::write_log::WriteLog;
use crate::push::{Completion, FlushStatus, Outcome, PushHandle, PushOutputs, QueueItem, RejectedDevice};

/// Room a buffer must have beyond a notification's payload to take another of its frames
const FRAME_OVERHEAD_RESERVE: usize = 128;

/// The write side state machine of a (re)connecting APNs push connection.
///
/// Notifications are pulled from the input queue and written frame by frame, each device
///  write getting the next [Identifier] of the current connection. Notifications are
///  tracked until their fate is known:
///
/// * `in_progress` while their frames are being written
/// * in the pending write while their bytes are buffered
/// * in an active write log once the buffer went to the transport
///
/// From there, an error response (or a clean close by the peer) resolves them, or they are
///  presumed delivered based on age. What is unresolved when a connection ends is written
///  again on the next connection, in its original order and with fresh identifiers. Only
///  [PushConnection::close] gives up on notifications.
///
/// All of this happens in a single write loop, so the bookkeeping needs no synchronization.
///  The read side only talks to it through the error signal channel.
pub struct PushConnection {
    config: Arc<PushConfig>,
    input: mpsc::Receiver<QueueItem>,
    /// an item that was pulled from the input while waiting for work between connections
    lookahead: Option<QueueItem>,
    completions: mpsc::UnboundedSender<Completion>,
    rejected_devices: mpsc::UnboundedSender<RejectedDevice>,
    error_signals: Option<mpsc::UnboundedReceiver<ErrorSignal>>,
    stats: Arc<PushStats>,

    identifier: Identifier,
    /// the read side of the last connection saw a clean close without any error response,
    ///  and nothing went to the transport since
    read_ok: bool,

    active_writes: VecDeque<WriteLog>,
    pending_write: Vec<Notification>,
    in_progress: Option<Notification>,
    retry: VecDeque<Notification>,
}

impl PushConnection {
    pub fn new(config: Arc<PushConfig>) -> (PushConnection, PushHandle, PushOutputs) {
        let (input_send, input_recv) = mpsc::channel(config.input_capacity);
        let (completions_send, completions_recv) = mpsc::unbounded_channel();
        let (rejected_send, rejected_recv) = mpsc::unbounded_channel();
        let stats = Arc::new(PushStats::new());

        let connection = PushConnection {
            config,
            input: input_recv,
            lookahead: None,
            completions: completions_send,
            rejected_devices: rejected_send,
            error_signals: None,
            stats: stats.clone(),
            identifier: Identifier::ZERO,
            read_ok: false,
            active_writes: VecDeque::new(),
            pending_write: Vec::new(),
            in_progress: None,
            retry: VecDeque::new(),
        };
        let outputs = PushOutputs {
            completions: completions_recv,
            rejected_devices: rejected_recv,
        };

        (connection, PushHandle::new(input_send, stats), outputs)
    }

    pub fn stats(&self) -> &Arc<PushStats> {
        &self.stats
    }

    /// Notifications from an earlier connection that still need writing
    fn has_leftovers(&self) -> bool {
        !self.active_writes.is_empty()
            || !self.pending_write.is_empty()
            || self.in_progress.is_some()
            || !self.retry.is_empty()
    }

    /// Waits until there is something to write, returning `false` if there never will be
    ///  (input queue completed and nothing left to retry) or on cancellation.
    ///
    /// Notifications that only wait for acknowledgement do not count as work: they are
    ///  resolved by [PushConnection::close], or rewritten if a connection is made anyway.
    pub async fn await_work(&mut self, cancel: &CancellationToken) -> bool {
        if self.lookahead.is_some()
            || !self.pending_write.is_empty()
            || self.in_progress.is_some()
            || !self.retry.is_empty()
        {
            return true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            item = self.input.recv() => match item {
                Some(item) => {
                    self.lookahead = Some(item);
                    true
                }
                None => false,
            },
        }
    }

    /// Creates the read side for a new connection, replacing the previous connection's
    ///  error signal channel
    pub fn reader(&mut self) -> ErrorStreamReader {
        self.handle_error_signals();

        let (signals_send, signals_recv) = mpsc::unbounded_channel();
        self.error_signals = Some(signals_recv);
        self.read_ok = false;
        ErrorStreamReader::new(signals_send, self.config.read_buffer_size)
    }

    /// Runs the write side of one connection: first anything left over from the previous
    ///  connection, then the input queue until it completes. Returns the total number of
    ///  bytes handed to the transport over the engine's lifetime.
    pub async fn write<W>(&mut self, transport: W, cancel: CancellationToken) -> Result<u64, ApnsError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.identifier = Identifier::ZERO;

        let mut writer = BufferedWriter::new(transport, self.config.buffer_size, self.stats.bytes_written_counter(), cancel.clone());
        let result = self.write_loop(&mut writer, &cancel).await;

        self.retire_completed_writes();

        match &result {
            Ok(()) => debug!("write side done after {} bytes", self.stats.bytes_written()),
            Err(ApnsError::Cancelled) => debug!("write side cancelled"),
            Err(e) => warn!("write side terminated: {}", e),
        }
        result.map(|_| self.stats.bytes_written())
    }

    /// Bookkeeping after a connection is gone: apply straggling error responses and retire
    ///  writes old enough to be presumed delivered. Everything else stays for the next
    ///  connection.
    pub fn on_disconnect(&mut self) {
        self.retire_completed_writes();

        debug!("connection ended - {} active writes, {} pending, {} to retry",
            self.active_writes.len(), self.pending_write.len(), self.retry.len() + self.in_progress.iter().count());
    }

    /// Resolves everything that is still outstanding and ends both output streams. Writes
    ///  that went to the transport count as delivered if the last connection was closed
    ///  cleanly by the peer or if they are old enough; everything else fails.
    pub fn close(mut self) {
        self.handle_error_signals();

        let bytes_written = self.stats.bytes_written();
        let notification_count = self.stats.notifications_written();
        while let Some(write) = self.active_writes.pop_front() {
            if self.read_ok || write.is_presumed_delivered(&self.config.presumption, bytes_written, notification_count) {
                self.complete_write(write);
            }
            else {
                self.fail_write(write);
            }
        }

        for notification in mem::take(&mut self.pending_write) {
            self.fail(notification);
        }
        if let Some(notification) = self.in_progress.take() {
            self.fail(notification);
        }
        while let Some(notification) = self.retry.pop_front() {
            self.fail(notification);
        }
        if let Some(item) = self.lookahead.take() {
            self.abandon(item);
        }

        self.input.close();
        while let Ok(item) = self.input.try_recv() {
            self.abandon(item);
        }

        info!("push connection closed: {}", self.stats);
    }

    async fn write_loop(&mut self, writer: &mut BufferedWriter, cancel: &CancellationToken) -> Result<(), ApnsError> {
        if self.has_leftovers() {
            self.rebuild_retry_queue();
        }
        while let Some(notification) = self.retry.pop_front() {
            if cancel.is_cancelled() {
                self.retry.push_front(notification);
                return Err(ApnsError::Cancelled);
            }
            self.write_notification(writer, notification).await?;
        }

        if let Some(item) = self.lookahead.take() {
            self.handle_queue_item(writer, item).await?;
        }

        let mut flush_deadline: Option<Instant> = None;
        let mut read_side_open = self.error_signals.is_some();

        loop {
            let idle = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ApnsError::Cancelled);
                }
                signal = next_signal(&mut self.error_signals), if read_side_open => {
                    match signal {
                        Some(signal) => {
                            self.apply_error_signal(signal);
                            self.handle_error_signals();
                        }
                        None => {
                            debug!("read side is done");
                            read_side_open = false;
                        }
                    }
                    true
                }
                item = self.input.recv() => {
                    match item {
                        Some(item) => self.handle_queue_item(writer, item).await?,
                        None => break,
                    }
                    self.input.is_empty()
                }
                _ = sleep_until(flush_deadline.unwrap_or_else(Instant::now)), if flush_deadline.is_some() => {
                    trace!("late flush");
                    flush_deadline = None;
                    self.flush_buffer(writer).await?;
                    false
                }
            };

            if idle {
                if self.try_flush(writer)? {
                    flush_deadline = None;
                }
                else if flush_deadline.is_none() && writer.buffered_len() > 0 {
                    flush_deadline = self.config.late_flush_delay.map(|delay| Instant::now() + delay);
                }
            }
        }

        debug!("input queue completed - draining");
        self.flush_buffer(writer).await?;
        writer.wait().await?;
        writer.shutdown().await?;
        Ok(())
    }

    async fn handle_queue_item(&mut self, writer: &mut BufferedWriter, item: QueueItem) -> Result<(), ApnsError> {
        match item {
            QueueItem::Notification(notification) => self.write_notification(writer, notification).await,
            QueueItem::Flush(request) => {
                self.handle_error_signals();

                let mut result = self.flush_buffer(writer).await;
                if result.is_ok() && request.blocking {
                    result = writer.wait().await;
                }

                request.resolve(match &result {
                    Ok(()) => FlushStatus::Flushed,
                    Err(ApnsError::Cancelled) => FlushStatus::Cancelled,
                    Err(_) => FlushStatus::Failed,
                });
                result
            }
        }
    }

    async fn write_notification(&mut self, writer: &mut BufferedWriter, mut notification: Notification) -> Result<(), ApnsError> {
        // error responses decide about notifications that were written already, so they
        //  must be applied before more identifiers are handed out
        self.handle_error_signals();

        if notification.device_count() == 0 {
            self.complete(notification);
            return Ok(());
        }

        let flush_threshold = FRAME_OVERHEAD_RESERVE + notification.payload().len();

        for index in notification.device_index()..notification.device_count() {
            self.identifier = self.identifier.next();
            notification.assign_identifier(index, self.identifier);
            self.stats.on_notification_written();

            if let Err(e) = notification.frame(index).ser(self.config.frame_format, writer.buffer_mut()) {
                self.fail(notification);
                return Err(e);
            }

            if writer.remaining() < flush_threshold {
                if let Err(e) = self.flush_buffer(writer).await {
                    self.in_progress = Some(notification);
                    return Err(e);
                }
            }
        }

        self.pending_write.push(notification);
        self.handle_error_signals();
        Ok(())
    }

    async fn flush_buffer(&mut self, writer: &mut BufferedWriter) -> Result<(), ApnsError> {
        writer.flush().await?;
        self.activate_pending_write();
        Ok(())
    }

    fn try_flush(&mut self, writer: &mut BufferedWriter) -> Result<bool, ApnsError> {
        if writer.try_flush()? {
            self.activate_pending_write();
            Ok(true)
        }
        else {
            self.retire_completed_writes();
            Ok(false)
        }
    }

    /// The pending write's bytes were just handed to the transport. Error signals are left
    ///  alone here: this runs between the frames of a notification, and a response may refer
    ///  to frames of that notification which is in no write log yet.
    fn activate_pending_write(&mut self) {
        self.retire_presumed_writes();

        if self.pending_write.is_empty() {
            return;
        }

        let write = WriteLog::new(
            mem::take(&mut self.pending_write),
            self.stats.bytes_written(),
            self.stats.notifications_written(),
        );
        trace!("activating write of {} notifications ending at {}", write.notifications.len(), write.position);
        self.active_writes.push_back(write);
        // a clean close by the peer only vouches for what was written before it
        self.read_ok = false;
    }

    fn retire_completed_writes(&mut self) {
        self.handle_error_signals();
        self.retire_presumed_writes();
    }

    fn retire_presumed_writes(&mut self) {
        let bytes_written = self.stats.bytes_written();
        let notification_count = self.stats.notifications_written();

        while let Some(oldest) = self.active_writes.front() {
            if !oldest.is_presumed_delivered(&self.config.presumption, bytes_written, notification_count) {
                break;
            }
            if let Some(write) = self.active_writes.pop_front() {
                trace!("presuming write ending at {} delivered", write.position);
                self.complete_write(write);
            }
        }
    }

    fn rebuild_retry_queue(&mut self) {
        let mut retry = VecDeque::new();

        for write in self.active_writes.drain(..) {
            retry.extend(write.notifications);
        }
        retry.extend(self.pending_write.drain(..));
        retry.extend(self.in_progress.take());
        retry.append(&mut self.retry);

        debug!("rewriting {} notifications left over from the previous connection", retry.len());
        self.retry = retry;
    }

    /// Applies all error signals that arrived so far
    fn handle_error_signals(&mut self) {
        loop {
            let signal = match self.error_signals.as_mut().map(|s| s.try_recv()) {
                Some(Ok(signal)) => signal,
                _ => break,
            };
            self.apply_error_signal(signal);
        }
    }

    fn apply_error_signal(&mut self, signal: ErrorSignal) {
        match signal {
            ErrorSignal::AcceptAll => {
                debug!("peer closed cleanly - accepting {} active writes", self.active_writes.len());
                self.read_ok = true;
                while let Some(write) = self.active_writes.pop_front() {
                    self.complete_write(write);
                }
            }
            ErrorSignal::Response(response) => self.apply_error_response(response),
        }
    }

    /// Everything written up to and including the response's identifier was accepted. The
    ///  first notification with a device beyond that point is where the peer stopped, and
    ///  everything after that notification is lost since the peer drops the connection.
    fn apply_error_response(&mut self, response: ErrorResponse) {
        debug!("applying error response {:?} to {} active writes", response, self.active_writes.len());

        let mut found = false;
        while let Some(write) = self.active_writes.pop_front() {
            for notification in write.notifications {
                if found {
                    self.fail(notification);
                    continue;
                }

                match notification.last_identifier() {
                    Some(last) if !last.is_covered_by(response.identifier) => {
                        found = true;
                        self.resolve_interrupted(notification, response);
                    }
                    _ => self.complete(notification),
                }
            }
        }

        if !found {
            self.apply_error_response_to_pending(response);
        }
    }

    /// A notification's first frames go out with a buffer that fills up while it is being
    ///  written, so a response can refer to a notification that is still pending
    fn apply_error_response_to_pending(&mut self, response: ErrorResponse) {
        let Some(pos) = self.pending_write.iter()
            .position(|n| n.last_identifier().is_some_and(|last| !last.is_covered_by(response.identifier)))
        else {
            return;
        };

        let candidate = &self.pending_write[pos];
        let first = candidate.identifier(candidate.device_index());
        let touched = first.is_covered_by(response.identifier)
            || (response.status.is_error() && first == response.identifier.next());
        if !touched {
            // the response refers to nothing that went out
            return;
        }

        let mut resolved = self.pending_write.drain(..=pos).collect::<Vec<_>>();
        if let Some(interrupted) = resolved.pop() {
            for notification in resolved {
                self.complete(notification);
            }
            self.resolve_interrupted(interrupted, response);
        }
    }

    fn resolve_interrupted(&self, mut notification: Notification, response: ErrorResponse) {
        let first_unaccepted = (notification.device_index()..notification.device_count())
            .find(|&index| !notification.identifier(index).is_covered_by(response.identifier))
            .unwrap_or(notification.device_count());
        notification.set_device_index(first_unaccepted);

        if response.status.is_error()
            && first_unaccepted < notification.device_count()
            && notification.identifier(first_unaccepted) == response.identifier.next()
        {
            if let Some(&device) = notification.device(first_unaccepted) {
                debug!("device {} rejected with {:?}", device, response.status);
                let _ = self.rejected_devices.send(RejectedDevice { device, status: response.status });
            }
        }

        self.post(notification, Outcome::Partial { status: response.status });
    }

    fn complete_write(&self, write: WriteLog) {
        for notification in write.notifications {
            self.complete(notification);
        }
    }

    fn fail_write(&self, write: WriteLog) {
        for notification in write.notifications {
            self.fail(notification);
        }
    }

    fn complete(&self, mut notification: Notification) {
        notification.mark_complete();
        self.post(notification, Outcome::Delivered);
    }

    fn fail(&self, notification: Notification) {
        self.post(notification, Outcome::Failed);
    }

    fn abandon(&self, item: QueueItem) {
        match item {
            QueueItem::Notification(notification) => self.fail(notification),
            QueueItem::Flush(request) => request.resolve(FlushStatus::Cancelled),
        }
    }

    fn post(&self, notification: Notification, outcome: Outcome) {
        trace!("notification for {} devices resolved as {:?}", notification.device_count(), outcome);
        if self.completions.send(Completion { notification, outcome }).is_err() {
            trace!("completion receiver is gone");
        }
    }
}

async fn next_signal(signals: &mut Option<mpsc::UnboundedReceiver<ErrorSignal>>) -> Option<ErrorSignal> {
    match signals {
        Some(signals) => signals.recv().await,
        None => None,
    }
}

#[async_trait]
impl ConnectionHandler for PushConnection {
    type Reader = ErrorStreamReader;

    fn reader(&mut self) -> ErrorStreamReader {
        PushConnection::reader(self)
    }

    async fn write<W>(&mut self, transport: W, cancel: CancellationToken) -> Result<u64, ApnsError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        PushConnection::write(self, transport, cancel).await
    }

    fn on_disconnect(&mut self) {
        PushConnection::on_disconnect(self)
    }
}
