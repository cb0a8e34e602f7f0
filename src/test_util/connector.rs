use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use anyhow::anyhow;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use crate::net::connector::Connector;

/// Connects through in-memory pipes. The server end of each connection is handed out
///  through the receiver returned by [DuplexConnector::new].
pub struct DuplexConnector {
    buffer_size: usize,
    failures_left: AtomicUsize,
    connects: AtomicUsize,
    server_ends: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexConnector {
    pub fn new(buffer_size: usize) -> (DuplexConnector, mpsc::UnboundedReceiver<DuplexStream>) {
        let (send, recv) = mpsc::unbounded_channel();
        let connector = DuplexConnector {
            buffer_size,
            failures_left: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            server_ends: send,
        };
        (connector, recv)
    }

    /// The next `n` connection attempts fail
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::Release);
    }

    /// number of successful connects so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> anyhow::Result<DuplexStream> {
        let failed = self.failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("simulated connect failure"));
        }

        let (client, server) = tokio::io::duplex(self.buffer_size);
        self.server_ends.send(server)
            .map_err(|_| anyhow!("no server is listening"))?;
        self.connects.fetch_add(1, Ordering::AcqRel);
        Ok(client)
    }
}
