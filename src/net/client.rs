use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::PushConfig;
use crate::error::ApnsError;
use crate::net::connector::Connector;
use crate::net::driver::drive;
use crate::push::PushConnection;
use crate::util::backoff::ExponentialBackoff;
use crate::util::random::Random;

/// Keeps a [PushConnection] connected while it has work, reconnecting with exponential
///  backoff after failures.
pub struct PushClient<C: Connector> {
    connector: C,
    random: Box<dyn Random>,
    config: Arc<PushConfig>,
}

impl<C: Connector> PushClient<C> {
    pub fn new(connector: C, random: impl Random + 'static, config: Arc<PushConfig>) -> PushClient<C> {
        PushClient {
            connector,
            random: Box::new(random),
            config,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Runs until the connection's input queue is complete and all of its notifications
    ///  are written, or until cancelled. Either way, the connection is closed at the end so
    ///  that every notification is resolved.
    ///
    /// Connections are only opened while there is something to write.
    pub async fn run(&self, mut connection: PushConnection, cancel: CancellationToken) -> anyhow::Result<()> {
        self.config.validate()?;
        let mut backoff = ExponentialBackoff::new(&self.config.reconnect);

        while connection.await_work(&cancel).await {
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                c = self.connector.connect() => c,
            };

            let failed = match connected {
                Ok(stream) => {
                    debug!("connected");
                    match drive(&mut connection, stream, &cancel, self.config.read_drain_timeout).await {
                        Ok(bytes_written) => {
                            debug!("connection done, {} bytes written in total", bytes_written);
                            backoff.reset();
                            false
                        }
                        Err(ApnsError::Cancelled) => break,
                        Err(e) => {
                            warn!("connection failed: {}", e);
                            true
                        }
                    }
                }
                Err(e) => {
                    warn!("error connecting to {}:{}: {}", self.config.host, self.config.port, e);
                    true
                }
            };

            if failed {
                let delay = backoff.next_delay(self.random.as_ref());
                debug!("reconnecting in {:?}", delay);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }

        info!("push client shutting down");
        connection.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;
    use crate::notification;
    use crate::push::Outcome;
    use crate::protocol::StatusCode;
    use crate::test_util::{test_device, DuplexConnector, MockApnsPeer};
    use crate::util::random::MockRandom;

    fn config() -> Arc<PushConfig> {
        let mut config = PushConfig::new("localhost", 2195);
        config.reconnect.initial_delay = Duration::from_millis(100);
        Arc::new(config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_with_backoff() {
        let config = config();
        let (connector, mut server_ends) = DuplexConnector::new(64 * 1024);
        connector.fail_next(2);

        let mut random = MockRandom::new();
        random.expect_gen_f64_range()
            .times(2)
            .return_const(0.5);

        let (connection, handle, mut outputs) = PushConnection::new(config.clone());
        let client = PushClient::new(connector, random, config);

        let (peer, mut frames) = MockApnsPeer::new();
        let server = tokio::spawn(async move {
            let mut peer = peer;
            let cancel = CancellationToken::new();
            while let Some(stream) = server_ends.recv().await {
                let _ = drive(&mut peer, stream, &cancel, Duration::from_secs(1)).await;
            }
        });

        let start = Instant::now();
        handle.send(notification!([1])).await.unwrap();
        handle.send(notification!([2])).await.unwrap();
        drop(handle);

        client.run(connection, CancellationToken::new()).await.unwrap();

        // 100ms and 200ms, halved by the jitter
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(client.connector().connects(), 1);

        assert_eq!(frames.recv().await.unwrap().identifier.unwrap().to_raw(), 1);
        assert_eq!(frames.recv().await.unwrap().identifier.unwrap().to_raw(), 2);

        for _ in 0..2 {
            assert_eq!(outputs.completions.recv().await.unwrap().outcome, Outcome::Delivered);
        }
        assert!(outputs.completions.recv().await.is_none());

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_connection_without_work() {
        let (connector, _server_ends) = DuplexConnector::new(1024);
        let (connection, handle, mut outputs) = PushConnection::new(config());
        let client = PushClient::new(connector, MockRandom::new(), config());

        drop(handle);
        client.run(connection, CancellationToken::new()).await.unwrap();

        assert_eq!(client.connector().connects(), 0);
        assert!(outputs.completions.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_backing_off() {
        let (connector, _server_ends) = DuplexConnector::new(1024);
        connector.fail_next(usize::MAX);

        let mut random = MockRandom::new();
        random.expect_gen_f64_range().return_const(1.0);

        let (connection, handle, mut outputs) = PushConnection::new(config());
        let client = PushClient::new(connector, random, config());
        handle.send(notification!([1])).await.unwrap();

        let cancel = CancellationToken::new();
        let cancel_later = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            cancel_later.cancel();
        });

        client.run(connection, cancel).await.unwrap();

        let completion = outputs.completions.recv().await.unwrap();
        assert_eq!(completion.outcome, Outcome::Failed);
        assert!(outputs.completions.recv().await.is_none());
        drop(handle);
    }

    fn spawn_peer(peer: MockApnsPeer, mut server_ends: tokio::sync::mpsc::UnboundedReceiver<tokio::io::DuplexStream>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut peer = peer;
            let cancel = CancellationToken::new();
            while let Some(stream) = server_ends.recv().await {
                let _ = drive(&mut peer, stream, &cancel, Duration::from_secs(1)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_rejected_device_within_notification() {
        let config = config();
        let (connector, server_ends) = DuplexConnector::new(64 * 1024);
        let (peer, mut frames) = MockApnsPeer::rejecting(test_device(4), StatusCode::InvalidToken);
        let server = spawn_peer(peer, server_ends);

        let mut random = MockRandom::new();
        random.expect_gen_f64_range().return_const(1.0);

        let (connection, handle, mut outputs) = PushConnection::new(config.clone());
        let client = PushClient::new(connector, random, config);

        handle.send(notification!([1, 2, 3, 4, 5])).await.unwrap();
        drop(handle);
        client.run(connection, CancellationToken::new()).await.unwrap();

        let completion = outputs.completions.recv().await.unwrap();
        assert_eq!(completion.outcome, Outcome::Partial { status: StatusCode::InvalidToken });
        assert_eq!(completion.notification.device_index(), 3);
        assert!(outputs.completions.recv().await.is_none());

        let rejected = outputs.rejected_devices.recv().await.unwrap();
        assert_eq!(rejected.device, test_device(4));
        assert_eq!(rejected.status, StatusCode::InvalidToken);

        let mut identifiers = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            identifiers.push(frame.identifier.unwrap().to_raw());
        }
        assert_eq!(&identifiers[..4], &[1, 2, 3, 4]);

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_blocking_flush_precedes_later_writes() {
        let config = config();
        let (connector, server_ends) = DuplexConnector::new(64 * 1024);
        let (peer, mut frames) = MockApnsPeer::new();
        let server = spawn_peer(peer, server_ends);

        let (connection, handle, mut outputs) = PushConnection::new(config.clone());
        let client = PushClient::new(connector, MockRandom::new(), config);
        let client_task = tokio::spawn(async move {
            client.run(connection, CancellationToken::new()).await
        });

        handle.send(notification!([1])).await.unwrap();
        handle.flush(true).await.unwrap();
        assert_eq!(handle.stats().notifications_written(), 1);
        assert_eq!(frames.recv().await.unwrap().token[0], 1);

        handle.send(notification!([2])).await.unwrap();
        handle.flush(true).await.unwrap();
        assert_eq!(handle.stats().notifications_written(), 2);
        assert_eq!(frames.recv().await.unwrap().token[0], 2);

        drop(handle);
        client_task.await.unwrap().unwrap();

        for _ in 0..2 {
            assert_eq!(outputs.completions.recv().await.unwrap().outcome, Outcome::Delivered);
        }
        server.await.unwrap();
    }
}
