//! A client for the legacy binary APNs provider protocol.
//!
//! Producers submit [Notification](model::Notification)s through a [PushHandle](push::PushHandle).
//!  A [PushConnection](push::PushConnection) writes them as frames, and since APNs only ever
//!  reports failure, it reconciles error responses against what was written, presumes old
//!  writes delivered and rewrites unresolved notifications after a reconnect. Every submitted
//!  notification comes out as exactly one [Completion](push::Completion).
//!
//! [PushClient](net::PushClient) keeps a push connection connected through a
//!  [Connector](net::Connector) for as long as there is work.

pub mod config;
pub mod error;
pub mod model;
pub mod net;
pub mod protocol;
pub mod push;
pub mod safe_converter;
pub mod test_util;
pub mod util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
