//! Connection management: how a push connection gets its transport, and how a connection
//!  is driven and re-established.

pub mod client;
pub mod connector;
pub mod driver;

pub use client::PushClient;
pub use connector::{Connector, TcpConnector};
pub use driver::{drive, ConnectionHandler, ReadHandler};
