//! RethinkDB connection client.
//!
//! Only the connection handshake is implemented: resolve, connect, negotiate
//! the V1_0 protocol and authenticate with SCRAM-SHA-256. Queries are out of
//! scope for this crate.

use async_trait::async_trait;
use desync_kernel::ConnectionConfig;

pub mod client;
pub mod error;
pub mod handshake;
pub mod scram;

pub use client::{ConnectionHandle, Credentials, RethinkClient};
pub use error::ConnectionError;

/// Something that can turn a [`ConnectionConfig`] into a live connection.
///
/// Each call to [`DatabaseClient::connect`] is a single attempt that resolves
/// to exactly one outcome.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    type Handle: Send;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Handle, ConnectionError>;
}
