use std::io;

use desync_kernel::ConfigError;
use thiserror::Error;

/// Any failure to establish a RethinkDB connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid connection config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {seconds}s connecting to {address}")]
    Timeout { address: String, seconds: u64 },

    #[error("i/o error during handshake: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ConnectionError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}
