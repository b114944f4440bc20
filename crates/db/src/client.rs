use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use desync_kernel::ConnectionConfig;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::ConnectionError;
use crate::{handshake, DatabaseClient};

const DEFAULT_USER: &str = "admin";

/// Account used for the SCRAM exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl Default for Credentials {
    /// The RethinkDB driver default: `admin` with an empty password.
    fn default() -> Self {
        Self::new(DEFAULT_USER, "")
    }
}

/// A connection that completed the handshake.
#[derive(Debug)]
pub struct ConnectionHandle {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
    server_version: String,
    database: String,
}

impl ConnectionHandle {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Default database for queries issued on this connection.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Shut down the write half and release the socket.
    pub async fn close(self) -> Result<(), ConnectionError> {
        let mut stream = self.stream.into_inner();
        stream.shutdown().await?;
        Ok(())
    }
}

/// RethinkDB client speaking the V1_0 JSON handshake.
#[derive(Debug, Clone, Default)]
pub struct RethinkClient {
    credentials: Credentials,
}

impl RethinkClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self { credentials }
    }

    async fn establish(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, ConnectionError> {
        let address = config.address();

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(&address)
            .await
            .map_err(|source| ConnectionError::Resolve {
                address: address.clone(),
                source,
            })?
            .collect();
        if candidates.is_empty() {
            return Err(ConnectionError::Resolve {
                address,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            });
        }

        let stream = TcpStream::connect(candidates.as_slice())
            .await
            .map_err(|source| ConnectionError::Connect {
                address: address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let mut stream = BufReader::new(stream);
        let server_version = handshake::perform(&mut stream, &self.credentials).await?;

        Ok(ConnectionHandle {
            stream,
            peer,
            server_version,
            database: config.database_name().to_string(),
        })
    }
}

#[async_trait]
impl DatabaseClient for RethinkClient {
    type Handle = ConnectionHandle;

    async fn connect(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, ConnectionError> {
        let seconds = config.timeout_seconds();
        match tokio::time::timeout(Duration::from_secs(seconds), self.establish(config)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                address: config.address(),
                seconds,
            }),
        }
    }
}
