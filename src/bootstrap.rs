//! Single-shot connection bootstrap.

use desync_db::{ConnectionError, DatabaseClient};
use desync_kernel::ConnectionConfig;

/// Outcome of a bootstrap attempt.
///
/// The attempt is connecting for as long as [`run`] is pending; both variants
/// are terminal and there is no way back to connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Connected,
    Failed,
}

/// Validate `config` and make exactly one connection attempt with `client`.
pub async fn bootstrap_connection<C>(
    client: &C,
    config: &ConnectionConfig,
) -> Result<C::Handle, ConnectionError>
where
    C: DatabaseClient,
{
    config.validate()?;
    client.connect(config).await
}

/// Bootstrap the connection and report the outcome on the log stream.
///
/// Errors are logged and swallowed. On success the handle is abandoned: it is
/// dropped at the end of this call without an explicit close.
pub async fn run<C>(client: &C, config: &ConnectionConfig) -> BootstrapState
where
    C: DatabaseClient,
{
    match bootstrap_connection(client, config).await {
        Ok(_handle) => {
            tracing::info!("Connected to RethinkDB");
            BootstrapState::Connected
        }
        Err(error) => {
            tracing::error!(error = %error, "failed to connect to RethinkDB");
            BootstrapState::Failed
        }
    }
}
