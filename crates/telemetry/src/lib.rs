//! Tracing subscriber setup.
//!
//! Informational events go to stdout; warnings and errors go to stderr so that
//! a failed connection surfaces on the operator's error stream.

use anyhow::Context;
use desync_kernel::settings::{LogFormat, TelemetrySettings};
use tracing::Level;
use tracing_subscriber::fmt::writer::{MakeWriterExt, OrElse, WithMaxLevel};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from telemetry settings.
///
/// `RUST_LOG` takes precedence over `telemetry.log_level` when set.
pub fn init(settings: &TelemetrySettings) -> anyhow::Result<()> {
    let filter = build_filter(settings)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(split_writer(std::io::stderr, std::io::stdout));

    let result = match settings.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Route WARN and ERROR events to `errors` and everything else to `output`.
pub fn split_writer<E, O>(errors: E, output: O) -> OrElse<WithMaxLevel<E>, O>
where
    E: for<'a> MakeWriter<'a>,
    O: for<'a> MakeWriter<'a>,
{
    errors.with_max_level(Level::WARN).or_else(output)
}

fn build_filter(settings: &TelemetrySettings) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .with_context(|| format!("invalid log level '{}'", settings.log_level)),
    }
}
