use anyhow::Context;
use desync_bootstrap::run;
use desync_db::RethinkClient;
use desync_kernel::{ConnectionConfig, Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load desync settings")?;
    desync_telemetry::init(&settings.telemetry)
        .with_context(|| "failed to initialize telemetry")?;

    let config = ConnectionConfig::rethinkdb();
    let client = RethinkClient::new();

    // Connection failures are logged inside `run` and do not affect the exit status.
    run(&client, &config).await;

    Ok(())
}
