use anyhow::Context;
use make_api::{
    config::Config,
    services::{
        sync_worker::{CycleOutcome, QuizSyncWorker},
        AppState,
    },
    utils::logging::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load().context("Failed to load configuration")?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;

    let redis_client = config
        .redis_uri
        .as_deref()
        .map(redis::Client::open)
        .transpose()
        .context("Failed to create Redis client")?;

    let app_state = AppState::new(config, mongo_client, redis_client)
        .await
        .context("Failed to initialize app state")?;

    let worker = QuizSyncWorker::from_state(&app_state)?;

    match worker.run_cycle().await {
        CycleOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                anyhow::bail!("{}", report.failure_summary());
            }
        }
        CycleOutcome::Skipped(reason) => {
            tracing::info!(?reason, "Sync cycle skipped");
        }
    }

    Ok(())
}
