use assetflow_infra::PipelineConfig;
use assetflow_worker::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    assetflow_observability::init();

    let config = PipelineConfig::from_env()?;
    tracing::info!(
        concurrency = config.worker.concurrency,
        max_attempts = config.retry.max_attempts,
        visibility_timeout_ms = config.queue.visibility_timeout.as_millis() as u64,
        "starting asset worker"
    );

    let app = App::build(config).await?;
    let report = app
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    if report.abandoned.is_empty() {
        tracing::info!(resolved = report.resolved, "worker drained cleanly");
    } else {
        tracing::warn!(
            resolved = report.resolved,
            abandoned = ?report.abandoned,
            "worker stopped with abandoned jobs; they will be redelivered after their visibility timeout"
        );
    }
    Ok(())
}
