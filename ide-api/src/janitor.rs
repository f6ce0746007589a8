use chrono::Utc;
use ide_orchestrator::{ReapReport, WorkspaceOrchestrator};
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Runs the expiration reaper every `interval_secs`.
pub async fn start_janitor_task(orchestrator: WorkspaceOrchestrator, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(
        "Janitor task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        if let Err(e) = run_janitor_once(&orchestrator).await {
            error!("Janitor sweep failed: {}", e);
        }
    }
}

/// One sweep. Per-workspace failures are in the report; an error here means
/// the sweep could not start.
pub async fn run_janitor_once(orchestrator: &WorkspaceOrchestrator) -> anyhow::Result<ReapReport> {
    Ok(orchestrator.reap(Utc::now()).await?)
}
