use chrono::Utc;
use ide_orchestrator::{ReconcileReport, WorkspaceOrchestrator};
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Runs the reconcile pass every `interval_secs`.
pub async fn start_reconciler_task(orchestrator: WorkspaceOrchestrator, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(
        "Reconciler task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        if let Err(e) = run_reconciler_once(&orchestrator).await {
            error!("Reconcile pass failed: {}", e);
        }
    }
}

pub async fn run_reconciler_once(
    orchestrator: &WorkspaceOrchestrator,
) -> anyhow::Result<ReconcileReport> {
    Ok(orchestrator.reconcile(Utc::now()).await?)
}
