//! Periodic removal of expired job workspaces.
//!
//! Results kept by `dat2calculationfile` wait for a single `returnResults`
//! call. If it never comes, this job removes them once they outlive the
//! configured time to live. It also retries workspaces whose earlier
//! removal failed.

use std::sync::Arc;
use std::time::Duration;

use sofi_core::workspace::WorkspaceManager;
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(
    workspaces: Arc<WorkspaceManager>,
    max_age: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        max_age_secs = max_age.as_secs(),
        interval_secs = every.as_secs(),
        "Workspace reaper started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Workspace reaper stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = workspaces.reap_expired(max_age).await;
                if removed > 0 {
                    tracing::info!(removed, "Workspace reaper: removed expired workspaces");
                } else {
                    tracing::debug!("Workspace reaper: nothing expired");
                }
            }
        }
    }
}
