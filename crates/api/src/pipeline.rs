//! The stage → calculate → extract → destroy call chain shared by the HTTP
//! handlers and the streamed WebSocket sessions.
//!
//! A staged job travels with its [`WorkspaceGuard`]. Whoever holds the
//! guard when the chain is cut short (a cancelled request, an aborted
//! session) drops it, and the workspace is removed in the background.

use std::path::PathBuf;

use sofi_core::workspace::{JobSource, StagedJob, WorkspaceGuard};
use sofi_engine::{DocumentKind, ResultDocument};
use tokio::runtime::Handle;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Stage a model and take ownership of its workspace.
pub async fn stage(
    state: &AppState,
    source: JobSource<'_>,
    payload: &[u8],
    filename: Option<&str>,
) -> AppResult<(StagedJob, WorkspaceGuard)> {
    let staged = state.workspaces.stage(source, payload, filename).await?;
    let guard = state.workspaces.guard(&staged.job_id);
    Ok((staged, guard))
}

/// Run the engine on a staged job.
///
/// Every outcome except `Success` removes the workspace and comes back as
/// an error.
pub async fn run(
    state: &AppState,
    staged: &StagedJob,
    guard: WorkspaceGuard,
) -> AppResult<WorkspaceGuard> {
    let outcome = state.invoker.run_default(&staged.input_file).await;
    match outcome.into_result() {
        Ok(()) => Ok(guard),
        Err(e) => {
            release(guard).await;
            Err(e.into())
        }
    }
}

/// [`stage`] followed by [`run`].
pub async fn calculate(
    state: &AppState,
    source: JobSource<'_>,
    payload: &[u8],
    filename: Option<&str>,
) -> AppResult<WorkspaceGuard> {
    let (staged, guard) = stage(state, source, payload, filename).await?;
    run(state, &staged, guard).await
}

/// Path of the job's single output artifact.
pub async fn locate(state: &AppState, guard: &WorkspaceGuard) -> AppResult<PathBuf> {
    let extension = &state.invoker.config().output_extension;
    Ok(state
        .workspaces
        .locate_output(guard.job_id(), extension)
        .await?)
}

/// Extract a document from a finished job, then remove its workspace
/// whether or not extraction succeeded.
///
/// The read runs on the blocking pool and owns the guard until the
/// database is closed, so the workspace is never removed under an open
/// handle, even when the caller is cancelled mid-read.
pub async fn extract_and_release(
    state: &AppState,
    guard: WorkspaceGuard,
    kind: DocumentKind,
) -> AppResult<ResultDocument> {
    let output = match locate(state, &guard).await {
        Ok(output) => output,
        Err(e) => {
            release(guard).await;
            return Err(e);
        }
    };

    let extractor = state.extractor.clone();
    let runtime = Handle::current();
    let document = tokio::task::spawn_blocking(move || {
        let document = extractor.document(kind, &output, guard.job_id().as_str());
        runtime.block_on(release(guard));
        document
    })
    .await
    .map_err(|e| AppError::InternalError(format!("Extraction task failed: {e}")))??;

    tracing::info!(
        calculation_id = %document.calculation_id,
        kind = kind.as_str(),
        "Results extracted",
    );
    Ok(document)
}

/// Best-effort workspace removal. Already-gone workspaces are not an error.
///
/// A failed removal leaves the job registered; the expiry sweep retries it.
pub async fn release(guard: WorkspaceGuard) {
    let job_id = guard.job_id().clone();
    match guard.destroy().await {
        Ok(true) => {}
        Ok(false) => tracing::debug!(job_id = %job_id, "Workspace already removed"),
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to remove workspace"),
    }
}
