//! One streamed calculation session.
//!
//! A session accepts a single model, stages it under the connection's id,
//! and runs the calculation in a background task that reports progress on
//! the connection and closes it when done:
//!
//! ```text
//! greeting -> "DAT file received" -> "Calculation was successful" -> send-file -> Close
//!                                 \-> "ERROR - calculation not successful"      -> Close
//! ```
//!
//! Every step is a transition of [`SessionLifecycle`]; once the transport
//! disconnects the session is `Abandoned` and nothing further is emitted.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use sofi_core::session::{SessionLifecycle, SessionState};
use sofi_core::workspace::{JobSource, StagedJob, WorkspaceGuard};
use sofi_engine::{DocumentKind, ResultDocument};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::pipeline;
use crate::state::AppState;
use crate::ws::events::{FileDelivery, ModelSubmission, OutboundEvent};

const MODEL_RECEIVED: &str = "DAT file received, starting the calculation";
const CALCULATION_SUCCEEDED: &str = "Calculation was successful. Sending the result file now.";
const CALCULATION_FAILED: &str = "ERROR - calculation not successful.";

/// Which client flow submitted the model; decides the delivery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// `send-model`, answered with `send-file`.
    Initial,
    /// `send-model-update`, answered with `send-file-update`.
    Update,
}

impl Flow {
    fn delivery(
        self,
        submission: &ModelSubmission,
        artifact: &[u8],
        document: ResultDocument,
    ) -> OutboundEvent {
        let delivery = FileDelivery {
            file_data: STANDARD.encode(artifact),
            viewer_session_id: submission.viewer_session_id.clone(),
            original_params: match self {
                Self::Initial => Some(submission.original_params.clone()),
                Self::Update => None,
            },
            frontend_session_id: submission.frontend_session_id.clone(),
            project_id: submission.project_id.clone(),
            results: Some(document),
        };
        match self {
            Self::Initial => OutboundEvent::SendFile(delivery),
            Self::Update => OutboundEvent::SendFileUpdate(delivery),
        }
    }
}

/// State shared between a connection's receive loop and its calculation
/// task.
#[derive(Clone)]
pub struct Session {
    state: AppState,
    conn_id: String,
    lifecycle: Arc<Mutex<SessionLifecycle>>,
}

impl Session {
    pub fn new(state: AppState, conn_id: &str) -> Self {
        Self {
            state,
            conn_id: conn_id.to_string(),
            lifecycle: Arc::new(Mutex::new(SessionLifecycle::new())),
        }
    }

    pub async fn greet(&self) {
        self.emit(OutboundEvent::greeting(&self.conn_id)).await;
    }

    /// Stage a submitted model and start its calculation in the background.
    ///
    /// Returns `None` when the session has already taken a model or staging
    /// failed; in the latter case the client has been notified and the
    /// connection is closing. The returned task owns the job's workspace:
    /// aborting it removes the workspace.
    pub async fn submit(&self, flow: Flow, submission: ModelSubmission) -> Option<JoinHandle<()>> {
        if let Err(e) = self.lifecycle.lock().await.advance(SessionState::Receiving) {
            tracing::warn!(conn_id = %self.conn_id, error = %e, "Model submission ignored");
            return None;
        }

        let staged = pipeline::stage(
            &self.state,
            JobSource::Session(&self.conn_id),
            submission.file_data.as_bytes(),
            None,
        )
        .await;

        match staged {
            Ok((staged, guard)) => {
                tracing::info!(
                    conn_id = %self.conn_id,
                    job_id = %staged.job_id,
                    ?flow,
                    bytes = submission.file_data.len(),
                    "Model received",
                );
                Some(tokio::spawn(self.clone().run(flow, submission, staged, guard)))
            }
            Err(e) => {
                tracing::error!(conn_id = %self.conn_id, error = %e, "Failed to stage model");
                self.fail(&submission.project_id).await;
                None
            }
        }
    }

    /// The transport went away; nothing further is emitted.
    ///
    /// Call after the calculation task has been aborted. Dropping that task
    /// released its workspace, after any extraction still running on the
    /// blocking pool has closed the result database.
    pub async fn abandon(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = lifecycle.state();
        if lifecycle.abandon() {
            tracing::info!(conn_id = %self.conn_id, %previous, "Session abandoned");
        }
    }

    async fn run(
        self,
        flow: Flow,
        submission: ModelSubmission,
        staged: StagedJob,
        guard: WorkspaceGuard,
    ) {
        let project_id = &submission.project_id;

        tokio::time::sleep(self.state.config.engine.pacing_delay()).await;
        if !self.advance(SessionState::Calculating).await {
            return;
        }
        self.emit(OutboundEvent::notice(MODEL_RECEIVED, project_id)).await;

        let guard = match pipeline::run(&self.state, &staged, guard).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::info!(conn_id = %self.conn_id, error = %e, "Calculation not successful");
                self.fail(project_id).await;
                return;
            }
        };

        if !self.advance(SessionState::Extracting).await {
            return;
        }
        let (document, artifact) = match self.collect(guard).await {
            Ok(collected) => collected,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Result extraction failed");
                self.fail(project_id).await;
                return;
            }
        };

        if !self.advance(SessionState::Delivering).await {
            return;
        }
        self.emit(OutboundEvent::notice(CALCULATION_SUCCEEDED, project_id)).await;
        self.emit(flow.delivery(&submission, &artifact, document)).await;
        tracing::info!(conn_id = %self.conn_id, bytes = artifact.len(), "Result delivered");

        self.finish().await;
    }

    /// Frame results plus the raw artifact bytes. Removes the workspace.
    async fn collect(&self, guard: WorkspaceGuard) -> AppResult<(ResultDocument, Vec<u8>)> {
        let artifact = match self.read_artifact(&guard).await {
            Ok(artifact) => artifact,
            Err(e) => {
                pipeline::release(guard).await;
                return Err(e);
            }
        };
        let document = pipeline::extract_and_release(&self.state, guard, DocumentKind::Frame).await?;
        Ok((document, artifact))
    }

    async fn read_artifact(&self, guard: &WorkspaceGuard) -> AppResult<Vec<u8>> {
        let output = pipeline::locate(&self.state, guard).await?;
        tokio::fs::read(&output)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to read result file: {e}")))
    }

    async fn fail(&self, project_id: &Value) {
        if !self.advance(SessionState::Failed).await {
            return;
        }
        self.emit(OutboundEvent::notice(CALCULATION_FAILED, project_id)).await;
        self.finish().await;
    }

    async fn finish(&self) {
        self.state.ws_manager.close(&self.conn_id).await;
        self.advance(SessionState::Closed).await;
    }

    /// Returns `false` once the session has been abandoned.
    async fn advance(&self, next: SessionState) -> bool {
        match self.lifecycle.lock().await.advance(next) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn_id = %self.conn_id, error = %e, "Session step skipped");
                false
            }
        }
    }

    async fn emit(&self, event: OutboundEvent) {
        let name = event.name();
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(conn_id = %self.conn_id, event = name, error = %e, "Failed to encode event");
                return;
            }
        };
        if !self.state.ws_manager.send(&self.conn_id, message).await {
            tracing::debug!(conn_id = %self.conn_id, event = name, "Event dropped, connection gone");
        }
    }
}
