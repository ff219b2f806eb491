use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sofi_core::error::CoreError;
use sofi_engine::cdb::CdbError;
use sofi_engine::EngineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the workspace layer, the engine invoker and
/// the result database, and adds HTTP-specific variants. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `sofi_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failed calculation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A result database failure.
    #[error(transparent)]
    Database(#[from] CdbError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::JobNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Calculation with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::OutputNotFound { .. } => {
                    tracing::warn!(error = %core, "Result file missing");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "OUTPUT_NOT_FOUND",
                        "Calculation result file not found".to_string(),
                    )
                }
                CoreError::WorkspaceCreation { .. }
                | CoreError::WorkspaceDestruction { .. }
                | CoreError::AmbiguousOutput { .. }
                | CoreError::Internal(_) => internal(core),
            },

            // --- Calculation outcomes ---
            AppError::Engine(engine) => match engine {
                EngineError::Timeout { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ENGINE_TIMEOUT",
                    "Timeout in calculation".to_string(),
                ),
                EngineError::Unavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ENGINE_UNAVAILABLE",
                    "Calculation engine is not installed".to_string(),
                ),
                EngineError::NoOutput { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CALCULATION_FAILED",
                    "Calculation finished without producing results".to_string(),
                ),
            },

            // --- Result database ---
            AppError::Database(db) => match db {
                CdbError::LibraryUnavailable(_) => {
                    tracing::error!(error = %db, "Result database library unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "RESULT_LIBRARY_UNAVAILABLE",
                        "Result database library is not installed".to_string(),
                    )
                }
                CdbError::Open { .. } | CdbError::Read { .. } => {
                    tracing::error!(error = %db, "Result database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "Failed to read calculation results".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Log the full error and answer with a sanitized 500.
fn internal(err: &CoreError) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal core error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
