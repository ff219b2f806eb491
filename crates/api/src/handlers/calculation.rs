//! Handlers for the request/response calculation endpoints.
//!
//! Every endpoint that takes a model expects it as the multipart field
//! `dat_file`. Workspaces are removed once the response is built, or in
//! the background when the request is dropped early. A successful
//! `dat2calculationfile` is the exception: its result stays available for a
//! single `returnResults` call until the expiry sweep reclaims it.

use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sofi_core::error::CoreError;
use sofi_core::types::JobId;
use sofi_core::workspace::{JobSource, WorkspaceGuard};
use sofi_engine::{DocumentKind, ResultDocument};

use crate::error::{AppError, AppResult};
use crate::pipeline;
use crate::response::DataResponse;
use crate::state::AppState;

/// Name of the multipart field carrying the model file.
pub const MODEL_FIELD: &str = "dat_file";

/// Body of `POST /returnResults`.
#[derive(Debug, Deserialize)]
pub struct ResultRequest {
    pub id: String,
}

/// Returned by `POST /dat2calculationfile`.
#[derive(Debug, Serialize)]
pub struct CalculationCreated {
    pub id: JobId,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An uploaded model file.
struct ModelUpload {
    filename: Option<String>,
    data: Vec<u8>,
}

/// Pull the `dat_file` field out of a multipart body. Other fields are
/// ignored.
async fn read_model(mut multipart: Multipart) -> AppResult<ModelUpload> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(MODEL_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some(ModelUpload {
            filename,
            data: data.to_vec(),
        });
    }

    upload.ok_or_else(|| AppError::BadRequest("*.dat file is required".into()))
}

async fn calculate_upload(state: &AppState, multipart: Multipart) -> AppResult<WorkspaceGuard> {
    let upload = read_model(multipart).await?;
    let guard = pipeline::calculate(
        state,
        JobSource::Generated,
        &upload.data,
        upload.filename.as_deref(),
    )
    .await?;
    tracing::info!(job_id = %guard.job_id(), bytes = upload.data.len(), "Calculation finished");
    Ok(guard)
}

async fn calculate_and_extract(
    state: &AppState,
    multipart: Multipart,
    kind: DocumentKind,
) -> AppResult<Json<DataResponse<ResultDocument>>> {
    let guard = calculate_upload(state, multipart).await?;
    let document = pipeline::extract_and_release(state, guard, kind).await?;
    Ok(Json(DataResponse { data: document }))
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// POST /api/v1/dat2calculationfile
///
/// Run a calculation and keep its result for a later `returnResults` call.
pub async fn calculation_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<CalculationCreated>>> {
    let id = calculate_upload(&state, multipart).await?.retain();
    Ok(Json(DataResponse {
        data: CalculationCreated { id },
    }))
}

/// POST /api/v1/dat2result/frame
///
/// Run a calculation and return truss and node results.
pub async fn frame_results(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<ResultDocument>>> {
    calculate_and_extract(&state, multipart, DocumentKind::Frame).await
}

/// POST /api/v1/dat2result/building
///
/// Run a calculation and return quad element forces.
pub async fn building_results(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<ResultDocument>>> {
    calculate_and_extract(&state, multipart, DocumentKind::Building).await
}

/// POST /api/v1/returnResults
///
/// Frame results of an earlier `dat2calculationfile` job. The job's
/// workspace is removed afterwards, so each id can be fetched once.
pub async fn return_results(
    State(state): State<AppState>,
    Json(body): Json<ResultRequest>,
) -> AppResult<Json<DataResponse<ResultDocument>>> {
    let job_id = JobId::parse(&body.id)?;
    if !state.workspaces.contains(&job_id).await {
        return Err(CoreError::JobNotFound(job_id.to_string()).into());
    }
    let guard = state.workspaces.guard(&job_id);
    let document = pipeline::extract_and_release(&state, guard, DocumentKind::Frame).await?;
    Ok(Json(DataResponse { data: document }))
}
