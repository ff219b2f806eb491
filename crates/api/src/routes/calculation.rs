//! Route definitions for the calculation endpoints.

use axum::routing::post;
use axum::Router;

use crate::handlers::calculation;
use crate::state::AppState;

/// Calculation routes, mounted directly under `/api/v1`.
///
/// ```text
/// POST   /dat2calculationfile   -> calculation_file
/// POST   /dat2result/frame      -> frame_results
/// POST   /dat2result/building   -> building_results
/// POST   /returnResults         -> return_results
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dat2calculationfile", post(calculation::calculation_file))
        .route("/dat2result/frame", post(calculation::frame_results))
        .route("/dat2result/building", post(calculation::building_results))
        .route("/returnResults", post(calculation::return_results))
}
