pub mod calculation;
pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                        WebSocket (streamed calculation sessions)
///
/// /dat2calculationfile       calculate, keep result (POST)
/// /dat2result/frame          calculate, return truss + node results (POST)
/// /dat2result/building       calculate, return quad results (POST)
/// /returnResults             results of a kept calculation (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // WebSocket endpoint.
        .route("/ws", get(ws::ws_handler))
        // Request/response calculations.
        .merge(calculation::router())
}
