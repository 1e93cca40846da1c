use agent_core::StepRequest;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::error_response;
use crate::metrics;
use crate::server::state::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new().route("/v1/step", post(step_handler))
}

#[instrument(name = "waypoint.step", skip(state, payload))]
async fn step_handler(
    State(state): State<ServeState>,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            metrics::record_step_request("validation");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "kind": "validation",
                    "error": rejection.body_text(),
                })),
            )
                .into_response();
        }
    };

    match state.engine.step(request).await {
        Ok(response) => {
            metrics::record_step_request("ok");
            info!(
                task_id = %response.task_id,
                step_index = ?response.step_index,
                status = ?response.status,
                action = ?response.action,
                "step decided"
            );
            Json(response).into_response()
        }
        Err(err) => {
            metrics::record_step_request(err.kind());
            warn!(kind = err.kind(), error = %err, "step rejected");
            error_response(&err)
        }
    }
}
