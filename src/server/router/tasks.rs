use agent_core::AgentError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use waypoint_core_types::{Task, TaskId};
use waypoint_task_store::validate_task_id;

use super::error_response;
use crate::server::state::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route("/v1/tasks/:task_id", get(get_task_handler))
        .route("/v1/tasks/:task_id/actions", get(task_actions_handler))
        .route(
            "/v1/tasks/:task_id/corrections",
            get(task_corrections_handler),
        )
}

#[derive(Debug, Default, Deserialize)]
struct CorrectionQuery {
    /// Restrict to one plan step.
    step: Option<u32>,
}

async fn load_task(state: &ServeState, task_id: String) -> Result<Task, Response> {
    let id = TaskId::from(task_id);
    validate_task_id(&id).map_err(|err| error_response(&AgentError::from(err)))?;
    match state.store.get(&id).await {
        Ok(Some(task)) => Ok(task),
        Ok(None) => Err(error_response(&AgentError::NotFound(id))),
        Err(err) => Err(error_response(&AgentError::from(err))),
    }
}

#[instrument(name = "waypoint.tasks.detail", skip(state))]
async fn get_task_handler(
    State(state): State<ServeState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match load_task(&state, task_id).await {
        Ok(task) => (StatusCode::OK, Json(json!({ "success": true, "task": task }))).into_response(),
        Err(response) => response,
    }
}

#[instrument(name = "waypoint.tasks.actions", skip(state))]
async fn task_actions_handler(
    State(state): State<ServeState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let task = match load_task(&state, task_id).await {
        Ok(task) => task,
        Err(response) => return response,
    };
    match state.store.action_records(&task.id).await {
        Ok(records) => Json(json!({
            "success": true,
            "task_id": task.id,
            "actions": records,
        }))
        .into_response(),
        Err(err) => error_response(&AgentError::from(err)),
    }
}

#[instrument(name = "waypoint.tasks.corrections", skip(state))]
async fn task_corrections_handler(
    State(state): State<ServeState>,
    Path(task_id): Path<String>,
    Query(query): Query<CorrectionQuery>,
) -> impl IntoResponse {
    let task = match load_task(&state, task_id).await {
        Ok(task) => task,
        Err(response) => return response,
    };
    match state.store.correction_records(&task.id, query.step).await {
        Ok(records) => Json(json!({
            "success": true,
            "task_id": task.id,
            "corrections": records,
        }))
        .into_response(),
        Err(err) => error_response(&AgentError::from(err)),
    }
}
