//! Workflow definition registration and inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use definition::WorkflowDefinition;
use engine::ServiceRouter;
use instance_store::InstanceStore;
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::instances::AppState;

#[derive(Serialize)]
pub struct WorkflowRegisteredResponse {
    pub name: String,
    pub version: u32,
}

/// POST /workflows — validate and publish a workflow definition.
#[tracing::instrument(skip(state, definition))]
pub async fn register<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowRegisteredResponse>), ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let name = definition.name.clone();
    let version = definition.version;
    state.engine.registry().register(definition)?;

    Ok((
        StatusCode::CREATED,
        Json(WorkflowRegisteredResponse { name, version }),
    ))
}

/// GET /workflows — list registered workflow names.
#[tracing::instrument(skip(state))]
pub async fn list<S, R>(State(state): State<Arc<AppState<S, R>>>) -> Json<Vec<String>>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    Json(state.engine.registry().workflow_names())
}

/// GET /workflows/:name/:version — fetch one published version.
#[tracing::instrument(skip(state))]
pub async fn get<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path((name, version)): Path<(String, u32)>,
) -> Result<Json<WorkflowDefinition>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let definition = state.engine.registry().get(&name, version)?;
    Ok(Json((*definition).clone()))
}

/// GET /workflows/:name/latest — fetch the highest published version.
#[tracing::instrument(skip(state))]
pub async fn latest<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let definition = state.engine.registry().latest(&name)?;
    Ok(Json((*definition).clone()))
}
