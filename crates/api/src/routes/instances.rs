//! Instance control and query endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::InstanceId;
use engine::{Context, Engine, InstanceStatus, ServiceRouter};
use instance_store::InstanceStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, R> {
    pub engine: Engine<S, R>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct StartInstanceRequest {
    /// Workflow name; the latest version is used unless one is given.
    pub workflow: String,
    pub version: Option<u32>,
    /// Trigger payload, seeding the instance context.
    #[serde(default)]
    pub context: Context,
}

#[derive(Deserialize, Default)]
pub struct CompensateRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct InstanceFinishedResponse {
    pub instance_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct InstanceResponse {
    pub id: String,
    pub workflow: String,
    pub status: String,
    pub completed_steps: Vec<String>,
    /// Steps of the definition that have not succeeded, including steps
    /// never attempted.
    pub pending_steps: Vec<String>,
    pub failure_reason: Option<String>,
    pub ledger: Vec<LedgerEntryResponse>,
    pub context: Context,
}

#[derive(Serialize)]
pub struct LedgerEntryResponse {
    pub step: String,
    pub attempt: u32,
    pub outcome: String,
    pub error: Option<String>,
    pub compensation: String,
}

#[derive(Serialize)]
pub struct InstanceSummaryResponse {
    pub instance_id: String,
    pub workflow: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
}

#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub instance_id: String,
    pub sequence: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

// -- Handlers --

/// POST /instances — start an instance and drive it to a terminal status.
#[tracing::instrument(skip(state, req))]
pub async fn start<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Json(req): Json<StartInstanceRequest>,
) -> Result<(StatusCode, Json<InstanceFinishedResponse>), ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let (instance_id, status) = state
        .engine
        .start_and_run(&req.workflow, req.version, req.context)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InstanceFinishedResponse {
            instance_id: instance_id.to_string(),
            status: status.to_string(),
        }),
    ))
}

/// GET /instances/:id — current state with the full step ledger.
#[tracing::instrument(skip(state))]
pub async fn get<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id): Path<String>,
) -> Result<Json<InstanceResponse>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let instance_id = parse_instance_id(&id)?;
    let instance = state.engine.repository().load_state(instance_id).await?;

    // Definition step names minus succeeded ones, in execution order.
    // Empty when the definition is no longer registered in this process.
    let pending_steps: Vec<String> = instance
        .workflow()
        .and_then(|w| state.engine.registry().get(&w.name, w.version).ok())
        .map(|definition| {
            definition
                .topological_order()
                .into_iter()
                .filter(|step| !instance.step_succeeded(step))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let ledger: Vec<LedgerEntryResponse> = instance
        .ledger()
        .iter()
        .map(|record| LedgerEntryResponse {
            step: record.step.clone(),
            attempt: record.attempt,
            outcome: format!("{:?}", record.outcome),
            error: record.error.clone(),
            compensation: format!("{:?}", record.compensation),
        })
        .collect();

    Ok(Json(InstanceResponse {
        id: instance_id.to_string(),
        workflow: instance
            .workflow()
            .map(|w| w.to_string())
            .unwrap_or_default(),
        status: instance.status().to_string(),
        completed_steps: instance
            .succeeded_steps()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        pending_steps,
        failure_reason: instance.failure_reason().map(String::from),
        ledger,
        context: instance.context().clone(),
    }))
}

/// GET /instances — list instances, optionally filtered by `?status=`.
#[tracing::instrument(skip(state))]
pub async fn list<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<InstanceSummaryResponse>>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let filter = params
        .status
        .as_deref()
        .map(InstanceStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let summaries = state.engine.repository().list_by_status(filter).await?;

    Ok(Json(
        summaries
            .into_iter()
            .map(|s| InstanceSummaryResponse {
                instance_id: s.instance_id.to_string(),
                workflow: s.workflow.map(|w| w.to_string()),
                status: s.status.to_string(),
                failure_reason: s.failure_reason,
            })
            .collect(),
    ))
}

/// GET /instances/:id/events — raw event log for audit.
#[tracing::instrument(skip(state))]
pub async fn events<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let instance_id = parse_instance_id(&id)?;
    let envelopes = state.engine.repository().events(instance_id).await?;

    let responses: Vec<EventEnvelopeResponse> = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            instance_id: e.instance_id.to_string(),
            sequence: e.sequence.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

/// POST /instances/:id/compensate — abandon forward execution and unwind.
#[tracing::instrument(skip(state, req))]
pub async fn compensate<S, R>(
    State(state): State<Arc<AppState<S, R>>>,
    Path(id): Path<String>,
    req: Option<Json<CompensateRequest>>,
) -> Result<Json<InstanceFinishedResponse>, ApiError>
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let instance_id = parse_instance_id(&id)?;
    let reason = req
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "operator request".to_string());

    let status = state.engine.force_compensate(instance_id, reason).await?;

    Ok(Json(InstanceFinishedResponse {
        instance_id: instance_id.to_string(),
        status: status.to_string(),
    }))
}

fn parse_instance_id(id: &str) -> Result<InstanceId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(InstanceId::from_uuid(uuid))
}
