//! HTTP control and query surface for the saga orchestration engine.
//!
//! Exposes workflow definition registration, instance start and
//! inspection, and forced compensation, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use definition::{
    DefinitionRegistry, OperationRef, RetryPolicy, StepDefinition, WorkflowDefinition,
};
use engine::{Behavior, Engine, InMemoryServiceRouter, ServiceRouter};
use instance_store::{InMemoryInstanceStore, InstanceStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::instances::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, R>(state: Arc<AppState<S, R>>, metrics_handle: PrometheusHandle) -> Router
where
    S: InstanceStore + Clone + 'static,
    R: ServiceRouter + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/workflows", post(routes::workflows::register::<S, R>))
        .route("/workflows", get(routes::workflows::list::<S, R>))
        .route("/workflows/{name}/latest", get(routes::workflows::latest::<S, R>))
        .route("/workflows/{name}/{version}", get(routes::workflows::get::<S, R>))
        .route("/instances", post(routes::instances::start::<S, R>))
        .route("/instances", get(routes::instances::list::<S, R>))
        .route("/instances/{id}", get(routes::instances::get::<S, R>))
        .route("/instances/{id}/events", get(routes::instances::events::<S, R>))
        .route(
            "/instances/{id}/compensate",
            post(routes::instances::compensate::<S, R>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// State backed by the in-memory store and scripted service router.
pub type DefaultState = AppState<Arc<InMemoryInstanceStore>, InMemoryServiceRouter>;

/// Creates application state over an in-memory store with an empty
/// service router. The router handle is returned so behaviors can be
/// scripted after construction.
pub fn create_default_state() -> (Arc<DefaultState>, Arc<InMemoryServiceRouter>) {
    let store = Arc::new(InMemoryInstanceStore::new());
    let registry = Arc::new(DefinitionRegistry::new());
    let router = Arc::new(InMemoryServiceRouter::new());
    let engine = Engine::new(store, registry, Arc::clone(&router));

    (Arc::new(AppState { engine }), router)
}

/// Registers a demo `order_fulfillment` workflow and scripts its
/// operations on the in-memory router, standing in for real services.
pub async fn seed_demo_workflow(
    state: &DefaultState,
    router: &InMemoryServiceRouter,
) -> Result<(), definition::DefinitionError> {
    state.engine.registry().register(WorkflowDefinition::new(
        "order_fulfillment",
        1,
        vec![
            StepDefinition::new("reserve_inventory", "inventory", "reserve")
                .with_compensation("inventory", "release")
                .with_retry(RetryPolicy::new(3, Duration::from_millis(100), 2.0)),
            StepDefinition::new("process_payment", "payment", "charge")
                .depends_on("reserve_inventory")
                .with_compensation("payment", "refund")
                .with_retry(RetryPolicy::new(3, Duration::from_millis(100), 2.0)),
            StepDefinition::new("create_shipment", "shipping", "create")
                .depends_on("process_payment")
                .with_retry(RetryPolicy::none()),
        ],
    ))?;

    router
        .register(
            &OperationRef::new("inventory", "reserve"),
            Behavior::Succeed(serde_json::json!({"reservation_id": "RES-1"})),
        )
        .await;
    router
        .register(
            &OperationRef::new("inventory", "release"),
            Behavior::Succeed(serde_json::json!({})),
        )
        .await;
    router
        .register(
            &OperationRef::new("payment", "charge"),
            Behavior::Succeed(serde_json::json!({"payment_id": "PAY-1"})),
        )
        .await;
    router
        .register(
            &OperationRef::new("payment", "refund"),
            Behavior::Succeed(serde_json::json!({})),
        )
        .await;
    router
        .register(
            &OperationRef::new("shipping", "create"),
            Behavior::Succeed(serde_json::json!({"tracking_number": "TRK-1"})),
        )
        .await;

    Ok(())
}
