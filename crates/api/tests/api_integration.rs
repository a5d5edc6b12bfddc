//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use definition::{OperationRef, RetryPolicy, StepDefinition, WorkflowDefinition};
use engine::{Behavior, InMemoryServiceRouter};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup() -> axum::Router {
    let (app, _, _) = setup_with_state().await;
    app
}

async fn setup_with_state() -> (
    axum::Router,
    Arc<api::DefaultState>,
    Arc<InMemoryServiceRouter>,
) {
    let (state, router) = api::create_default_state();
    api::seed_demo_workflow(&state, &router).await.unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state, router)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_and_fetch_workflow() {
    let app = setup().await;

    let definition = WorkflowDefinition::new(
        "refund_flow",
        1,
        vec![StepDefinition::new("refund", "payment", "refund")],
    );

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/workflows",
            &serde_json::to_value(&definition).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["name"], "refund_flow");
    assert_eq!(created["version"], 1);

    let response = app
        .clone()
        .oneshot(get_request("/workflows/refund_flow/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["name"], "refund_flow");
    assert_eq!(fetched["steps"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get_request("/workflows/refund_flow/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/workflows")).await.unwrap();
    let names = body_json(response).await;
    let names: Vec<String> = serde_json::from_value(names).unwrap();
    assert!(names.contains(&"refund_flow".to_string()));
    assert!(names.contains(&"order_fulfillment".to_string()));
}

#[tokio::test]
async fn test_register_duplicate_version_conflicts() {
    let app = setup().await;

    let definition = WorkflowDefinition::new(
        "dup_flow",
        1,
        vec![StepDefinition::new("only", "svc", "op")],
    );
    let body = serde_json::to_value(&definition).unwrap();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/workflows", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(json_request("POST", "/workflows", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_register_invalid_definition_rejected() {
    let app = setup().await;

    // Depends on a step that does not exist.
    let definition = WorkflowDefinition::new(
        "broken_flow",
        1,
        vec![StepDefinition::new("only", "svc", "op").depends_on("missing")],
    );

    let response = app
        .oneshot(json_request(
            "POST",
            "/workflows",
            &serde_json::to_value(&definition).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_workflow() {
    let app = setup().await;

    let response = app
        .oneshot(get_request("/workflows/nope/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_instance_runs_to_succeeded() {
    let app = setup().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/instances",
            &serde_json::json!({
                "workflow": "order_fulfillment",
                "context": { "order_id": "ORD-42" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let started = body_json(response).await;
    assert_eq!(started["status"], "Succeeded");
    let instance_id = started["instance_id"].as_str().unwrap().to_string();

    // Detail view: ledger, completed steps and merged context.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/instances/{instance_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "Succeeded");
    assert_eq!(detail["ledger"].as_array().unwrap().len(), 3);
    assert_eq!(
        detail["completed_steps"],
        serde_json::json!(["reserve_inventory", "process_payment", "create_shipment"])
    );
    assert_eq!(detail["pending_steps"], serde_json::json!([]));
    assert_eq!(detail["context"]["order_id"], "ORD-42");
    assert_eq!(
        detail["context"]["reserve_inventory.reservation_id"],
        "RES-1"
    );

    // Audit log view.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/instances/{instance_id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = body_json(response).await;
    let events = events.as_array().unwrap();
    assert_eq!(events[0]["event_type"], "InstanceStarted");
    assert_eq!(
        events.last().unwrap()["event_type"],
        "InstanceSucceeded"
    );

    // Status listing.
    let response = app
        .oneshot(get_request("/instances?status=succeeded"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["instance_id"], instance_id.as_str());
}

#[tokio::test]
async fn test_pending_steps_reported_for_failed_instance() {
    let (app, _, router) = setup_with_state().await;

    let definition = WorkflowDefinition::new(
        "doomed_flow",
        1,
        vec![
            StepDefinition::new("first", "svc", "one").with_retry(RetryPolicy::none()),
            StepDefinition::new("second", "svc", "two")
                .depends_on("first")
                .with_retry(RetryPolicy::none()),
            StepDefinition::new("third", "svc", "three")
                .depends_on("second")
                .with_retry(RetryPolicy::none()),
        ],
    );
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/workflows",
            &serde_json::to_value(&definition).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    router
        .register(
            &OperationRef::new("svc", "one"),
            Behavior::Succeed(serde_json::json!({})),
        )
        .await;
    router
        .register(&OperationRef::new("svc", "two"), Behavior::Fail("boom".into()))
        .await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/instances",
            &serde_json::json!({ "workflow": "doomed_flow" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let started = body_json(response).await;
    assert_eq!(started["status"], "Compensated");
    let instance_id = started["instance_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/instances/{instance_id}")))
        .await
        .unwrap();
    let detail = body_json(response).await;
    assert_eq!(detail["completed_steps"], serde_json::json!(["first"]));
    // "second" failed and "third" was never attempted.
    assert_eq!(detail["pending_steps"], serde_json::json!(["second", "third"]));
}

#[tokio::test]
async fn test_start_unknown_workflow() {
    let app = setup().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/instances",
            &serde_json::json!({ "workflow": "missing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_with_invalid_status_filter() {
    let app = setup().await;

    let response = app
        .oneshot(get_request("/instances?status=bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_nonexistent_instance() {
    let app = setup().await;
    let fake_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(get_request(&format!("/instances/{fake_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_instance_with_malformed_id() {
    let app = setup().await;

    let response = app
        .oneshot(get_request("/instances/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compensate_terminal_instance_conflicts() {
    let app = setup().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/instances",
            &serde_json::json!({ "workflow": "order_fulfillment" }),
        ))
        .await
        .unwrap();
    let started = body_json(response).await;
    assert_eq!(started["status"], "Succeeded");
    let instance_id = started["instance_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/instances/{instance_id}/compensate"),
            &serde_json::json!({ "reason": "too late" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
