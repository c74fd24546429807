//! Integration tests for the agent API endpoints and loop wiring

use adaptive_lib::{
    attention::FixedAttentionProvider,
    bus::{BusEvent, EventBus, Topic},
    health::{components, ComponentStatus, HealthRegistry},
    models::{AttentionLevel, LifecycleEvent, Measurement},
    novelty::{NoveltyConfig, NoveltyDetector},
    observability::ControlMetrics,
    registry::SensorRegistry,
};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControlMetrics,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::NOVELTY).await;
    health_registry.register(components::ARBITER).await;

    let metrics = ControlMetrics::new();
    let state = Arc::new(AppState {
        health_registry,
        metrics,
    });
    let router = create_test_router(state.clone());

    (router, state)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["novelty_detector"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::ARBITER, "Attention provider slow")
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::NOVELTY, "Learn cycle stalled")
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("adaptive_core_novelty_keys"));
    assert!(metrics_text.contains("adaptive_core_reallocation_latency_seconds"));
}

/// End-to-end wiring: measurements flowing over the bus surface as
/// novelty scores, and attention asymmetry surfaces as multiplier
/// asymmetry, without any read ever blocking or erroring.
#[tokio::test]
async fn test_control_loops_end_to_end() {
    use adaptive_lib::arbiter::{ArbiterConfig, ResourceArbiter};

    let bus = EventBus::new();
    let sensors = Arc::new(SensorRegistry::new());
    let attention = Arc::new(FixedAttentionProvider::new());

    sensors.apply(
        &LifecycleEvent::Registered {
            sensor_id: "watched".to_string(),
        },
        0,
    );
    sensors.apply(
        &LifecycleEvent::Registered {
            sensor_id: "idle".to_string(),
        },
        0,
    );
    attention.set("watched", AttentionLevel::High);
    attention.set("idle", AttentionLevel::None);

    let (detector, novelty) =
        NoveltyDetector::new(sensors.clone(), bus.clone(), NoveltyConfig::default());
    let (arbiter_actor, arbiter) = ResourceArbiter::new(
        sensors.clone(),
        novelty.clone(),
        attention,
        ArbiterConfig {
            reallocation_interval: Duration::from_millis(20),
        },
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let detector_task = tokio::spawn(detector.run(shutdown_tx.subscribe()));
    let arbiter_task = tokio::spawn(arbiter_actor.run(shutdown_tx.subscribe()));

    // Stream measurements for the watched sensor
    let batch: Vec<Measurement> = (0..30)
        .map(|i| Measurement {
            sensor_id: "watched".to_string(),
            attribute_id: "heart_rate".to_string(),
            payload: serde_json::json!({"value": 60.0 + (i % 7) as f64}),
            timestamp: i,
        })
        .collect();
    bus.publish(Topic::Measurements, BusEvent::Measurements(batch));

    // Both sensors receive an allocation within a few cycles
    let mut pair = None;
    for _ in 0..100 {
        if let (Some(w), Some(i)) = (arbiter.multiplier("watched"), arbiter.multiplier("idle")) {
            pair = Some((w, i));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (watched, idle) = pair.expect("allocation cycles should have run");
    assert!(watched < idle);

    // Novelty table warms up for the streamed key only
    let mut score = None;
    for _ in 0..100 {
        score = novelty.score("watched", "heart_rate");
        if score.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(score.is_some());
    assert_eq!(novelty.get_novelty_score("idle", "heart_rate"), 0.0);

    let _ = shutdown_tx.send(());
    let _ = detector_task.await;
    let _ = arbiter_task.await;
}
