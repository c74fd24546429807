//! HTTP API: health probes, Prometheus metrics, collaborator ingest,
//! and the combined read-only controls query

use adaptive_lib::{
    arbiter::ArbiterHandle,
    attention::FixedAttentionProvider,
    bus::{BusEvent, EventBus, Topic},
    circadian::{CircadianHandle, CircadianPhase},
    correlation::CorrelationHandle,
    health::{ComponentStatus, HealthRegistry},
    homeostat::{HomeostatHandle, ThresholdOffsets},
    models::{AttentionLevel, LifecycleEvent, LoadSample, Measurement, SystemLoadLevel},
    novelty::NoveltyHandle,
    predictive::PredictiveHandle,
    registry::SensorRegistry,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub bus: EventBus,
    pub sensors: Arc<SensorRegistry>,
    pub attention_levels: Arc<FixedAttentionProvider>,
    pub novelty: NoveltyHandle,
    pub correlation: CorrelationHandle,
    pub circadian: CircadianHandle,
    pub homeostat: HomeostatHandle,
    pub arbiter: ArbiterHandle,
    pub predictive: PredictiveHandle,
}

/// Combined read-only control view for one sensor.
///
/// The knobs are returned side by side; how they compose into a single
/// effective throttle is the caller's decision.
#[derive(Debug, Serialize)]
pub struct SensorControls {
    pub sensor_id: String,
    pub multiplier: f64,
    pub predictive_factor: f64,
    pub max_novelty: f64,
    pub phase: CircadianPhase,
    pub phase_adjustment: f64,
    pub offsets: ThresholdOffsets,
}

/// Attention observation from the realtime layer.
#[derive(Debug, Deserialize)]
pub struct AttentionReport {
    pub sensor_id: String,
    pub level: AttentionLevel,
    /// Sensors currently viewed together with this one.
    #[serde(default)]
    pub co_viewed: Vec<String>,
}

/// Load observation from the scheduler monitor.
#[derive(Debug, Deserialize)]
pub struct LoadReport {
    pub level: SystemLoadLevel,
    #[serde(default)]
    pub pressure: f64,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
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

/// Combined control knobs for one sensor, neutral defaults on miss
async fn sensor_controls(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
) -> impl IntoResponse {
    let controls = SensorControls {
        multiplier: state.arbiter.get_multiplier(&sensor_id),
        predictive_factor: state.predictive.get_predictive_factor(&sensor_id),
        max_novelty: state.novelty.max_for_sensor(&sensor_id).unwrap_or(0.0),
        phase: state.circadian.get_phase(),
        phase_adjustment: state.circadian.get_phase_adjustment(),
        offsets: state.homeostat.get_offsets(),
        sensor_id,
    };
    Json(controls)
}

/// Correlated peers of one sensor
async fn sensor_correlated(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
) -> impl IntoResponse {
    Json(state.correlation.get_correlated(&sensor_id))
}

/// Measurement batch ingest: fans out to the control loops via the bus
async fn ingest_measurements(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<Vec<Measurement>>,
) -> impl IntoResponse {
    state.bus.publish(Topic::Measurements, BusEvent::Measurements(batch));
    StatusCode::ACCEPTED
}

/// Sensor lifecycle ingest
async fn ingest_lifecycle(
    State(state): State<Arc<AppState>>,
    Json(event): Json<LifecycleEvent>,
) -> impl IntoResponse {
    state
        .sensors
        .apply(&event, chrono::Utc::now().timestamp_millis());
    state.bus.publish(Topic::Lifecycle, BusEvent::Lifecycle(event));
    StatusCode::ACCEPTED
}

/// Attention ingest: feeds the predictive balancer, the arbiter's
/// attention view, and (for co-view groups) the correlation tracker
async fn ingest_attention(
    State(state): State<Arc<AppState>>,
    Json(report): Json<AttentionReport>,
) -> impl IntoResponse {
    state.attention_levels.set(report.sensor_id.as_str(), report.level);
    state.predictive.record_attention(&report.sensor_id, report.level);

    if !report.co_viewed.is_empty() {
        let mut group = Vec::with_capacity(report.co_viewed.len() + 1);
        group.push(report.sensor_id);
        group.extend(report.co_viewed);
        state.correlation.record_co_access(group);
    }
    StatusCode::ACCEPTED
}

/// Load sample ingest
async fn ingest_load(
    State(state): State<Arc<AppState>>,
    Json(report): Json<LoadReport>,
) -> impl IntoResponse {
    state.bus.publish(
        Topic::Load,
        BusEvent::Load(LoadSample {
            level: report.level,
            pressure: report.pressure,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }),
    );
    StatusCode::ACCEPTED
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/sensors/:sensor_id/controls", get(sensor_controls))
        .route("/v1/sensors/:sensor_id/correlated", get(sensor_correlated))
        .route("/v1/measurements", post(ingest_measurements))
        .route("/v1/lifecycle", post(ingest_lifecycle))
        .route("/v1/attention", post(ingest_attention))
        .route("/v1/load", post(ingest_load))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
