//! Adaptive Agent - node-local resource-control core
//!
//! Runs the six control loops of the adaptive backpressure core and
//! exposes their read-only knobs plus health and metrics over HTTP.

use adaptive_lib::{
    arbiter::{ArbiterConfig, ResourceArbiter},
    attention::FixedAttentionProvider,
    bus::EventBus,
    circadian::{CircadianConfig, CircadianScheduler},
    correlation::{CorrelationConfig, CorrelationTracker},
    health::{components, HealthRegistry},
    homeostat::{HomeostatConfig, HomeostaticTuner},
    novelty::{NoveltyConfig, NoveltyDetector},
    observability::ControlMetrics,
    predictive::{PredictiveConfig, PredictiveLoadBalancer},
    registry::SensorRegistry,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting adaptive-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    info!(node_name = %config.node_name, "Agent configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::NOVELTY).await;
    health_registry.register(components::CORRELATION).await;
    health_registry.register(components::CIRCADIAN).await;
    health_registry.register(components::HOMEOSTAT).await;
    health_registry.register(components::ARBITER).await;
    health_registry.register(components::PREDICTIVE).await;

    // Initialize global metrics
    let _metrics = ControlMetrics::new();

    // Shared infrastructure
    let bus = EventBus::new();
    let sensors = Arc::new(SensorRegistry::new());
    let attention_levels = Arc::new(FixedAttentionProvider::new());

    // Shutdown fan-out to every loop
    let (shutdown_tx, _) = broadcast::channel(1);

    // Leaf loops
    let (novelty_detector, novelty) = NoveltyDetector::new(
        sensors.clone(),
        bus.clone(),
        NoveltyConfig {
            sweep_interval: Duration::from_secs(config.novelty_sweep_secs),
            ..NoveltyConfig::default()
        },
    );
    let (correlation_tracker, correlation) = CorrelationTracker::new(
        bus.clone(),
        CorrelationConfig {
            decay_interval: Duration::from_secs(config.correlation_decay_secs),
            ..CorrelationConfig::default()
        },
    );
    let (circadian_scheduler, circadian) =
        CircadianScheduler::new(bus.clone(), CircadianConfig::default());
    let (homeostatic_tuner, homeostat) =
        HomeostaticTuner::new(bus.clone(), HomeostatConfig::default());

    // Dependent loops
    let (resource_arbiter, arbiter) = ResourceArbiter::new(
        sensors.clone(),
        novelty.clone(),
        attention_levels.clone(),
        ArbiterConfig {
            reallocation_interval: Duration::from_secs(config.reallocation_interval_secs),
        },
    );
    let (predictive_balancer, predictive) = PredictiveLoadBalancer::new(
        sensors.clone(),
        correlation.clone(),
        bus.clone(),
        PredictiveConfig::default(),
    );

    tokio::spawn(novelty_detector.run(shutdown_tx.subscribe()));
    tokio::spawn(correlation_tracker.run(shutdown_tx.subscribe()));
    tokio::spawn(circadian_scheduler.run(shutdown_tx.subscribe()));
    tokio::spawn(homeostatic_tuner.run(shutdown_tx.subscribe()));
    tokio::spawn(resource_arbiter.run(shutdown_tx.subscribe()));
    tokio::spawn(predictive_balancer.run(shutdown_tx.subscribe()));

    // Shared application state
    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        bus,
        sensors,
        attention_levels,
        novelty,
        correlation,
        circadian,
        homeostat,
        arbiter,
        predictive,
    });

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Start health, metrics and ingest server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    Ok(())
}
