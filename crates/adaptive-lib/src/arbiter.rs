//! Competitive resource allocation across active sensors
//!
//! Blends attention and novelty into a per-sensor priority, then converts
//! priorities into batch-window multipliers through a power-law share of
//! the priority mass. High-priority sensors disproportionately suppress
//! the resources available to the rest (lateral inhibition); the
//! multiplier range itself stays clamped.

use crate::attention::AttentionProvider;
use crate::models::AttentionLevel;
use crate::novelty::NoveltyHandle;
use crate::observability::ControlMetrics;
use crate::registry::SensorRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

/// How often multipliers are reallocated.
const DEFAULT_REALLOCATION_INTERVAL: Duration = Duration::from_secs(5);

/// Priority blend weights: attention, novelty, and a fixed base share.
const WEIGHT_ATTENTION: f64 = 0.5;
const WEIGHT_NOVELTY: f64 = 0.3;
const WEIGHT_BASE: f64 = 0.2;
const BASE_SCORE: f64 = 0.5;

/// Power-law exponent sharpening the winner-take-more effect.
const INHIBITION_EXPONENT: f64 = 1.3;

/// Floor applied to priorities before computing shares.
const MIN_PRIORITY: f64 = 0.01;

/// Multiplier bounds; lower means faster delivery (more resources).
const MULTIPLIER_MIN: f64 = 0.5;
const MULTIPLIER_MAX: f64 = 5.0;
const MULTIPLIER_RANGE: f64 = 4.5;

/// Tunables for the resource arbiter.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub reallocation_interval: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            reallocation_interval: DEFAULT_REALLOCATION_INTERVAL,
        }
    }
}

/// Convert per-sensor priorities into multipliers.
///
/// Each sensor's share of the total priority mass is raised to the
/// inhibition exponent; shares are deliberately not re-normalized
/// afterwards, the multiplier clamp bounds the output instead.
pub fn allocate(priorities: &[(String, f64)]) -> Vec<(String, f64)> {
    if priorities.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(String, f64)> = priorities
        .iter()
        .map(|(id, p)| (id.clone(), p.max(MIN_PRIORITY)))
        .collect();
    ranked.sort_by(|x, y| y.1.total_cmp(&x.1));

    let total: f64 = ranked.iter().map(|(_, p)| p).sum();

    ranked
        .into_iter()
        .map(|(id, priority)| {
            let fraction = (priority / total).powf(INHIBITION_EXPONENT);
            let multiplier =
                (MULTIPLIER_MAX - fraction * MULTIPLIER_RANGE).clamp(MULTIPLIER_MIN, MULTIPLIER_MAX);
            (id, multiplier)
        })
        .collect()
}

/// Read handle over the latest allocation. Cheap to clone.
#[derive(Clone)]
pub struct ArbiterHandle {
    snapshot: Arc<DashMap<String, f64>>,
}

impl ArbiterHandle {
    /// Multiplier for a sensor, `None` until its first allocation cycle.
    pub fn multiplier(&self, sensor_id: &str) -> Option<f64> {
        self.snapshot.get(sensor_id).map(|r| *r.value())
    }

    /// Neutral-default form of [`multiplier`](Self::multiplier): 1.0.
    pub fn get_multiplier(&self, sensor_id: &str) -> f64 {
        self.multiplier(sensor_id).unwrap_or(1.0)
    }

    /// Number of sensors in the latest allocation.
    pub fn allocated_count(&self) -> usize {
        self.snapshot.len()
    }
}

/// Resource arbiter actor. Pulls from its dependencies each cycle; no
/// write contract, so it has no mailbox.
pub struct ResourceArbiter {
    snapshot: Arc<DashMap<String, f64>>,
    registry: Arc<SensorRegistry>,
    novelty: NoveltyHandle,
    attention: Arc<dyn AttentionProvider>,
    reallocation_interval: Duration,
    metrics: ControlMetrics,
}

impl ResourceArbiter {
    pub fn new(
        registry: Arc<SensorRegistry>,
        novelty: NoveltyHandle,
        attention: Arc<dyn AttentionProvider>,
        config: ArbiterConfig,
    ) -> (Self, ArbiterHandle) {
        let snapshot = Arc::new(DashMap::new());

        let arbiter = Self {
            snapshot: snapshot.clone(),
            registry,
            novelty,
            attention,
            reallocation_interval: config.reallocation_interval,
            metrics: ControlMetrics::new(),
        };

        (arbiter, ArbiterHandle { snapshot })
    }

    /// Run the arbiter until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.reallocation_interval.as_secs(),
            "Starting resource arbiter"
        );

        let mut ticker = interval(self.reallocation_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = std::time::Instant::now();
                    self.reallocate().await;
                    self.metrics.observe_reallocation_latency(start.elapsed().as_secs_f64());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down resource arbiter");
                    break;
                }
            }
        }
    }

    /// One allocation cycle over all currently-registered sensors.
    async fn reallocate(&self) {
        let sensors = self.registry.list();
        let mut priorities = Vec::with_capacity(sensors.len());

        for sensor_id in sensors {
            let attention_score = match self.attention.attention_level(&sensor_id).await {
                Ok(level) => level.score(),
                // Provider failure reads as "unknown", never as an error
                Err(_) => AttentionLevel::UNKNOWN_SCORE,
            };
            let novelty_score = self.novelty.max_for_sensor(&sensor_id).unwrap_or(0.0);

            let priority = WEIGHT_ATTENTION * attention_score
                + WEIGHT_NOVELTY * novelty_score
                + WEIGHT_BASE * BASE_SCORE;
            priorities.push((sensor_id, priority));
        }

        let allocations = allocate(&priorities);
        for (sensor_id, multiplier) in &allocations {
            self.snapshot.insert(sensor_id.clone(), *multiplier);
        }
        // Drop allocations for sensors that disappeared this cycle
        self.snapshot.retain(|id, _| self.registry.is_alive(id));

        self.metrics.set_sensors_allocated(self.snapshot.len() as i64);
        debug!(sensors = allocations.len(), "Reallocation cycle complete");
    }
}
