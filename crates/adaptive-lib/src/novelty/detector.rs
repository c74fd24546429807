//! Per-(sensor, attribute) novelty scoring
//!
//! Maintains Welford statistics per measurement stream and converts
//! z-scores into a sigmoid novelty score. Anomalies past the threshold
//! publish a debounced event on the bus so the transport can boost
//! delivery for the affected key.

use super::welford::OnlineStats;
use crate::bus::{BusEvent, EventBus, Topic};
use crate::models::{LifecycleEvent, Measurement};
use crate::observability::ControlMetrics;
use crate::registry::SensorRegistry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default z-score threshold (3 sigma).
const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Minimum samples before an anomaly event may fire.
const DEFAULT_MIN_SAMPLES: u64 = 10;

/// Base refractory window between anomaly events for one key.
const DEFAULT_DEBOUNCE_MS: i64 = 10_000;

/// Extra refractory time per sigma above the threshold.
const EXTENSION_PER_SIGMA_MS: i64 = 5_000;

/// Cap on the sigma excess counted toward the extension (+50 s total).
const MAX_EXTENSION_SIGMA: f64 = 10.0;

/// How often stale entries are swept.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Mailbox capacity for fire-and-forget reports.
const MAILBOX_CAPACITY: usize = 256;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Key identifying one measurement stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorKey {
    pub sensor_id: String,
    pub attribute_id: String,
}

impl SensorKey {
    pub fn new(sensor_id: impl Into<String>, attribute_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            attribute_id: attribute_id.into(),
        }
    }
}

/// An anomaly that crossed the firing conditions.
#[derive(Debug, Clone)]
pub struct AnomalyEvent {
    pub sensor_id: String,
    pub attribute_id: String,
    pub z_score: f64,
    pub score: f64,
    /// Suggested delivery-boost window; also the refractory window.
    pub boost_duration_ms: i64,
}

/// Tunables for the novelty detector.
#[derive(Debug, Clone)]
pub struct NoveltyConfig {
    pub z_threshold: f64,
    pub min_samples: u64,
    pub debounce_ms: i64,
    pub sweep_interval: Duration,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            z_threshold: DEFAULT_Z_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    stats: OnlineStats,
    score: f64,
    /// Earliest timestamp at which the next anomaly may fire.
    debounce_until: Option<i64>,
}

/// Outcome of folding one batch into a key's statistics.
#[derive(Debug)]
pub struct BatchOutcome {
    pub score: f64,
    pub event: Option<AnomalyEvent>,
}

/// Pure scoring state, exclusively owned by the actor task.
#[derive(Debug)]
pub struct NoveltyCore {
    z_threshold: f64,
    min_samples: u64,
    debounce_ms: i64,
    entries: HashMap<SensorKey, KeyState>,
}

impl NoveltyCore {
    pub fn new(config: &NoveltyConfig) -> Self {
        Self {
            z_threshold: config.z_threshold,
            min_samples: config.min_samples,
            debounce_ms: config.debounce_ms,
            entries: HashMap::new(),
        }
    }

    /// Fold a batch of readings into one key and evaluate firing rules.
    ///
    /// Each value is judged against the pre-update distribution; the
    /// batch score derives from the largest z observed in it.
    pub fn observe_batch(
        &mut self,
        sensor_id: &str,
        attribute_id: &str,
        values: &[f64],
        now_ms: i64,
    ) -> BatchOutcome {
        let key = SensorKey::new(sensor_id, attribute_id);
        let state = self.entries.entry(key).or_default();

        if values.is_empty() {
            return BatchOutcome {
                score: state.score,
                event: None,
            };
        }

        let mut max_z = f64::NEG_INFINITY;
        for value in values {
            let z = state.stats.observe(*value);
            if z > max_z {
                max_z = z;
            }
        }

        let score = sigmoid(max_z - self.z_threshold);
        state.score = score;

        let mut event = None;
        if max_z > self.z_threshold && state.stats.count() >= self.min_samples {
            let clear = state.debounce_until.map_or(true, |until| now_ms >= until);
            if clear {
                let excess = (max_z - self.z_threshold).min(MAX_EXTENSION_SIGMA);
                let window = self.debounce_ms + (excess * EXTENSION_PER_SIGMA_MS as f64) as i64;
                state.debounce_until = Some(now_ms + window);
                event = Some(AnomalyEvent {
                    sensor_id: sensor_id.to_string(),
                    attribute_id: attribute_id.to_string(),
                    z_score: max_z,
                    score,
                    boost_duration_ms: window,
                });
            }
        }

        BatchOutcome { score, event }
    }

    /// Current score for a key, if it has ever been observed.
    pub fn score(&self, sensor_id: &str, attribute_id: &str) -> Option<f64> {
        self.entries
            .get(&SensorKey::new(sensor_id, attribute_id))
            .map(|s| s.score)
    }

    /// Drop all entries belonging to one sensor.
    pub fn remove_sensor(&mut self, sensor_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.sensor_id != sensor_id);
        before - self.entries.len()
    }

    /// Drop entries whose owning sensor is no longer alive.
    pub fn retain_alive(&mut self, is_alive: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| is_alive(&key.sensor_id));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum NoveltyCommand {
    Report {
        sensor_id: String,
        attribute_id: String,
        values: Vec<f64>,
        timestamp_ms: i64,
    },
}

/// Read/write handle shared with collaborators. Cheap to clone.
#[derive(Clone)]
pub struct NoveltyHandle {
    tx: mpsc::Sender<NoveltyCommand>,
    snapshot: Arc<DashMap<SensorKey, f64>>,
}

impl NoveltyHandle {
    /// Fire-and-forget batch report. Dropped with a warning if the
    /// detector's mailbox is full.
    pub fn report_batch(&self, sensor_id: &str, attribute_id: &str, values: Vec<f64>) {
        let cmd = NoveltyCommand::Report {
            sensor_id: sensor_id.to_string(),
            attribute_id: attribute_id.to_string(),
            values,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        if self.tx.try_send(cmd).is_err() {
            warn!(sensor_id, "Novelty mailbox full, dropping batch");
        }
    }

    /// Score for a key, `None` until the key has been observed.
    pub fn score(&self, sensor_id: &str, attribute_id: &str) -> Option<f64> {
        self.snapshot
            .get(&SensorKey::new(sensor_id, attribute_id))
            .map(|r| *r.value())
    }

    /// Neutral-default form of [`score`](Self::score): 0.0 for unknown keys.
    pub fn get_novelty_score(&self, sensor_id: &str, attribute_id: &str) -> f64 {
        self.score(sensor_id, attribute_id).unwrap_or(0.0)
    }

    /// Highest score across all attributes of one sensor (wildcard query
    /// used by the arbiter's priority blend).
    pub fn max_for_sensor(&self, sensor_id: &str) -> Option<f64> {
        self.snapshot
            .iter()
            .filter(|r| r.key().sensor_id == sensor_id)
            .map(|r| *r.value())
            .max_by(f64::total_cmp)
    }

    /// Number of tracked (sensor, attribute) keys.
    pub fn tracked_keys(&self) -> usize {
        self.snapshot.len()
    }
}

/// Novelty detector actor. Single writer over its core and snapshot.
pub struct NoveltyDetector {
    core: NoveltyCore,
    snapshot: Arc<DashMap<SensorKey, f64>>,
    registry: Arc<SensorRegistry>,
    bus: EventBus,
    rx: mpsc::Receiver<NoveltyCommand>,
    sweep_interval: Duration,
    metrics: ControlMetrics,
}

impl NoveltyDetector {
    pub fn new(
        registry: Arc<SensorRegistry>,
        bus: EventBus,
        config: NoveltyConfig,
    ) -> (Self, NoveltyHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let snapshot = Arc::new(DashMap::new());

        let detector = Self {
            core: NoveltyCore::new(&config),
            snapshot: snapshot.clone(),
            registry,
            bus,
            rx,
            sweep_interval: config.sweep_interval,
            metrics: ControlMetrics::new(),
        };

        (detector, NoveltyHandle { tx, snapshot })
    }

    /// Run the detector until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            sweep_secs = self.sweep_interval.as_secs(),
            "Starting novelty detector"
        );

        let mut measurements = self.bus.subscribe(Topic::Measurements);
        let mut lifecycle = self.bus.subscribe(Topic::Lifecycle);
        let mut sweep = interval(self.sweep_interval);

        loop {
            tokio::select! {
                Some(cmd) = self.rx.recv() => {
                    let NoveltyCommand::Report { sensor_id, attribute_id, values, timestamp_ms } = cmd;
                    self.apply_batch(&sensor_id, &attribute_id, &values, timestamp_ms);
                }
                event = measurements.recv() => match event {
                    Ok(BusEvent::Measurements(batch)) => self.apply_measurements(batch),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Novelty detector lagged behind measurement stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                event = lifecycle.recv() => {
                    if let Ok(BusEvent::Lifecycle(LifecycleEvent::Unregistered { sensor_id })) = event {
                        self.remove_sensor(&sensor_id);
                    }
                }
                _ = sweep.tick() => self.sweep(),
                _ = shutdown.recv() => {
                    info!("Shutting down novelty detector");
                    break;
                }
            }
        }
    }

    /// Group a measurement batch by key and fold each group in.
    fn apply_measurements(&mut self, batch: Vec<Measurement>) {
        let mut grouped: HashMap<(String, String), (Vec<f64>, i64)> = HashMap::new();
        for measurement in &batch {
            // Non-numeric payloads are dropped silently
            let Some(value) = measurement.numeric_value() else {
                continue;
            };
            let entry = grouped
                .entry((
                    measurement.sensor_id.clone(),
                    measurement.attribute_id.clone(),
                ))
                .or_insert((Vec::new(), measurement.timestamp));
            entry.0.push(value);
            entry.1 = entry.1.max(measurement.timestamp);
        }

        for ((sensor_id, attribute_id), (values, timestamp)) in grouped {
            self.apply_batch(&sensor_id, &attribute_id, &values, timestamp);
        }
    }

    fn apply_batch(&mut self, sensor_id: &str, attribute_id: &str, values: &[f64], now_ms: i64) {
        let outcome = self.core.observe_batch(sensor_id, attribute_id, values, now_ms);
        self.snapshot
            .insert(SensorKey::new(sensor_id, attribute_id), outcome.score);

        if let Some(event) = outcome.event {
            debug!(
                sensor_id = %event.sensor_id,
                attribute_id = %event.attribute_id,
                z_score = event.z_score,
                "Novelty event fired"
            );
            self.metrics.inc_anomalies_detected();
            self.bus.publish(
                Topic::Novelty,
                BusEvent::NoveltyDetected {
                    sensor_id: event.sensor_id,
                    attribute_id: event.attribute_id,
                    z_score: event.z_score,
                    score: event.score,
                    boost_duration_ms: event.boost_duration_ms,
                },
            );
        }

        self.metrics.set_novelty_keys(self.snapshot.len() as i64);
    }

    fn remove_sensor(&mut self, sensor_id: &str) {
        let removed = self.core.remove_sensor(sensor_id);
        self.snapshot.retain(|key, _| key.sensor_id != sensor_id);
        if removed > 0 {
            debug!(sensor_id, removed, "Dropped novelty entries for unregistered sensor");
        }
    }

    fn sweep(&mut self) {
        let removed = self.core.retain_alive(|id| self.registry.is_alive(id));
        self.snapshot
            .retain(|key, _| self.registry.is_alive(&key.sensor_id));
        if removed > 0 {
            debug!(removed, "Novelty sweep removed stale entries");
        }
        self.metrics.set_novelty_keys(self.snapshot.len() as i64);
    }
}
