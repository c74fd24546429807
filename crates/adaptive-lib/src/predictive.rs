//! Predictive pre-boosting from learned attention patterns
//!
//! Keeps a rolling 14-day history of attention observations, learns a
//! per-sensor hour-of-day profile, and predicts near-future spikes and
//! troughs. Sensors about to be watched get a pre-boost factor below 1.0;
//! sensors whose peak hour is fading get a gentle slowdown above 1.0.
//! Sensors with no prediction of their own can inherit a weaker
//! sympathetic boost from correlated peers.

use crate::bus::{BusEvent, EventBus, Topic};
use crate::correlation::CorrelationHandle;
use crate::models::{AttentionLevel, LifecycleEvent};
use crate::novelty::OnlineStats;
use crate::observability::ControlMetrics;
use crate::registry::SensorRegistry;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Attention history retention (14 days).
const RETENTION_MS: i64 = 14 * 24 * 3600 * 1000;

/// How often hourly patterns are re-learned.
const DEFAULT_LEARN_INTERVAL: Duration = Duration::from_secs(3600);

/// How often predictions are refreshed.
const DEFAULT_PREDICT_INTERVAL: Duration = Duration::from_secs(60);

/// Samples at which bucket confidence saturates.
const CONFIDENCE_SATURATION: f64 = 50.0;

/// Variance weight in the confidence discount.
const CONFIDENCE_VARIANCE_WEIGHT: f64 = 10.0;

/// Mean attention delta between adjacent hours that signals a transition.
const DELTA_GATE: f64 = 0.3;

/// Minimum bucket confidence for a prediction to act.
const CONFIDENCE_GATE: f64 = 0.6;

/// Ramp window on both sides of an hour boundary.
const WINDOW_SECS: f64 = 600.0;

/// Pre-boost factor shape: 0.95 easing down to 0.75 at the boundary.
const PRE_BOOST_BASE: f64 = 0.95;
const PRE_BOOST_DEPTH: f64 = 0.2;
const PRE_BOOST_MIN: f64 = 0.75;

/// Post-peak factor shape: 1.0 ramping up to 1.2.
const POST_PEAK_DEPTH: f64 = 0.2;
const POST_PEAK_MAX: f64 = 1.2;

/// Sympathetic boosts are scaled by strength and halved, floored at 0.9.
const SYMPATHY_WEIGHT: f64 = 0.5;
const SYMPATHY_FLOOR: f64 = 0.9;

const MAILBOX_CAPACITY: usize = 256;

/// One learned hour-of-day bucket for a sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct HourBucket {
    pub mean: f64,
    pub variance: f64,
    pub count: usize,
    /// Grows with sample count, shrinks with variance; in [0, 1].
    pub confidence: f64,
}

/// An active prediction for a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prediction {
    /// Attention is expected to spike next hour.
    PreBoost { seconds_until: f64 },
    /// The sensor's peak hour is fading.
    PostPeak { seconds_since: f64 },
}

/// Tunables for the predictive balancer.
#[derive(Debug, Clone)]
pub struct PredictiveConfig {
    pub learn_interval: Duration,
    pub predict_interval: Duration,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            learn_interval: DEFAULT_LEARN_INTERVAL,
            predict_interval: DEFAULT_PREDICT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
struct AttentionEvent {
    sensor_id: String,
    timestamp_ms: i64,
    score: f64,
}

fn hour_of(timestamp_ms: i64) -> usize {
    use chrono::Timelike;
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.hour() as usize)
        .unwrap_or(0)
}

fn seconds_into_hour(timestamp_ms: i64) -> f64 {
    ((timestamp_ms / 1000) % 3600) as f64
}

/// Convert a prediction into a delivery factor.
pub fn prediction_factor(prediction: Prediction) -> f64 {
    match prediction {
        Prediction::PreBoost { seconds_until } => {
            let ramp = 1.0 - seconds_until / WINDOW_SECS;
            (PRE_BOOST_BASE - ramp * PRE_BOOST_DEPTH).clamp(PRE_BOOST_MIN, PRE_BOOST_BASE)
        }
        Prediction::PostPeak { seconds_since } => {
            let ramp = (seconds_since / WINDOW_SECS).min(1.0);
            (1.0 + ramp * POST_PEAK_DEPTH).clamp(1.0, POST_PEAK_MAX)
        }
    }
}

/// Weaker factor inherited from a correlated peer's pre-boost.
pub fn sympathetic_factor(peer_factor: f64, strength: f64) -> f64 {
    (1.0 - (1.0 - peer_factor) * strength * SYMPATHY_WEIGHT).max(SYMPATHY_FLOOR)
}

/// Pure pattern/prediction state, exclusively owned by the actor task.
#[derive(Debug, Default)]
pub struct PredictiveCore {
    events: VecDeque<AttentionEvent>,
    patterns: HashMap<String, [HourBucket; 24]>,
}

impl PredictiveCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attention observation.
    pub fn record(&mut self, sensor_id: &str, level: AttentionLevel, timestamp_ms: i64) {
        self.events.push_back(AttentionEvent {
            sensor_id: sensor_id.to_string(),
            timestamp_ms,
            score: level.score(),
        });
    }

    /// Drop events older than the retention window.
    pub fn prune(&mut self, now_ms: i64) -> usize {
        let cutoff = now_ms - RETENTION_MS;
        let before = self.events.len();
        while let Some(front) = self.events.front() {
            if front.timestamp_ms < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
        before - self.events.len()
    }

    /// Re-learn hourly patterns from the retained history.
    pub fn learn(&mut self, now_ms: i64) {
        self.prune(now_ms);

        let mut stats: HashMap<String, [OnlineStats; 24]> = HashMap::new();
        for event in &self.events {
            let buckets = stats
                .entry(event.sensor_id.clone())
                .or_insert_with(|| std::array::from_fn(|_| OnlineStats::new()));
            buckets[hour_of(event.timestamp_ms)].observe(event.score);
        }

        self.patterns = stats
            .into_iter()
            .map(|(sensor_id, buckets)| {
                let learned = std::array::from_fn(|hour| {
                    let s = &buckets[hour];
                    let count = s.count() as usize;
                    let variance = s.variance();
                    let confidence = (count as f64 / CONFIDENCE_SATURATION).min(1.0)
                        / (1.0 + CONFIDENCE_VARIANCE_WEIGHT * variance);
                    HourBucket {
                        mean: s.mean(),
                        variance,
                        count,
                        confidence,
                    }
                });
                (sensor_id, learned)
            })
            .collect();
    }

    /// Evaluate the transition gates for one sensor at a point in time.
    pub fn predict(&self, sensor_id: &str, now_ms: i64) -> Option<Prediction> {
        let buckets = self.patterns.get(sensor_id)?;
        let hour = hour_of(now_ms);
        let current = buckets[hour];
        let next = buckets[(hour + 1) % 24];

        let confidence = current.confidence.min(next.confidence);
        if confidence < CONFIDENCE_GATE {
            return None;
        }

        if next.mean > current.mean + DELTA_GATE {
            Some(Prediction::PreBoost {
                seconds_until: 3600.0 - seconds_into_hour(now_ms),
            })
        } else if current.mean > next.mean + DELTA_GATE {
            Some(Prediction::PostPeak {
                seconds_since: seconds_into_hour(now_ms),
            })
        } else {
            None
        }
    }

    /// Sensors with a learned pattern.
    pub fn pattern_sensors(&self) -> Vec<String> {
        self.patterns.keys().cloned().collect()
    }

    pub fn bucket(&self, sensor_id: &str, hour: usize) -> Option<HourBucket> {
        self.patterns.get(sensor_id).map(|b| b[hour % 24])
    }

    /// Drop all state belonging to one sensor.
    pub fn remove_sensor(&mut self, sensor_id: &str) {
        self.events.retain(|e| e.sensor_id != sensor_id);
        self.patterns.remove(sensor_id);
    }

    /// Drop state for sensors that are no longer alive.
    pub fn retain_alive(&mut self, is_alive: impl Fn(&str) -> bool) {
        self.events.retain(|e| is_alive(&e.sensor_id));
        self.patterns.retain(|id, _| is_alive(id));
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

enum PredictiveCommand {
    Record {
        sensor_id: String,
        level: AttentionLevel,
        timestamp_ms: i64,
    },
}

/// Read/write handle shared with collaborators. Cheap to clone.
#[derive(Clone)]
pub struct PredictiveHandle {
    tx: mpsc::Sender<PredictiveCommand>,
    snapshot: Arc<DashMap<String, f64>>,
}

impl PredictiveHandle {
    /// Fire-and-forget attention observation.
    pub fn record_attention(&self, sensor_id: &str, level: AttentionLevel) {
        let cmd = PredictiveCommand::Record {
            sensor_id: sensor_id.to_string(),
            level,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        if self.tx.try_send(cmd).is_err() {
            warn!(sensor_id, "Predictive mailbox full, dropping attention event");
        }
    }

    /// Factor for a sensor, `None` while no prediction is active.
    pub fn factor(&self, sensor_id: &str) -> Option<f64> {
        self.snapshot.get(sensor_id).map(|r| *r.value())
    }

    /// Neutral-default form of [`factor`](Self::factor): 1.0.
    /// Below 1.0 is a pre-boost, above 1.0 a post-peak slowdown.
    pub fn get_predictive_factor(&self, sensor_id: &str) -> f64 {
        self.factor(sensor_id).unwrap_or(1.0)
    }

    /// Number of sensors with an active prediction or sympathetic factor.
    pub fn active_predictions(&self) -> usize {
        self.snapshot.len()
    }
}

/// Predictive balancer actor. Single writer over its core and snapshot.
pub struct PredictiveLoadBalancer {
    core: PredictiveCore,
    snapshot: Arc<DashMap<String, f64>>,
    registry: Arc<SensorRegistry>,
    correlation: CorrelationHandle,
    bus: EventBus,
    rx: mpsc::Receiver<PredictiveCommand>,
    config: PredictiveConfig,
    metrics: ControlMetrics,
}

impl PredictiveLoadBalancer {
    pub fn new(
        registry: Arc<SensorRegistry>,
        correlation: CorrelationHandle,
        bus: EventBus,
        config: PredictiveConfig,
    ) -> (Self, PredictiveHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let snapshot = Arc::new(DashMap::new());

        let balancer = Self {
            core: PredictiveCore::new(),
            snapshot: snapshot.clone(),
            registry,
            correlation,
            bus,
            rx,
            config,
            metrics: ControlMetrics::new(),
        };

        (balancer, PredictiveHandle { tx, snapshot })
    }

    /// Run the balancer until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            learn_secs = self.config.learn_interval.as_secs(),
            predict_secs = self.config.predict_interval.as_secs(),
            "Starting predictive load balancer"
        );

        let mut lifecycle = self.bus.subscribe(Topic::Lifecycle);
        let mut learn = interval(self.config.learn_interval);
        learn.tick().await; // skip the immediate first tick
        let mut predict = interval(self.config.predict_interval);

        loop {
            tokio::select! {
                Some(cmd) = self.rx.recv() => {
                    let PredictiveCommand::Record { sensor_id, level, timestamp_ms } = cmd;
                    self.core.record(&sensor_id, level, timestamp_ms);
                }
                event = lifecycle.recv() => {
                    if let Ok(BusEvent::Lifecycle(LifecycleEvent::Unregistered { sensor_id })) = event {
                        self.core.remove_sensor(&sensor_id);
                        self.snapshot.remove(&sensor_id);
                    }
                }
                _ = learn.tick() => {
                    let now_ms = Utc::now().timestamp_millis();
                    self.core.retain_alive(|id| self.registry.is_alive(id));
                    self.core.learn(now_ms);
                    debug!(
                        events = self.core.event_count(),
                        sensors = self.core.pattern_sensors().len(),
                        "Attention patterns re-learned"
                    );
                }
                _ = predict.tick() => self.refresh_predictions(Utc::now().timestamp_millis()),
                _ = shutdown.recv() => {
                    info!("Shutting down predictive load balancer");
                    break;
                }
            }
        }
    }

    /// Recompute the factor snapshot: own predictions first, then
    /// sympathetic factors for sensors left without one.
    fn refresh_predictions(&mut self, now_ms: i64) {
        let mut own: HashMap<String, f64> = HashMap::new();
        for sensor_id in self.core.pattern_sensors() {
            if let Some(prediction) = self.core.predict(&sensor_id, now_ms) {
                own.insert(sensor_id, prediction_factor(prediction));
            }
        }

        let mut candidates: HashSet<String> = self.registry.list().into_iter().collect();
        candidates.extend(self.core.pattern_sensors());

        let mut factors: HashMap<String, f64> = own.clone();
        for sensor_id in candidates {
            if factors.contains_key(&sensor_id) {
                continue;
            }
            // No prediction of its own: inherit the strongest eligible
            // pre-boost from correlated peers, weakened by strength.
            let mut best: Option<f64> = None;
            for (peer, strength) in self.correlation.get_correlated(&sensor_id) {
                if let Some(&peer_factor) = own.get(&peer) {
                    if peer_factor < 1.0 {
                        let factor = sympathetic_factor(peer_factor, strength);
                        best = Some(best.map_or(factor, |b: f64| b.min(factor)));
                    }
                }
            }
            if let Some(factor) = best {
                factors.insert(sensor_id, factor);
            }
        }

        for (sensor_id, factor) in &factors {
            self.snapshot.insert(sensor_id.clone(), *factor);
        }
        self.snapshot.retain(|id, _| factors.contains_key(id));
        self.metrics.set_predictions_active(self.snapshot.len() as i64);
    }
}
