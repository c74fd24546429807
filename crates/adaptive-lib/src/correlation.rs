//! Pairwise sensor co-access correlation
//!
//! Hebbian-style: sensors viewed together strengthen their association,
//! and associations decay geometrically without reinforcement. Strengths
//! feed the predictive balancer's sympathetic boosts.

use crate::bus::{BusEvent, EventBus, Topic};
use crate::models::LifecycleEvent;
use crate::observability::ControlMetrics;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Fraction of the remaining headroom gained per co-access.
const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Strength ceiling; approached asymptotically, never reached.
const MAX_STRENGTH: f64 = 1.0;

/// Multiplier applied to every pair on each decay cycle.
const DEFAULT_DECAY_RATE: f64 = 0.95;

/// Pairs decaying below this are forgotten entirely.
const DEFAULT_MIN_STRENGTH: f64 = 0.05;

/// Minimum strength for a peer to appear in `get_correlated`.
const CORRELATED_THRESHOLD: f64 = 0.3;

/// How often the decay pass runs.
const DEFAULT_DECAY_INTERVAL: Duration = Duration::from_secs(3600);

const MAILBOX_CAPACITY: usize = 256;

/// Canonical unordered pair key: `a <= b` by construction, so lookups are
/// symmetric without a second probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    a: String,
    b: String,
}

impl PairKey {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// The peer of `sensor_id` in this pair, if the sensor is a member.
    pub fn peer_of(&self, sensor_id: &str) -> Option<&str> {
        if self.a == sensor_id {
            Some(&self.b)
        } else if self.b == sensor_id {
            Some(&self.a)
        } else {
            None
        }
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.a == sensor_id || self.b == sensor_id
    }
}

/// Tunables for the correlation tracker.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub learning_rate: f64,
    pub decay_rate: f64,
    pub min_strength: f64,
    pub decay_interval: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            decay_rate: DEFAULT_DECAY_RATE,
            min_strength: DEFAULT_MIN_STRENGTH,
            decay_interval: DEFAULT_DECAY_INTERVAL,
        }
    }
}

/// Pure pair-strength state, exclusively owned by the actor task.
#[derive(Debug)]
pub struct CorrelationCore {
    learning_rate: f64,
    decay_rate: f64,
    min_strength: f64,
    pairs: HashMap<PairKey, f64>,
}

impl CorrelationCore {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            decay_rate: config.decay_rate,
            min_strength: config.min_strength,
            pairs: HashMap::new(),
        }
    }

    /// Reinforce every unordered pair within a co-access group.
    pub fn record_co_access(&mut self, sensor_ids: &[String]) {
        for (i, x) in sensor_ids.iter().enumerate() {
            for y in &sensor_ids[i + 1..] {
                if x == y {
                    continue;
                }
                let key = PairKey::new(x.clone(), y.clone());
                let strength = self.pairs.entry(key).or_insert(0.0);
                *strength = MAX_STRENGTH.min(*strength + self.learning_rate * (MAX_STRENGTH - *strength));
            }
        }
    }

    /// Apply one decay cycle; returns the number of pairs pruned.
    pub fn decay(&mut self) -> usize {
        let before = self.pairs.len();
        let decay_rate = self.decay_rate;
        for strength in self.pairs.values_mut() {
            *strength *= decay_rate;
        }
        let min_strength = self.min_strength;
        self.pairs.retain(|_, s| *s >= min_strength);
        before - self.pairs.len()
    }

    pub fn strength(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs.get(&PairKey::new(a, b)).copied()
    }

    /// Drop every pair that includes `sensor_id`.
    pub fn remove_sensor(&mut self, sensor_id: &str) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|key, _| !key.contains(sensor_id));
        before - self.pairs.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&PairKey, f64)> {
        self.pairs.iter().map(|(k, v)| (k, *v))
    }
}

enum CorrelationCommand {
    CoAccess(Vec<String>),
}

/// Read/write handle shared with collaborators. Cheap to clone.
#[derive(Clone)]
pub struct CorrelationHandle {
    tx: mpsc::Sender<CorrelationCommand>,
    snapshot: Arc<DashMap<PairKey, f64>>,
}

impl CorrelationHandle {
    /// Record that a group of sensors was accessed together.
    /// Groups with fewer than two distinct ids are ignored.
    pub fn record_co_access(&self, sensor_ids: Vec<String>) {
        if sensor_ids.len() < 2 {
            return;
        }
        if self.tx.try_send(CorrelationCommand::CoAccess(sensor_ids)).is_err() {
            warn!("Correlation mailbox full, dropping co-access group");
        }
    }

    /// Pair strength, `None` until the pair has been observed.
    pub fn strength(&self, a: &str, b: &str) -> Option<f64> {
        self.snapshot.get(&PairKey::new(a, b)).map(|r| *r.value())
    }

    /// Neutral-default form of [`strength`](Self::strength): 0.0 unknown.
    pub fn get_strength(&self, a: &str, b: &str) -> f64 {
        self.strength(a, b).unwrap_or(0.0)
    }

    /// Peers of a sensor with strength >= 0.3, strongest first.
    pub fn get_correlated(&self, sensor_id: &str) -> Vec<(String, f64)> {
        let mut peers: Vec<(String, f64)> = self
            .snapshot
            .iter()
            .filter_map(|r| {
                let strength = *r.value();
                if strength < CORRELATED_THRESHOLD {
                    return None;
                }
                r.key()
                    .peer_of(sensor_id)
                    .map(|peer| (peer.to_string(), strength))
            })
            .collect();
        peers.sort_by(|x, y| y.1.total_cmp(&x.1));
        peers
    }

    /// Number of tracked pairs.
    pub fn pair_count(&self) -> usize {
        self.snapshot.len()
    }
}

/// Correlation tracker actor. Single writer over its core and snapshot.
pub struct CorrelationTracker {
    core: CorrelationCore,
    snapshot: Arc<DashMap<PairKey, f64>>,
    bus: EventBus,
    rx: mpsc::Receiver<CorrelationCommand>,
    decay_interval: Duration,
    metrics: ControlMetrics,
}

impl CorrelationTracker {
    pub fn new(bus: EventBus, config: CorrelationConfig) -> (Self, CorrelationHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let snapshot = Arc::new(DashMap::new());

        let tracker = Self {
            core: CorrelationCore::new(&config),
            snapshot: snapshot.clone(),
            bus,
            rx,
            decay_interval: config.decay_interval,
            metrics: ControlMetrics::new(),
        };

        (tracker, CorrelationHandle { tx, snapshot })
    }

    /// Run the tracker until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            decay_secs = self.decay_interval.as_secs(),
            "Starting correlation tracker"
        );

        let mut lifecycle = self.bus.subscribe(Topic::Lifecycle);
        let mut decay = interval(self.decay_interval);
        // The first interval tick fires immediately; skip it so fresh
        // pairs are not decayed at startup.
        decay.tick().await;

        loop {
            tokio::select! {
                Some(cmd) = self.rx.recv() => {
                    let CorrelationCommand::CoAccess(ids) = cmd;
                    self.core.record_co_access(&ids);
                    self.sync_snapshot();
                }
                event = lifecycle.recv() => {
                    if let Ok(BusEvent::Lifecycle(LifecycleEvent::Unregistered { sensor_id })) = event {
                        let removed = self.core.remove_sensor(&sensor_id);
                        if removed > 0 {
                            debug!(sensor_id = %sensor_id, removed, "Dropped correlation pairs");
                        }
                        self.sync_snapshot();
                    }
                }
                _ = decay.tick() => {
                    let pruned = self.core.decay();
                    if pruned > 0 {
                        debug!(pruned, "Correlation decay pruned weak pairs");
                    }
                    self.sync_snapshot();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down correlation tracker");
                    break;
                }
            }
        }
    }

    /// Mirror the core into the shared snapshot table.
    fn sync_snapshot(&self) {
        for (key, strength) in self.core.iter() {
            self.snapshot.insert(key.clone(), strength);
        }
        self.snapshot.retain(|key, _| self.core.pairs.contains_key(key));
        self.metrics.set_correlation_pairs(self.snapshot.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strength_symmetric() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        core.record_co_access(&ids(&["s1", "s2"]));

        assert_eq!(core.strength("s1", "s2"), core.strength("s2", "s1"));
    }

    #[test]
    fn test_repeated_reinforcement_approaches_one() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        for _ in 0..5 {
            core.record_co_access(&ids(&["s1", "s2"]));
        }

        let strength = core.strength("s1", "s2").unwrap();
        // 1 - 0.9^5
        assert!((strength - 0.40951).abs() < 1e-9);
        assert!(strength < 1.0);

        for _ in 0..1000 {
            core.record_co_access(&ids(&["s1", "s2"]));
        }
        let strength = core.strength("s1", "s2").unwrap();
        assert!(strength < 1.0, "strength never reaches the ceiling");
        assert!(strength > 0.999);
    }

    #[test]
    fn test_decay_is_geometric() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        for _ in 0..5 {
            core.record_co_access(&ids(&["s1", "s2"]));
        }
        let initial = core.strength("s1", "s2").unwrap();

        for _ in 0..10 {
            core.decay();
        }
        let decayed = core.strength("s1", "s2").unwrap();
        assert!((decayed - initial * 0.95_f64.powi(10)).abs() < 1e-12);
    }

    #[test]
    fn test_decay_prunes_below_min_strength() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        core.record_co_access(&ids(&["s1", "s2"]));
        // 0.1 * 0.95^n < 0.05 after 14 cycles
        for _ in 0..14 {
            core.decay();
        }
        assert_eq!(core.strength("s1", "s2"), None);
        assert!(core.is_empty());
    }

    #[test]
    fn test_group_reinforces_every_pair() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        core.record_co_access(&ids(&["s1", "s2", "s3"]));

        assert!(core.strength("s1", "s2").is_some());
        assert!(core.strength("s1", "s3").is_some());
        assert!(core.strength("s2", "s3").is_some());
        assert_eq!(core.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_do_not_self_pair() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        core.record_co_access(&ids(&["s1", "s1"]));
        assert!(core.is_empty());
    }

    #[test]
    fn test_remove_sensor() {
        let mut core = CorrelationCore::new(&CorrelationConfig::default());
        core.record_co_access(&ids(&["s1", "s2", "s3"]));

        assert_eq!(core.remove_sensor("s1"), 2);
        assert!(core.strength("s2", "s3").is_some());
    }

    #[tokio::test]
    async fn test_handle_get_correlated_filters_and_sorts() {
        let bus = EventBus::new();
        let (tracker, handle) = CorrelationTracker::new(bus, CorrelationConfig::default());

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(tracker.run(shutdown_tx.subscribe()));

        // s1-s2 reinforced five times (0.41), s1-s3 reinforced once (0.1)
        for _ in 0..5 {
            handle.record_co_access(ids(&["s1", "s2"]));
        }
        handle.record_co_access(ids(&["s1", "s3"]));

        let mut strength = None;
        for _ in 0..50 {
            strength = handle.strength("s1", "s2");
            if strength.map_or(false, |s| s > 0.4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(strength.unwrap() > 0.4);

        let correlated = handle.get_correlated("s1");
        // Only s2 clears the 0.3 co-view threshold
        assert_eq!(correlated.len(), 1);
        assert_eq!(correlated[0].0, "s2");
        assert!(correlated[0].1 >= CORRELATED_THRESHOLD);

        assert_eq!(handle.get_strength("s1", "ghost"), 0.0);
        assert!(handle.get_correlated("ghost").is_empty());

        let _ = shutdown_tx.send(());
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_handle_ignores_singleton_groups() {
        let bus = EventBus::new();
        let (tracker, handle) = CorrelationTracker::new(bus, CorrelationConfig::default());

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(tracker.run(shutdown_tx.subscribe()));

        handle.record_co_access(ids(&["s1"]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.pair_count(), 0);

        let _ = shutdown_tx.send(());
        let _ = task.await;
    }
}
