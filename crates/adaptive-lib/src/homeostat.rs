//! Homeostatic tuning of load-classification thresholds
//!
//! Tracks how much time the node actually spends in each load level and
//! nudges per-level threshold offsets so the long-run distribution drifts
//! toward a fixed target. Offsets are subtractive corrections to the
//! pressure cutoffs: a negative offset raises the effective cutoff for a
//! level, pushing occupancy back toward "normal".

use crate::bus::{BusEvent, EventBus, Topic};
use crate::models::{LoadSample, SystemLoadLevel};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Rolling buffer capacity (one hour of 1 s samples).
const BUFFER_CAP: usize = 3600;

/// Minimum buffered samples before an adaptation pass runs.
const MIN_SAMPLES_FOR_ADAPTATION: usize = 100;

/// Fraction of the occupancy error folded into an offset per pass.
const ADAPTATION_RATE: f64 = 0.005;

/// Offsets are clamped to this magnitude.
const OFFSET_LIMIT: f64 = 0.1;

/// Target long-run time-in-state distribution.
const TARGET_NORMAL: f64 = 0.70;
const TARGET_ELEVATED: f64 = 0.20;
const TARGET_HIGH: f64 = 0.08;
const TARGET_CRITICAL: f64 = 0.02;

/// How often the adaptation pass runs.
const DEFAULT_ADAPT_INTERVAL: Duration = Duration::from_secs(3600);

const MAILBOX_CAPACITY: usize = 256;

/// Per-level threshold corrections, each in [-0.1, 0.1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdOffsets {
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

/// Tunables for the homeostatic tuner.
#[derive(Debug, Clone)]
pub struct HomeostatConfig {
    pub adapt_interval: Duration,
}

impl Default for HomeostatConfig {
    fn default() -> Self {
        Self {
            adapt_interval: DEFAULT_ADAPT_INTERVAL,
        }
    }
}

/// Pure adaptation state, exclusively owned by the actor task.
#[derive(Debug, Default)]
pub struct HomeostatCore {
    buffer: VecDeque<SystemLoadLevel>,
    offsets: ThresholdOffsets,
}

impl HomeostatCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one observed load label.
    pub fn record(&mut self, level: SystemLoadLevel) {
        if self.buffer.len() >= BUFFER_CAP {
            self.buffer.pop_front();
        }
        self.buffer.push_back(level);
    }

    /// Run one adaptation pass. Each non-normal level's offset moves
    /// opposite its occupancy error: over-occupied levels trend negative
    /// (effective cutoff rises), starved levels trend positive. Returns
    /// false when too few samples are buffered.
    pub fn adapt(&mut self) -> bool {
        if self.buffer.len() < MIN_SAMPLES_FOR_ADAPTATION {
            return false;
        }

        let total = self.buffer.len() as f64;
        let mut counts = [0usize; 4];
        for level in &self.buffer {
            let idx = match level {
                SystemLoadLevel::Normal => 0,
                SystemLoadLevel::Elevated => 1,
                SystemLoadLevel::High => 2,
                SystemLoadLevel::Critical => 3,
            };
            counts[idx] += 1;
        }

        let adjust = |offset: f64, actual: f64, target: f64| -> f64 {
            let error = actual - target;
            (offset - error * ADAPTATION_RATE).clamp(-OFFSET_LIMIT, OFFSET_LIMIT)
        };

        self.offsets.elevated = adjust(
            self.offsets.elevated,
            counts[1] as f64 / total,
            TARGET_ELEVATED,
        );
        self.offsets.high = adjust(self.offsets.high, counts[2] as f64 / total, TARGET_HIGH);
        self.offsets.critical = adjust(
            self.offsets.critical,
            counts[3] as f64 / total,
            TARGET_CRITICAL,
        );
        true
    }

    pub fn offsets(&self) -> ThresholdOffsets {
        self.offsets
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }
}

enum HomeostatCommand {
    Record(SystemLoadLevel),
}

/// Shared offset snapshot cells, written only by the actor.
#[derive(Debug)]
struct OffsetCell {
    elevated: AtomicU64,
    high: AtomicU64,
    critical: AtomicU64,
}

impl OffsetCell {
    fn new() -> Self {
        Self {
            elevated: AtomicU64::new(0.0f64.to_bits()),
            high: AtomicU64::new(0.0f64.to_bits()),
            critical: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    fn store(&self, offsets: ThresholdOffsets) {
        self.elevated.store(offsets.elevated.to_bits(), Ordering::Release);
        self.high.store(offsets.high.to_bits(), Ordering::Release);
        self.critical.store(offsets.critical.to_bits(), Ordering::Release);
    }

    fn load(&self) -> ThresholdOffsets {
        ThresholdOffsets {
            elevated: f64::from_bits(self.elevated.load(Ordering::Acquire)),
            high: f64::from_bits(self.high.load(Ordering::Acquire)),
            critical: f64::from_bits(self.critical.load(Ordering::Acquire)),
        }
    }
}

/// Read/write handle shared with collaborators. Cheap to clone.
#[derive(Clone)]
pub struct HomeostatHandle {
    tx: mpsc::Sender<HomeostatCommand>,
    cell: Arc<OffsetCell>,
}

impl HomeostatHandle {
    /// Fire-and-forget load label observation.
    pub fn record_sample(&self, level: SystemLoadLevel) {
        if self.tx.try_send(HomeostatCommand::Record(level)).is_err() {
            warn!("Homeostat mailbox full, dropping load sample");
        }
    }

    /// Current threshold offsets. All-zero until the first adaptation.
    pub fn get_offsets(&self) -> ThresholdOffsets {
        self.cell.load()
    }
}

/// Homeostatic tuner actor. Single writer over buffer and offset cells.
pub struct HomeostaticTuner {
    core: HomeostatCore,
    cell: Arc<OffsetCell>,
    bus: EventBus,
    rx: mpsc::Receiver<HomeostatCommand>,
    adapt_interval: Duration,
}

impl HomeostaticTuner {
    pub fn new(bus: EventBus, config: HomeostatConfig) -> (Self, HomeostatHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let cell = Arc::new(OffsetCell::new());

        let tuner = Self {
            core: HomeostatCore::new(),
            cell: cell.clone(),
            bus,
            rx,
            adapt_interval: config.adapt_interval,
        };

        (tuner, HomeostatHandle { tx, cell })
    }

    /// Run the tuner until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            adapt_secs = self.adapt_interval.as_secs(),
            "Starting homeostatic tuner"
        );

        let mut load_events = self.bus.subscribe(Topic::Load);
        let mut adapt = interval(self.adapt_interval);
        adapt.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                Some(cmd) = self.rx.recv() => {
                    let HomeostatCommand::Record(level) = cmd;
                    self.core.record(level);
                }
                event = load_events.recv() => {
                    if let Ok(BusEvent::Load(LoadSample { level, .. })) = event {
                        self.core.record(level);
                    }
                }
                _ = adapt.tick() => {
                    if self.core.adapt() {
                        let offsets = self.core.offsets();
                        self.cell.store(offsets);
                        debug!(
                            elevated = offsets.elevated,
                            high = offsets.high,
                            critical = offsets.critical,
                            "Threshold offsets adapted"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down homeostatic tuner");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(core: &mut HomeostatCore, level: SystemLoadLevel, count: usize) {
        for _ in 0..count {
            core.record(level);
        }
    }

    #[test]
    fn test_adapt_requires_min_samples() {
        let mut core = HomeostatCore::new();
        fill(&mut core, SystemLoadLevel::High, MIN_SAMPLES_FOR_ADAPTATION - 1);
        assert!(!core.adapt());
        assert_eq!(core.offsets(), ThresholdOffsets::default());
    }

    #[test]
    fn test_high_heavy_distribution_trends_offsets_negative() {
        let mut core = HomeostatCore::new();
        // 50% high / 20% critical - far above the 8% / 2% targets
        fill(&mut core, SystemLoadLevel::Normal, 300);
        fill(&mut core, SystemLoadLevel::High, 500);
        fill(&mut core, SystemLoadLevel::Critical, 200);

        for _ in 0..10 {
            assert!(core.adapt());
        }

        let offsets = core.offsets();
        assert!(offsets.high < 0.0, "high offset was {}", offsets.high);
        assert!(offsets.critical < 0.0, "critical offset was {}", offsets.critical);
        // Elevated is starved (0% vs 20% target): drifts positive
        assert!(offsets.elevated > 0.0);
    }

    #[test]
    fn test_offsets_clamped() {
        let mut core = HomeostatCore::new();
        fill(&mut core, SystemLoadLevel::Critical, BUFFER_CAP);

        // Many passes against a fully-critical buffer saturate the clamp
        for _ in 0..1000 {
            core.adapt();
        }

        let offsets = core.offsets();
        assert!(offsets.critical >= -OFFSET_LIMIT);
        assert_eq!(offsets.critical, -OFFSET_LIMIT);
        assert!(offsets.elevated <= OFFSET_LIMIT);
    }

    #[test]
    fn test_on_target_distribution_barely_moves() {
        let mut core = HomeostatCore::new();
        fill(&mut core, SystemLoadLevel::Normal, 700);
        fill(&mut core, SystemLoadLevel::Elevated, 200);
        fill(&mut core, SystemLoadLevel::High, 80);
        fill(&mut core, SystemLoadLevel::Critical, 20);

        assert!(core.adapt());

        let offsets = core.offsets();
        assert!(offsets.elevated.abs() < 1e-9);
        assert!(offsets.high.abs() < 1e-9);
        assert!(offsets.critical.abs() < 1e-9);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut core = HomeostatCore::new();
        fill(&mut core, SystemLoadLevel::Normal, BUFFER_CAP + 100);
        assert_eq!(core.sample_count(), BUFFER_CAP);
    }

    #[tokio::test]
    async fn test_handle_defaults_to_zero_offsets() {
        let bus = EventBus::new();
        let (_tuner, handle) = HomeostaticTuner::new(bus, HomeostatConfig::default());
        assert_eq!(handle.get_offsets(), ThresholdOffsets::default());
    }

    #[tokio::test]
    async fn test_actor_adapts_from_bus_samples() {
        let bus = EventBus::new();
        let (tuner, handle) = HomeostaticTuner::new(
            bus.clone(),
            HomeostatConfig {
                adapt_interval: Duration::from_millis(50),
            },
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(tuner.run(shutdown_tx.subscribe()));

        for _ in 0..200 {
            bus.publish(
                Topic::Load,
                BusEvent::Load(LoadSample {
                    level: SystemLoadLevel::Critical,
                    pressure: 0.95,
                    timestamp: 0,
                }),
            );
        }

        let mut offsets = ThresholdOffsets::default();
        for _ in 0..100 {
            offsets = handle.get_offsets();
            if offsets.critical < 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(offsets.critical < 0.0);

        let _ = shutdown_tx.send(());
        let _ = task.await;
    }
}
