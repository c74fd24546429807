//! Time-of-day load profiling and phase classification
//!
//! Learns a 24-bucket daily load curve from observed load samples and
//! classifies the current hour relative to it. The phase adjustment is a
//! conservatism knob for downstream throttling: above 1.0 ahead of and
//! during peaks, below 1.0 around troughs.

use crate::bus::{BusEvent, EventBus, Topic};
use crate::models::{LoadSample, SystemLoadLevel};
use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// How often the profile is re-learned from the rolling history.
const DEFAULT_RELEARN_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// How often the current phase is re-classified.
const DEFAULT_PHASE_INTERVAL: Duration = Duration::from_secs(600);

/// Minimum buffered samples before a relearn pass runs.
const MIN_SAMPLES_FOR_RELEARN: usize = 60;

/// Rolling history cap (14 days of 5-minute samples).
const HISTORY_CAP: usize = 4032;

/// Profile delta between adjacent hours that signals a transition.
const TRANSITION_DELTA: f64 = 0.15;

/// Load score at or above which an hour counts as peak.
const PEAK_LEVEL: f64 = 0.8;

/// Load score at or below which an hour counts as off-peak.
const OFF_PEAK_LEVEL: f64 = 0.3;

/// Blend weight of newly-averaged hours during a relearn pass.
const RELEARN_BLEND: f64 = 0.3;

const MAILBOX_CAPACITY: usize = 256;

/// Seeded daily curve: quiet nights, a daytime plateau, an evening peak.
/// Re-learned in place once enough load history accumulates.
const DEFAULT_PROFILE: [f64; 24] = [
    0.2, 0.15, 0.15, 0.15, 0.15, 0.2, // 00-05
    0.3, 0.5, 0.55, 0.6, 0.65, 0.7, // 06-11
    0.7, 0.65, 0.6, 0.6, 0.65, 0.7, // 12-17
    0.9, 0.9, 0.85, 0.65, 0.5, 0.3, // 18-23
];

/// Position of the current hour relative to the learned daily curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircadianPhase {
    ApproachingPeak,
    Peak,
    ApproachingOffPeak,
    OffPeak,
    Normal,
}

impl CircadianPhase {
    /// Throttle adjustment for this phase; >1.0 means "be conservative".
    pub fn adjustment(&self) -> f64 {
        match self {
            CircadianPhase::ApproachingPeak => 1.15,
            CircadianPhase::Peak => 1.2,
            CircadianPhase::ApproachingOffPeak => 0.9,
            CircadianPhase::OffPeak => 0.85,
            CircadianPhase::Normal => 1.0,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CircadianPhase::ApproachingPeak => 0,
            CircadianPhase::Peak => 1,
            CircadianPhase::ApproachingOffPeak => 2,
            CircadianPhase::OffPeak => 3,
            CircadianPhase::Normal => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => CircadianPhase::ApproachingPeak,
            1 => CircadianPhase::Peak,
            2 => CircadianPhase::ApproachingOffPeak,
            3 => CircadianPhase::OffPeak,
            _ => CircadianPhase::Normal,
        }
    }
}

/// Tunables for the circadian scheduler.
#[derive(Debug, Clone)]
pub struct CircadianConfig {
    pub relearn_interval: Duration,
    pub phase_interval: Duration,
}

impl Default for CircadianConfig {
    fn default() -> Self {
        Self {
            relearn_interval: DEFAULT_RELEARN_INTERVAL,
            phase_interval: DEFAULT_PHASE_INTERVAL,
        }
    }
}

/// Pure profile state, exclusively owned by the actor task.
#[derive(Debug)]
pub struct CircadianCore {
    profile: [f64; 24],
    /// Rolling (hour, load score) history.
    history: VecDeque<(u32, f64)>,
}

impl CircadianCore {
    pub fn new() -> Self {
        Self {
            profile: DEFAULT_PROFILE,
            history: VecDeque::new(),
        }
    }

    /// Buffer one load observation for the next relearn pass.
    pub fn record(&mut self, level: SystemLoadLevel, timestamp_ms: i64) {
        let hour = chrono::DateTime::from_timestamp_millis(timestamp_ms)
            .map(|dt| dt.hour())
            .unwrap_or(0);
        if self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back((hour, level.score()));
    }

    /// Re-learn the profile from buffered history. Hours with samples are
    /// blended toward their observed average; hours without keep their
    /// current value. Returns false when too few samples are buffered.
    pub fn relearn(&mut self) -> bool {
        if self.history.len() < MIN_SAMPLES_FOR_RELEARN {
            return false;
        }

        let mut sums = [0.0f64; 24];
        let mut counts = [0usize; 24];
        for (hour, score) in &self.history {
            sums[*hour as usize] += score;
            counts[*hour as usize] += 1;
        }

        for hour in 0..24 {
            if counts[hour] > 0 {
                let observed = sums[hour] / counts[hour] as f64;
                self.profile[hour] =
                    (1.0 - RELEARN_BLEND) * self.profile[hour] + RELEARN_BLEND * observed;
            }
        }
        true
    }

    /// Classify an hour against the profile by comparing it to the next.
    pub fn classify(&self, hour: u32) -> CircadianPhase {
        let current = self.profile[hour as usize % 24];
        let next = self.profile[(hour as usize + 1) % 24];
        let diff = next - current;

        if diff > TRANSITION_DELTA {
            CircadianPhase::ApproachingPeak
        } else if -diff > TRANSITION_DELTA {
            CircadianPhase::ApproachingOffPeak
        } else if current >= PEAK_LEVEL {
            CircadianPhase::Peak
        } else if current <= OFF_PEAK_LEVEL {
            CircadianPhase::OffPeak
        } else {
            CircadianPhase::Normal
        }
    }

    pub fn profile(&self) -> &[f64; 24] {
        &self.profile
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }
}

impl Default for CircadianCore {
    fn default() -> Self {
        Self::new()
    }
}

enum CircadianCommand {
    Record { level: SystemLoadLevel, timestamp_ms: i64 },
}

/// Shared phase snapshot cell, written only by the actor.
#[derive(Debug)]
struct PhaseCell {
    phase: AtomicU8,
    adjustment_bits: AtomicU64,
}

impl PhaseCell {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(CircadianPhase::Normal.to_u8()),
            adjustment_bits: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    fn store(&self, phase: CircadianPhase) {
        self.phase.store(phase.to_u8(), Ordering::Release);
        self.adjustment_bits
            .store(phase.adjustment().to_bits(), Ordering::Release);
    }
}

/// Read/write handle shared with collaborators. Cheap to clone.
#[derive(Clone)]
pub struct CircadianHandle {
    tx: mpsc::Sender<CircadianCommand>,
    cell: Arc<PhaseCell>,
}

impl CircadianHandle {
    /// Fire-and-forget load observation.
    pub fn record_load(&self, level: SystemLoadLevel, _pressure: f64) {
        let cmd = CircadianCommand::Record {
            level,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        if self.tx.try_send(cmd).is_err() {
            warn!("Circadian mailbox full, dropping load sample");
        }
    }

    /// Current phase. Defaults to `Normal` until the first classification.
    pub fn get_phase(&self) -> CircadianPhase {
        CircadianPhase::from_u8(self.cell.phase.load(Ordering::Acquire))
    }

    /// Current phase adjustment. Defaults to 1.0.
    pub fn get_phase_adjustment(&self) -> f64 {
        f64::from_bits(self.cell.adjustment_bits.load(Ordering::Acquire))
    }
}

/// Circadian scheduler actor. Single writer over profile and phase cell.
pub struct CircadianScheduler {
    core: CircadianCore,
    cell: Arc<PhaseCell>,
    bus: EventBus,
    rx: mpsc::Receiver<CircadianCommand>,
    config: CircadianConfig,
    last_phase: Option<CircadianPhase>,
}

impl CircadianScheduler {
    pub fn new(bus: EventBus, config: CircadianConfig) -> (Self, CircadianHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let cell = Arc::new(PhaseCell::new());

        let scheduler = Self {
            core: CircadianCore::new(),
            cell: cell.clone(),
            bus,
            rx,
            config,
            last_phase: None,
        };

        (scheduler, CircadianHandle { tx, cell })
    }

    /// Run the scheduler until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            relearn_secs = self.config.relearn_interval.as_secs(),
            phase_secs = self.config.phase_interval.as_secs(),
            "Starting circadian scheduler"
        );

        let mut load_events = self.bus.subscribe(Topic::Load);
        let mut relearn = interval(self.config.relearn_interval);
        relearn.tick().await; // skip the immediate first tick
        let mut phase_tick = interval(self.config.phase_interval);

        loop {
            tokio::select! {
                Some(cmd) = self.rx.recv() => {
                    let CircadianCommand::Record { level, timestamp_ms } = cmd;
                    self.core.record(level, timestamp_ms);
                }
                event = load_events.recv() => {
                    if let Ok(BusEvent::Load(LoadSample { level, timestamp, .. })) = event {
                        self.core.record(level, timestamp);
                    }
                }
                _ = relearn.tick() => {
                    if self.core.relearn() {
                        debug!(samples = self.core.sample_count(), "Circadian profile re-learned");
                    }
                }
                _ = phase_tick.tick() => self.classify_now(),
                _ = shutdown.recv() => {
                    info!("Shutting down circadian scheduler");
                    break;
                }
            }
        }
    }

    fn classify_now(&mut self) {
        let phase = self.core.classify(Utc::now().hour());
        self.cell.store(phase);

        if self.last_phase != Some(phase) {
            info!(?phase, adjustment = phase.adjustment(), "Circadian phase transition");
            self.bus.publish(
                Topic::Phase,
                BusEvent::PhaseChanged {
                    phase,
                    adjustment: phase.adjustment(),
                },
            );
            self.last_phase = Some(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Unix millis for today's date at the given UTC hour.
    fn at_hour(hour: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 30, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_default_profile_classification() {
        let core = CircadianCore::new();

        // Ramp into the evening peak
        assert_eq!(core.classify(17), CircadianPhase::ApproachingPeak);
        // In the peak plateau
        assert_eq!(core.classify(18), CircadianPhase::Peak);
        // Falling out of the peak
        assert_eq!(core.classify(20), CircadianPhase::ApproachingOffPeak);
        // Overnight trough
        assert_eq!(core.classify(2), CircadianPhase::OffPeak);
        // Midday plateau
        assert_eq!(core.classify(10), CircadianPhase::Normal);
    }

    #[test]
    fn test_adjustment_ladder() {
        assert_eq!(CircadianPhase::ApproachingPeak.adjustment(), 1.15);
        assert_eq!(CircadianPhase::Peak.adjustment(), 1.2);
        assert_eq!(CircadianPhase::ApproachingOffPeak.adjustment(), 0.9);
        assert_eq!(CircadianPhase::OffPeak.adjustment(), 0.85);
        assert_eq!(CircadianPhase::Normal.adjustment(), 1.0);
    }

    #[test]
    fn test_relearn_requires_min_samples() {
        let mut core = CircadianCore::new();
        for _ in 0..(MIN_SAMPLES_FOR_RELEARN - 1) {
            core.record(SystemLoadLevel::Critical, at_hour(3));
        }
        let before = *core.profile();
        assert!(!core.relearn());
        assert_eq!(*core.profile(), before);
    }

    #[test]
    fn test_relearn_blends_observed_hours() {
        let mut core = CircadianCore::new();
        let seeded = core.profile()[3];
        for _ in 0..100 {
            core.record(SystemLoadLevel::Critical, at_hour(3));
        }

        assert!(core.relearn());

        // Hour 3 moves toward the observed critical load, other hours stay
        let expected = (1.0 - RELEARN_BLEND) * seeded + RELEARN_BLEND * 1.0;
        assert!((core.profile()[3] - expected).abs() < 1e-9);
        assert_eq!(core.profile()[10], DEFAULT_PROFILE[10]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut core = CircadianCore::new();
        for _ in 0..(HISTORY_CAP + 500) {
            core.record(SystemLoadLevel::Normal, at_hour(12));
        }
        assert_eq!(core.sample_count(), HISTORY_CAP);
    }

    #[tokio::test]
    async fn test_handle_defaults_before_first_tick() {
        let bus = EventBus::new();
        let (_scheduler, handle) = CircadianScheduler::new(bus, CircadianConfig::default());

        // Actor not running: reads still work and return the neutral default
        assert_eq!(handle.get_phase(), CircadianPhase::Normal);
        assert_eq!(handle.get_phase_adjustment(), 1.0);
    }

    #[tokio::test]
    async fn test_phase_transition_published_once() {
        let bus = EventBus::new();
        let (scheduler, handle) = CircadianScheduler::new(
            bus.clone(),
            CircadianConfig {
                relearn_interval: Duration::from_secs(3600),
                phase_interval: Duration::from_millis(20),
            },
        );
        let mut phase_rx = bus.subscribe(Topic::Phase);

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

        // First classification is always a transition from "unknown"
        let event = tokio::time::timeout(Duration::from_secs(2), phase_rx.recv())
            .await
            .expect("expected an initial phase event")
            .unwrap();
        let BusEvent::PhaseChanged { phase, adjustment } = event else {
            panic!("unexpected event");
        };
        assert_eq!(adjustment, phase.adjustment());
        assert_eq!(handle.get_phase(), phase);

        // Repeated ticks with an unchanged profile publish nothing further
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(phase_rx.try_recv().is_err());

        let _ = shutdown_tx.send(());
        let _ = task.await;
    }
}
