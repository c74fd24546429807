//! Online novelty detection for measurement streams
//!
//! This module provides:
//! - Welford single-pass statistics per (sensor, attribute) key
//! - Sigmoid novelty scoring against a configurable z threshold
//! - Debounced anomaly events published on the event bus

mod detector;
mod welford;

pub use detector::{
    AnomalyEvent, BatchOutcome, NoveltyConfig, NoveltyCore, NoveltyDetector, NoveltyHandle,
    SensorKey,
};
pub use welford::OnlineStats;
