//! Adaptive resource-control core for the Sensocto sensor platform
//!
//! This crate provides the statistical control loops that decide how a
//! node's delivery capacity is shared across hundreds of concurrently
//! streaming sensors:
//! - Online novelty scoring per (sensor, attribute) stream
//! - Hebbian co-access correlation between sensors
//! - Time-of-day load profiling and phase classification
//! - Homeostatic tuning of load-classification thresholds
//! - Competitive multiplier allocation (lateral inhibition)
//! - Predictive pre-boosting from learned attention patterns
//!
//! Each loop is a single-writer actor with a lock-free snapshot table;
//! all `get_*` reads are synchronous, never block, and degrade to a
//! documented neutral default for keys that have not warmed up.

pub mod arbiter;
pub mod attention;
pub mod bus;
pub mod circadian;
pub mod correlation;
pub mod error;
pub mod health;
pub mod homeostat;
pub mod models;
pub mod novelty;
pub mod observability;
pub mod predictive;
pub mod registry;

pub use arbiter::{ArbiterConfig, ArbiterHandle, ResourceArbiter};
pub use attention::{AttentionProvider, FixedAttentionProvider};
pub use bus::{BusEvent, EventBus, Topic};
pub use circadian::{CircadianConfig, CircadianHandle, CircadianPhase, CircadianScheduler};
pub use correlation::{CorrelationConfig, CorrelationHandle, CorrelationTracker};
pub use error::ControlError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use homeostat::{HomeostatConfig, HomeostatHandle, HomeostaticTuner, ThresholdOffsets};
pub use models::{AttentionLevel, LifecycleEvent, LoadSample, Measurement, SystemLoadLevel};
pub use novelty::{NoveltyConfig, NoveltyDetector, NoveltyHandle};
pub use observability::ControlMetrics;
pub use predictive::{PredictiveConfig, PredictiveHandle, PredictiveLoadBalancer};
pub use registry::SensorRegistry;
