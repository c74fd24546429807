//! Core data models shared by the control loops

use serde::{Deserialize, Serialize};

/// Payload fields probed for a numeric reading, in priority order.
const NUMERIC_FIELDS: &[&str] = &["value", "level", "temperature", "humidity", "pressure"];

/// Viewer attention level for a sensor, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    /// No active viewers - minimal updates needed.
    #[default]
    None,
    /// Low attention - slower updates acceptable.
    Low,
    /// Medium attention - normal updates.
    Medium,
    /// High attention - fast updates needed.
    High,
}

impl AttentionLevel {
    /// Numeric score used by the priority and pattern-learning loops.
    pub fn score(&self) -> f64 {
        match self {
            AttentionLevel::High => 1.0,
            AttentionLevel::Medium => 0.6,
            AttentionLevel::Low => 0.3,
            AttentionLevel::None => 0.1,
        }
    }

    /// Score assumed when the attention provider has no answer for a sensor.
    pub const UNKNOWN_SCORE: f64 = 0.5;
}

/// Coarse system load classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SystemLoadLevel {
    /// System running smoothly.
    #[default]
    Normal,
    /// Moderate load.
    Elevated,
    /// Heavy load.
    High,
    /// System overloaded.
    Critical,
}

impl SystemLoadLevel {
    /// Load score used when learning the daily profile.
    pub fn score(&self) -> f64 {
        match self {
            SystemLoadLevel::Critical => 1.0,
            SystemLoadLevel::High => 0.8,
            SystemLoadLevel::Elevated => 0.5,
            SystemLoadLevel::Normal => 0.2,
        }
    }
}

/// A single sensor measurement as delivered by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: String,
    pub attribute_id: String,
    /// Raw measurement payload; numeric extraction is best-effort.
    pub payload: serde_json::Value,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl Measurement {
    /// Extracts a numeric reading from the payload.
    ///
    /// Bare numbers are accepted directly; objects are probed for the
    /// well-known fields in priority order. Returns `None` for payloads
    /// without a usable number, which the stats loops drop silently.
    pub fn numeric_value(&self) -> Option<f64> {
        if let Some(n) = self.payload.as_f64() {
            return Some(n);
        }
        let obj = self.payload.as_object()?;
        for field in NUMERIC_FIELDS {
            if let Some(n) = obj.get(*field).and_then(|v| v.as_f64()) {
                return Some(n);
            }
        }
        None
    }
}

/// Sensor lifecycle events from the platform's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LifecycleEvent {
    Registered { sensor_id: String },
    Updated { sensor_id: String },
    Unregistered { sensor_id: String },
}

impl LifecycleEvent {
    /// The sensor this event refers to.
    pub fn sensor_id(&self) -> &str {
        match self {
            LifecycleEvent::Registered { sensor_id }
            | LifecycleEvent::Updated { sensor_id }
            | LifecycleEvent::Unregistered { sensor_id } => sensor_id,
        }
    }
}

/// A system load observation used by the circadian and homeostatic loops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub level: SystemLoadLevel,
    /// Observed scheduler pressure in [0, 1], informational.
    pub pressure: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}
