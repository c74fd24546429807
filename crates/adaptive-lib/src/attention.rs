//! Attention provider seam
//!
//! The platform's realtime layer knows which sensors are being watched;
//! the control loops only see this trait. Provider failures are treated
//! as an unknown attention level by callers, never propagated.

use crate::error::ControlError;
use crate::models::AttentionLevel;
use dashmap::DashMap;

pub use async_trait::async_trait;

/// Source of per-sensor attention levels.
#[async_trait]
pub trait AttentionProvider: Send + Sync {
    /// Current attention level for a sensor.
    async fn attention_level(&self, sensor_id: &str) -> Result<AttentionLevel, ControlError>;
}

/// Fixed in-memory provider, used in tests and as a standalone default.
#[derive(Debug, Default)]
pub struct FixedAttentionProvider {
    levels: DashMap<String, AttentionLevel>,
}

impl FixedAttentionProvider {
    pub fn new() -> Self {
        Self {
            levels: DashMap::new(),
        }
    }

    /// Set the level returned for a sensor.
    pub fn set(&self, sensor_id: impl Into<String>, level: AttentionLevel) {
        self.levels.insert(sensor_id.into(), level);
    }
}

#[async_trait]
impl AttentionProvider for FixedAttentionProvider {
    async fn attention_level(&self, sensor_id: &str) -> Result<AttentionLevel, ControlError> {
        self.levels
            .get(sensor_id)
            .map(|r| *r.value())
            .ok_or_else(|| ControlError::Upstream(format!("no attention data for {sensor_id}")))
    }
}
