//! Registry of currently-alive sensors
//!
//! Maintained from the platform's lifecycle event feed. The arbiter
//! iterates it every reallocation cycle; the novelty and predictive
//! sweeps consult it to prune state for sensors that are gone.

use crate::models::LifecycleEvent;
use dashmap::DashMap;
use tracing::debug;

/// Per-sensor registration record.
#[derive(Debug, Clone)]
pub struct SensorInfo {
    pub sensor_id: String,
    /// Unix millis of the registration event.
    pub registered_at: i64,
    /// Unix millis of the most recent lifecycle event for this sensor.
    pub last_seen: i64,
}

/// Tracks which sensors are currently registered on this node.
///
/// Reads are lock-free `DashMap` lookups and safe from any task.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: DashMap<String, SensorInfo>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            sensors: DashMap::new(),
        }
    }

    /// Apply a lifecycle event.
    pub fn apply(&self, event: &LifecycleEvent, now_ms: i64) {
        match event {
            LifecycleEvent::Registered { sensor_id } => {
                debug!(sensor_id = %sensor_id, "Registering sensor");
                self.sensors.insert(
                    sensor_id.clone(),
                    SensorInfo {
                        sensor_id: sensor_id.clone(),
                        registered_at: now_ms,
                        last_seen: now_ms,
                    },
                );
            }
            LifecycleEvent::Updated { sensor_id } => {
                if let Some(mut entry) = self.sensors.get_mut(sensor_id) {
                    entry.last_seen = now_ms;
                }
            }
            LifecycleEvent::Unregistered { sensor_id } => {
                debug!(sensor_id = %sensor_id, "Unregistering sensor");
                self.sensors.remove(sensor_id);
            }
        }
    }

    /// Whether a sensor is currently registered.
    pub fn is_alive(&self, sensor_id: &str) -> bool {
        self.sensors.contains_key(sensor_id)
    }

    /// Ids of all currently-registered sensors.
    pub fn list(&self) -> Vec<String> {
        self.sensors.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
