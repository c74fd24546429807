//! In-process event bus connecting the control loops to the platform
//!
//! Lifecycle events and measurement batches fan out to every interested
//! loop; loops publish their own notifications (novelty events, phase
//! transitions) back onto the bus. The interface is a plain
//! subscribe/publish pair over per-topic broadcast channels, so an
//! external broker can stand in without touching the loops.

use crate::circadian::CircadianPhase;
use crate::models::{LifecycleEvent, LoadSample, Measurement};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default per-topic channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Bus topics. Each topic carries its own broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Sensor registered/updated/unregistered events.
    Lifecycle,
    /// Raw measurement batches from the transport.
    Measurements,
    /// System load observations.
    Load,
    /// Anomaly events published by the novelty detector.
    Novelty,
    /// Circadian phase transitions (published on change only).
    Phase,
}

const TOPIC_COUNT: usize = 5;

impl Topic {
    fn index(self) -> usize {
        match self {
            Topic::Lifecycle => 0,
            Topic::Measurements => 1,
            Topic::Load => 2,
            Topic::Novelty => 3,
            Topic::Phase => 4,
        }
    }
}

/// Events carried on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Lifecycle(LifecycleEvent),
    Measurements(Vec<Measurement>),
    Load(LoadSample),
    /// An anomalous reading crossed the novelty threshold.
    NoveltyDetected {
        sensor_id: String,
        attribute_id: String,
        z_score: f64,
        score: f64,
        /// How long delivery should stay boosted for this key, in ms.
        boost_duration_ms: i64,
    },
    /// The circadian scheduler moved to a new phase.
    PhaseChanged {
        phase: CircadianPhase,
        adjustment: f64,
    },
}

/// Topic-keyed broadcast bus. Cheap to clone; clones share channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<[broadcast::Sender<BusEvent>; TOPIC_COUNT]>,
}

impl EventBus {
    /// Create a bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let channels = std::array::from_fn(|_| broadcast::channel(capacity).0);
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Subscribe to a topic. Slow subscribers that fall behind the channel
    /// capacity observe a `Lagged` error and resume from the oldest
    /// retained event; loops treat that as acceptable loss.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusEvent> {
        self.channels[topic.index()].subscribe()
    }

    /// Publish an event to a topic.
    ///
    /// Returns the number of subscribers that received it; zero when
    /// nobody is listening, which is not an error.
    pub fn publish(&self, topic: Topic, event: BusEvent) -> usize {
        self.channels[topic.index()].send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Topic::Lifecycle);

        let delivered = bus.publish(
            Topic::Lifecycle,
            BusEvent::Lifecycle(LifecycleEvent::Registered {
                sensor_id: "s1".to_string(),
            }),
        );
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            BusEvent::Lifecycle(LifecycleEvent::Registered { sensor_id }) => {
                assert_eq!(sensor_id, "s1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let mut lifecycle_rx = bus.subscribe(Topic::Lifecycle);

        bus.publish(
            Topic::Load,
            BusEvent::Load(LoadSample {
                level: crate::models::SystemLoadLevel::High,
                pressure: 0.8,
                timestamp: 0,
            }),
        );

        // Nothing arrives on the lifecycle topic
        assert!(lifecycle_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let delivered = bus.publish(
            Topic::Novelty,
            BusEvent::NoveltyDetected {
                sensor_id: "s1".to_string(),
                attribute_id: "a".to_string(),
                z_score: 4.0,
                score: 0.9,
                boost_duration_ms: 10_000,
            },
        );
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe(Topic::Measurements);
        let mut rx2 = bus.subscribe(Topic::Measurements);

        bus.publish(Topic::Measurements, BusEvent::Measurements(Vec::new()));

        assert!(matches!(rx1.recv().await.unwrap(), BusEvent::Measurements(_)));
        assert!(matches!(rx2.recv().await.unwrap(), BusEvent::Measurements(_)));
    }
}
