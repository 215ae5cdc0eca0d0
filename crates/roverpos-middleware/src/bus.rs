//! Topic-based publish/subscribe.
//!
//! Publishing is fire-and-forget: the caller learns about a local failure
//! (a closed transport, an unserialisable value) but never about delivery.
//!
//! # Topics
//!
//! Topics are plain `/`-separated strings. The service uses:
//!
//! | Topic | Traffic |
//! |---|---|
//! | `//sensor/heading/data` | 17-byte heading frames (topic configurable) |
//! | `data/imu/raw`, `data/imu/scaled` | JSON IMU samples |
//! | `data/attitude`, `data/position` | JSON estimates |
//! | `data/absolute/raw`, `data/absolute/scaled` | JSON UWB positions in metres |
//! | `position/command/...` | control commands, JSON or empty payload |
//!
//! # Channels
//!
//! Topics under [`CONTROL_PREFIX`] travel on their own small channel, so a
//! burst of telemetry cannot push a command out of a slow subscriber's
//! queue. A subscriber listens on the control channel when its prefix lies
//! under [`CONTROL_PREFIX`] and on the telemetry channel otherwise.

use roverpos_types::{BusMessage, Payload, RoverError};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (messages buffered before slow subscribers
/// start losing the oldest ones).
pub const DEFAULT_CAPACITY: usize = 256;

/// Topics carried on the control channel.
pub const CONTROL_PREFIX: &str = "position/command/";

/// Control messages buffered per subscriber.
pub const CONTROL_CAPACITY: usize = 64;

/// Outbound half of the message bus.
pub trait Publisher: Send + Sync {
    /// Hand `payload` to the transport for delivery on `topic`.
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), RoverError>;
}

/// Serialise `value` as JSON and publish it as text.
pub fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn Publisher,
    topic: &str,
    value: &T,
) -> Result<(), RoverError> {
    let text = serde_json::to_string(value).map_err(|e| RoverError::Serialization(e.to_string()))?;
    publisher.publish(topic, Payload::Text(text))
}

// ────────────────────────────────────────────────────────────────────────────
// EventBus
// ────────────────────────────────────────────────────────────────────────────

/// In-process bus. Clone it cheaply – all clones share the same telemetry
/// and control channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<BusMessage>,
    control: broadcast::Sender<BusMessage>,
}

impl EventBus {
    /// `capacity` sizes the telemetry channel; the control channel holds
    /// [`CONTROL_CAPACITY`] messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a Tokio broadcast requirement); the CLI
    /// clamps its configured value to at least one.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(CONTROL_CAPACITY);
        Self { telemetry, control }
    }

    fn channel(&self, topic: &str) -> &broadcast::Sender<BusMessage> {
        if topic.starts_with(CONTROL_PREFIX) {
            &self.control
        } else {
            &self.telemetry
        }
    }

    /// Every telemetry message, unfiltered. Control messages are only seen
    /// through [`subscribe_topic`](Self::subscribe_topic).
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.telemetry.subscribe()
    }

    /// Messages whose topic starts with `prefix`.
    pub fn subscribe_topic(&self, prefix: impl Into<String>) -> TopicSubscriber {
        let prefix = prefix.into();
        let receiver = self.channel(&prefix).subscribe();
        TopicSubscriber { prefix, receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.telemetry.receiver_count() + self.control.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Publisher for EventBus {
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), RoverError> {
        match self.channel(topic).send(BusMessage::new(topic, payload)) {
            Ok(receivers) => trace!(topic, receivers, "published"),
            // Nobody listening is normal for telemetry.
            Err(broadcast::error::SendError(_)) => trace!(topic, "published with no subscribers"),
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TopicSubscriber
// ────────────────────────────────────────────────────────────────────────────

/// Delivers only messages whose topic starts with the subscriber's prefix.
///
/// Usable from async code ([`recv`](Self::recv)) and from the plain OS
/// threads the polling loops run on ([`try_recv`](Self::try_recv)).
pub struct TopicSubscriber {
    prefix: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscriber {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the next matching message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.topic.starts_with(&self.prefix) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.prefix, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching message already queued, without blocking. `None` when
    /// the queue holds nothing that matches or the bus is gone.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) if message.topic.starts_with(&self.prefix) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.prefix, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish("//sensor/heading/data", Payload::Bytes(vec![1, 2, 3]))?;

        let received = rx.recv().await?;
        assert_eq!(received.topic, "//sensor/heading/data");
        assert_eq!(received.payload.as_bytes(), &[1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_filters_by_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("position/command/");

        bus.publish("data/attitude", Payload::Text("{}".into()))?;
        bus.publish("position/command/pause", Payload::Text(String::new()))?;

        let received = sub.recv().await.ok_or("no message received")?;
        assert_eq!(received.topic, "position/command/pause");
        Ok(())
    }

    #[tokio::test]
    async fn non_matching_topic_is_not_delivered() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("position/command");

        bus.publish("//sensor/heading/data", Payload::Bytes(vec![0; 17])).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "heading frame must not reach the command subscriber");
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.publish("data/attitude", Payload::Text("{}".into())).is_ok());
    }

    #[test]
    fn try_recv_skips_other_topics_and_drains() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("a/");

        bus.publish("b/1", Payload::Text("x".into())).unwrap();
        bus.publish("a/1", Payload::Text("y".into())).unwrap();

        let message = sub.try_recv().expect("matching message queued");
        assert_eq!(message.payload.as_text(), Some("y"));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn try_recv_recovers_from_lag() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe_topic("flood");
        for i in 0..32u8 {
            bus.publish("flood", Payload::Bytes(vec![i])).unwrap();
        }
        // The oldest frames are gone; the newest survives.
        let mut last = None;
        while let Some(message) = sub.try_recv() {
            last = Some(message.payload.as_bytes().to_vec());
        }
        assert_eq!(last, Some(vec![31]));
    }

    #[test]
    fn commands_survive_a_telemetry_flood() {
        let bus = EventBus::new(4);
        let mut commands = bus.subscribe_topic(CONTROL_PREFIX);
        let mut telemetry = bus.subscribe_topic("data/");

        bus.publish("position/command/pause", Payload::Text(String::new())).unwrap();
        for i in 0..32u8 {
            bus.publish("data/imu/raw", Payload::Bytes(vec![i])).unwrap();
        }

        let message = commands.try_recv().expect("command still queued");
        assert_eq!(message.topic, "position/command/pause");
        assert!(commands.try_recv().is_none());
        assert_eq!(telemetry.try_recv().map(|m| m.payload.as_bytes().to_vec()), Some(vec![28]));
    }

    #[test]
    fn unfiltered_subscriber_sees_telemetry_only() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish("position/command/quit", Payload::Text(String::new())).unwrap();
        bus.publish("data/attitude", Payload::Text("{}".into())).unwrap();
        assert_eq!(rx.try_recv().unwrap().topic, "data/attitude");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[derive(Serialize)]
    struct Sample {
        x: f64,
    }

    #[test]
    fn publish_json_sends_text() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("json");
        publish_json(&bus, "json", &Sample { x: 1.5 }).unwrap();
        let message = sub.try_recv().unwrap();
        assert_eq!(message.payload.as_text(), Some(r#"{"x":1.5}"#));
    }
}
