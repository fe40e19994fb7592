//! Throttled pub/sub event bus
//!
//! All workers share one channel carrying JSON messages shaped
//! `{"type": ..., ...fields}`. Inbound frames are decoded, throttled per
//! message type and fanned out to local subscribers. Outbound messages are
//! buffered by [`EventBus::publish`] and handed to the transport in one go
//! by [`EventBus::flush`].
//!
//! # Architecture
//!
//! ```text
//!  publish ──▶ outbox ──flush──▶ EventTransport ──▶ (channel) ──▶ listen task
//!                                                                     │ Frame
//!  handlers ◀── fan-out ◀── throttle[type] ◀── decode JSON ◀── dispatch
//! ```
//!
//! Delivery is at-most-once: a flush clears the outbox even when sends fail.

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::metrics;
use crate::utils::error::BusError;

/// Frame kind carrying a published payload
pub const MESSAGE_FRAME: &str = "message";

// ============================================================================
// Messages
// ============================================================================

/// A typed bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Message type, used for throttling and routing
    #[serde(rename = "type")]
    pub kind: String,

    /// Remaining fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BusMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Raw frame as delivered by a pub/sub transport
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame kind; only `message` frames carry payloads
    pub kind: String,
    pub channel: String,
    pub payload: String,
}

impl Frame {
    /// A `message` frame
    pub fn message(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: MESSAGE_FRAME.to_string(),
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// What happened to an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many handlers
    Delivered(usize),
    /// Same type dispatched too recently
    Throttled,
    /// Absent frame or not a `message` frame
    Ignored,
    /// Payload was not a valid message
    Malformed,
}

impl DispatchOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::Throttled => "throttled",
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Outbound side of the pub/sub channel
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, channel: &str, payload: String) -> Result<(), BusError>;
}

/// Records sends in memory
#[derive(Debug, Default)]
pub struct MemoryEventTransport {
    sent: Mutex<Vec<Frame>>,
}

impl MemoryEventTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every frame sent so far
    pub fn drain_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *lock(&self.sent))
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }
}

#[async_trait]
impl EventTransport for MemoryEventTransport {
    async fn send(&self, channel: &str, payload: String) -> Result<(), BusError> {
        lock(&self.sent).push(Frame::message(channel, payload));
        Ok(())
    }
}

/// Redis pub/sub transport
#[derive(Clone)]
pub struct RedisEventTransport {
    pool: Pool,
    client: redis::Client,
}

impl RedisEventTransport {
    /// `url` is used for the dedicated subscriber connection
    pub fn new(pool: Pool, url: &str) -> Result<Self, BusError> {
        Ok(Self {
            pool,
            client: redis::Client::open(url)?,
        })
    }

    /// Subscribe to `channel` and feed every frame into `bus`
    ///
    /// The returned task runs until the subscriber connection closes.
    pub async fn listen(&self, bus: Arc<EventBus>, channel: &str) -> Result<JoinHandle<()>, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::info!(channel = %channel, "Subscribed to event channel");

        Ok(tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let frame = match msg.get_payload::<String>() {
                    Ok(payload) => Some(Frame::message(msg.get_channel_name(), payload)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Non-text event payload");
                        None
                    }
                };
                bus.dispatch(frame);
            }
            tracing::warn!("Event subscription closed");
        }))
    }
}

#[async_trait]
impl EventTransport for RedisEventTransport {
    async fn send(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.pool.get().await?;
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Subscriber callback
pub type Handler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local subscriber registry plus buffered publishing
pub struct EventBus {
    channel: String,
    transport: Arc<dyn EventTransport>,
    throttle: HashMap<String, Duration>,
    subscribers: RwLock<HashMap<String, HashMap<String, Handler>>>,
    last_seen: Mutex<HashMap<String, Instant>>,
    outbox: Mutex<Vec<BusMessage>>,
}

impl EventBus {
    pub fn new(
        channel: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        throttle: HashMap<String, Duration>,
    ) -> Self {
        Self {
            channel: channel.into(),
            transport,
            throttle,
            subscribers: RwLock::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Channel this bus publishes to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register `handler` under `id` on `channel`
    ///
    /// Subscribing an id twice replaces the earlier handler.
    pub fn subscribe<F>(&self, channel: &str, id: &str, handler: F)
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(id.to_string(), Arc::new(handler));
    }

    /// Remove a subscriber; true if it was registered
    pub fn unsubscribe(&self, channel: &str, id: &str) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = subscribers.get_mut(channel) else {
            return false;
        };
        let removed = handlers.remove(id).is_some();
        if handlers.is_empty() {
            subscribers.remove(channel);
        }
        removed
    }

    /// Number of handlers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Handle one inbound frame
    pub fn dispatch(&self, frame: Option<Frame>) -> DispatchOutcome {
        self.dispatch_at(frame, Instant::now())
    }

    /// Handle one inbound frame as of `now`
    pub fn dispatch_at(&self, frame: Option<Frame>, now: Instant) -> DispatchOutcome {
        let outcome = self.route(frame, now);
        metrics::record_bus_dispatch(outcome.as_str());
        outcome
    }

    fn route(&self, frame: Option<Frame>, now: Instant) -> DispatchOutcome {
        let Some(frame) = frame else {
            return DispatchOutcome::Ignored;
        };
        if frame.kind != MESSAGE_FRAME {
            tracing::trace!(kind = %frame.kind, "Ignoring non-message frame");
            return DispatchOutcome::Ignored;
        }

        let message: BusMessage = match serde_json::from_str(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(channel = %frame.channel, error = %e, "Dropping malformed event");
                return DispatchOutcome::Malformed;
            }
        };

        {
            let mut last_seen = lock(&self.last_seen);
            if let (Some(window), Some(last)) =
                (self.throttle.get(&message.kind), last_seen.get(&message.kind))
            {
                if now.saturating_duration_since(*last) < *window {
                    return DispatchOutcome::Throttled;
                }
            }
            last_seen.insert(message.kind.clone(), now);
        }

        // Handlers run outside the registry lock so they may subscribe.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame.channel)
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(&message);
        }
        DispatchOutcome::Delivered(handlers.len())
    }

    /// Buffer a message for the next flush
    pub fn publish(&self, message: BusMessage) {
        lock(&self.outbox).push(message);
    }

    /// Messages waiting for the next flush
    pub fn pending(&self) -> usize {
        lock(&self.outbox).len()
    }

    /// Send every buffered message and clear the buffer
    ///
    /// Returns how many messages the transport accepted. Failed sends are
    /// logged and not retried.
    pub async fn flush(&self) -> usize {
        let outbox = std::mem::take(&mut *lock(&self.outbox));
        let mut sent = 0;

        for message in outbox {
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(kind = %message.kind, error = %e, "Could not encode event");
                    continue;
                }
            };
            match self.transport.send(&self.channel, payload).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(kind = %message.kind, error = %e, "Event send failed"),
            }
        }

        metrics::record_bus_flush(sent);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let message = BusMessage::new("worker-status").with("worker", "w1");
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded, json!({ "type": "worker-status", "worker": "w1" }));

        let decoded: BusMessage =
            serde_json::from_str(r#"{"type":"stats-update","count":3}"#).unwrap();
        assert_eq!(decoded.kind, "stats-update");
        assert_eq!(decoded.field("count"), Some(&json!(3)));
    }

    #[test]
    fn test_message_without_type_is_malformed() {
        let bus = EventBus::new("c", Arc::new(MemoryEventTransport::new()), HashMap::new());
        let outcome = bus.dispatch(Some(Frame::message("c", r#"{"count":3}"#)));
        assert_eq!(outcome, DispatchOutcome::Malformed);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let bus = EventBus::new("c", Arc::new(MemoryEventTransport::new()), HashMap::new());
        assert!(!bus.unsubscribe("c", "nobody"));
        bus.subscribe("c", "a", |_| {});
        assert!(bus.unsubscribe("c", "a"));
        assert!(!bus.unsubscribe("c", "a"));
        assert_eq!(bus.subscriber_count("c"), 0);
    }

    #[test]
    fn test_dispatch_outcome_labels() {
        let labels: Vec<_> = [
            DispatchOutcome::Delivered(2),
            DispatchOutcome::Throttled,
            DispatchOutcome::Ignored,
            DispatchOutcome::Malformed,
        ]
        .iter()
        .map(DispatchOutcome::as_str)
        .collect();
        assert_eq!(labels, ["delivered", "throttled", "ignored", "malformed"]);
    }
}
