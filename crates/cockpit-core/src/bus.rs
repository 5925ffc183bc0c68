use crate::error::{Classify, FailureKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tracing::{error, warn};

/// Closed registry of literal topics. Wildcards are `<root>.*` for any root
/// that owns at least one entry here.
pub const TOPICS: &[&str] = &[
    "task.created",
    "task.updated",
    "task.status",
    "task.diff",
    "task.deleted",
    "task.event",
    "system.metrics",
    "system.error",
    "operator.registered",
    "operator.removed",
    "operator.status",
    "process.started",
    "process.embedded",
    "process.finished",
    "safety.violation",
    "safety.approved",
];

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("cannot publish to wildcard topic '{0}'")]
    WildcardPublish(String),
    #[error("payload for '{topic}' must be a JSON object")]
    InvalidPayload { topic: String },
    #[error("failed to encode payload for '{topic}': {reason}")]
    Encode { topic: String, reason: String },
}

impl Classify for BusError {
    fn kind(&self) -> FailureKind {
        FailureKind::Validation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicPattern {
    Literal(String),
    Wildcard(String),
}

impl TopicPattern {
    fn parse(topic: &str) -> Result<Self, BusError> {
        if let Some(root) = topic.strip_suffix(".*") {
            let prefix = format!("{root}.");
            if !root.is_empty()
                && !root.contains('*')
                && TOPICS.iter().any(|known| known.starts_with(&prefix))
            {
                return Ok(TopicPattern::Wildcard(prefix));
            }
            return Err(BusError::UnknownTopic(topic.to_string()));
        }
        if TOPICS.contains(&topic) {
            Ok(TopicPattern::Literal(topic.to_string()))
        } else {
            Err(BusError::UnknownTopic(topic.to_string()))
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Literal(literal) => literal == topic,
            TopicPattern::Wildcard(prefix) => {
                topic.starts_with(prefix.as_str()) && !topic[prefix.len()..].contains('.')
            }
        }
    }
}

type Handler = dyn Fn(&str, &Map<String, Value>) -> Result<(), String> + Send + Sync;

struct Subscriber {
    id: u64,
    pattern: TopicPattern,
    handler: Box<Handler>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sub| sub.id != id);
    }
}

/// Synchronous in-process topic broadcast. Cloning shares the subscriber
/// table.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&str, &Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        let pattern = TopicPattern::parse(topic)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            pattern,
            handler: Box::new(handler),
        });
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscriber);
        Ok(Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        })
    }

    /// Delivers `payload` to every matching subscriber in registration order
    /// and returns how many handlers completed without fault.
    pub fn publish(&self, topic: &str, payload: Value) -> Result<usize, BusError> {
        match TopicPattern::parse(topic)? {
            TopicPattern::Literal(_) => {}
            TopicPattern::Wildcard(_) => return Err(BusError::WildcardPublish(topic.to_string())),
        }
        let Value::Object(payload) = payload else {
            return Err(BusError::InvalidPayload {
                topic: topic.to_string(),
            });
        };

        let snapshot: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.pattern.matches(topic) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(topic, &payload)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!(topic, subscriber = subscriber.id, "bus_handler_failed: {err}");
                }
                Err(_) => {
                    error!(topic, subscriber = subscriber.id, "bus_handler_panicked");
                }
            }
        }
        Ok(delivered)
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> Result<usize, BusError> {
        let value = serde_json::to_value(payload).map_err(|err| BusError::Encode {
            topic: topic.to_string(),
            reason: err.to_string(),
        })?;
        self.publish(topic, value)
    }

    /// Number of subscribers whose pattern would receive `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|sub| sub.pattern.matches(topic))
            .count()
    }
}

pub struct Subscription {
    id: u64,
    inner: Weak<BusInner>,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Bus) {
        (Arc::new(Mutex::new(Vec::new())), Bus::new())
    }

    #[test]
    fn literal_handlers_run_in_registration_order() {
        let (seen, bus) = recorder();
        let first = Arc::clone(&seen);
        bus.subscribe("task.created", move |_, _| {
            first.lock().unwrap().push("h1".to_string());
            Ok(())
        })
        .expect("subscribe h1");
        let second = Arc::clone(&seen);
        bus.subscribe("task.created", move |_, _| {
            second.lock().unwrap().push("h2".to_string());
            Ok(())
        })
        .expect("subscribe h2");

        let delivered = bus
            .publish("task.created", json!({"id": "tsk_1"}))
            .expect("publish");
        assert_eq!(delivered, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[test]
    fn wildcard_sees_every_topic_under_root() {
        let (seen, bus) = recorder();
        let sink = Arc::clone(&seen);
        bus.subscribe("task.*", move |topic, _| {
            sink.lock().unwrap().push(topic.to_string());
            Ok(())
        })
        .expect("subscribe wildcard");

        for topic in ["task.created", "task.updated", "task.diff", "system.metrics"] {
            bus.publish(topic, json!({})).expect("publish");
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["task.created", "task.updated", "task.diff"]
        );
    }

    #[test]
    fn unknown_topics_fail_validation() {
        let bus = Bus::new();
        let err = bus.subscribe("task.exploded", |_, _| Ok(())).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(bus.subscribe("nothing.*", |_, _| Ok(())).is_err());
        assert!(bus.publish("task.exploded", json!({})).is_err());
        assert!(matches!(
            bus.publish("task.*", json!({})),
            Err(BusError::WildcardPublish(_))
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let bus = Bus::new();
        let err = bus.publish("task.created", json!([1, 2])).unwrap_err();
        assert!(matches!(err, BusError::InvalidPayload { .. }));
    }

    #[test]
    fn faulty_handlers_do_not_abort_delivery() {
        let (seen, bus) = recorder();
        bus.subscribe("task.status", |_, _| Err("boom".to_string()))
            .expect("subscribe failing");
        bus.subscribe("task.status", |_, _| panic!("handler panic"))
            .expect("subscribe panicking");
        let sink = Arc::clone(&seen);
        bus.subscribe("task.status", move |_, payload| {
            sink.lock()
                .unwrap()
                .push(payload["status"].as_str().unwrap_or_default().to_string());
            Ok(())
        })
        .expect("subscribe healthy");

        let delivered = bus
            .publish("task.status", json!({"status": "merged"}))
            .expect("publish");
        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["merged"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let (seen, bus) = recorder();
        let sink = Arc::clone(&seen);
        let handle = bus
            .subscribe("operator.status", move |_, _| {
                sink.lock().unwrap().push("hit".to_string());
                Ok(())
            })
            .expect("subscribe");
        assert_eq!(bus.subscriber_count("operator.status"), 1);

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(bus.subscriber_count("operator.status"), 0);

        bus.publish("operator.status", json!({})).expect("publish");
        assert!(seen.lock().unwrap().is_empty());
    }
}
