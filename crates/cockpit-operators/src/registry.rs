use crate::OperatorError;
use cockpit_core::{Bus, OperatorRecord, OperatorStatus};
use parking_lot::ReentrantMutex;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Restarts an operator on request. Errors propagate to the caller of
/// [`OperatorRegistry::restart`].
pub trait RestartHook: Send + Sync {
    fn restart(&self, record: &OperatorRecord) -> Result<(), String>;
}

impl<F> RestartHook for F
where
    F: Fn(&OperatorRecord) -> Result<(), String> + Send + Sync,
{
    fn restart(&self, record: &OperatorRecord) -> Result<(), String> {
        self(record)
    }
}

struct Entry {
    record: OperatorRecord,
    hook: Option<Arc<dyn RestartHook>>,
}

/// Thread-safe operator catalogue. Every mutation is mirrored on the bus
/// after the lock is released, so handlers may call back in.
pub struct OperatorRegistry {
    entries: ReentrantMutex<RefCell<BTreeMap<String, Entry>>>,
    bus: Option<Bus>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            entries: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
            bus: None,
        }
    }

    pub fn with_bus(bus: Bus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    /// Adds or replaces the operator named `record.name`.
    pub fn register(
        &self,
        mut record: OperatorRecord,
        hook: Option<Arc<dyn RestartHook>>,
    ) -> Result<OperatorRecord, OperatorError> {
        if record.name.trim().is_empty() {
            return Err(OperatorError::InvalidName(record.name));
        }
        record.restartable = hook.is_some();
        let replaced = {
            let guard = self.entries.lock();
            let mut entries = guard.borrow_mut();
            entries
                .insert(
                    record.name.clone(),
                    Entry {
                        record: record.clone(),
                        hook,
                    },
                )
                .is_some()
        };
        info!(operator = %record.name, replaced, "operator_registered");
        self.publish("operator.registered", json!(record));
        Ok(record)
    }

    pub fn remove(&self, name: &str) -> Option<OperatorRecord> {
        let removed = {
            let guard = self.entries.lock();
            let mut entries = guard.borrow_mut();
            entries.remove(name).map(|entry| entry.record)
        };
        if removed.is_some() {
            info!(operator = name, "operator_removed");
            self.publish("operator.removed", json!({ "name": name }));
        }
        removed
    }

    pub fn update_status(
        &self,
        name: &str,
        status: OperatorStatus,
        detail: impl Into<String>,
    ) -> Result<OperatorRecord, OperatorError> {
        let detail = detail.into();
        let (record, previous) = {
            let guard = self.entries.lock();
            let mut entries = guard.borrow_mut();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
            let previous = entry.record.status;
            entry.record.status = status;
            entry.record.status_detail = detail.clone();
            (entry.record.clone(), previous)
        };
        self.publish(
            "operator.status",
            json!({
                "name": name,
                "status": status,
                "previous": previous,
                "detail": detail,
            }),
        );
        Ok(record)
    }

    /// Runs the operator's restart hook. `Ok(false)` when it has none.
    pub fn restart(&self, name: &str) -> Result<bool, OperatorError> {
        let (record, hook) = {
            let guard = self.entries.lock();
            let entries = guard.borrow();
            let entry = entries
                .get(name)
                .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
            (entry.record.clone(), entry.hook.clone())
        };
        let Some(hook) = hook else {
            return Ok(false);
        };
        hook.restart(&record)
            .map_err(|reason| OperatorError::RestartFailed {
                name: name.to_string(),
                reason,
            })?;
        info!(operator = name, "operator_restarted");
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<OperatorRecord> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries.get(name).map(|entry| entry.record.clone())
    }

    /// All operators ordered by name.
    pub fn list(&self) -> Vec<OperatorRecord> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries.values().map(|entry| entry.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, topic: &str, payload: Value) {
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(topic, payload) {
                warn!(topic, "operator_publish_failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn mutations_fan_out_in_order() {
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = bus
            .subscribe("operator.*", move |topic, payload| {
                let name = payload.get("name").and_then(Value::as_str).unwrap_or("");
                sink.lock().expect("lock").push(format!("{topic}:{name}"));
                Ok(())
            })
            .expect("subscribe");
        let registry = OperatorRegistry::with_bus(bus);

        registry
            .register(OperatorRecord::new("scout", "explorer"), None)
            .expect("register");
        registry
            .update_status("scout", OperatorStatus::Busy, "indexing")
            .expect("status");
        assert!(registry.remove("scout").is_some());
        assert!(registry.remove("scout").is_none());

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                "operator.registered:scout",
                "operator.status:scout",
                "operator.removed:scout",
            ]
        );
    }

    #[test]
    fn restart_reports_missing_hooks_and_propagates_faults() {
        let registry = OperatorRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: Arc<dyn RestartHook> = Arc::new(move |_: &OperatorRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let record = registry
            .register(OperatorRecord::new("builder", "ci"), Some(hook))
            .expect("register");
        assert!(record.restartable);
        registry
            .register(OperatorRecord::new("plain", "notes"), None)
            .expect("register");
        let failing: Arc<dyn RestartHook> =
            Arc::new(|_: &OperatorRecord| Err("exec failed".to_string()));
        registry
            .register(OperatorRecord::new("broken", "ci"), Some(failing))
            .expect("register");

        assert!(registry.restart("builder").expect("restart"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.restart("plain").expect("restart"));
        assert!(matches!(
            registry.restart("broken"),
            Err(OperatorError::RestartFailed { .. })
        ));
        assert!(matches!(registry.restart("ghost"), Err(OperatorError::NotFound(_))));
        assert!(matches!(
            registry.update_status("ghost", OperatorStatus::Error, ""),
            Err(OperatorError::NotFound(_))
        ));
    }

    #[test]
    fn handlers_and_hooks_may_reenter() {
        let bus = Bus::new();
        let registry = Arc::new(OperatorRegistry::with_bus(bus.clone()));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let inner_registry = Arc::clone(&registry);
        let sink = Arc::clone(&observed);
        let _sub = bus
            .subscribe("operator.status", move |_, _| {
                let statuses: Vec<OperatorStatus> =
                    inner_registry.list().into_iter().map(|record| record.status).collect();
                sink.lock().expect("lock").extend(statuses);
                Ok(())
            })
            .expect("subscribe");

        let hook_registry = Arc::clone(&registry);
        let hook: Arc<dyn RestartHook> = Arc::new(move |record: &OperatorRecord| {
            hook_registry
                .update_status(&record.name, OperatorStatus::Listening, "restarted")
                .map(|_| ())
                .map_err(|err| err.to_string())
        });
        registry
            .register(OperatorRecord::new("echo", "relay"), Some(hook))
            .expect("register");
        assert!(registry.restart("echo").expect("restart"));
        assert_eq!(*observed.lock().expect("lock"), vec![OperatorStatus::Listening]);
        assert_eq!(
            registry.get("echo").expect("echo").status_detail,
            "restarted"
        );
    }
}
