use crate::collector::{collect_metrics, MetricsRequest, MetricsSummary};
use cockpit_core::{Bus, PeriodicTask};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Collects metrics on a timer and publishes every summary on
/// `system.metrics`.
pub struct MetricsJob {
    task: PeriodicTask,
    latest: Arc<Mutex<Option<MetricsSummary>>>,
}

impl MetricsJob {
    pub fn start(request: MetricsRequest, interval: Duration, bus: Option<Bus>) -> std::io::Result<Self> {
        let latest = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest);
        let task = PeriodicTask::start("metrics", interval, move || {
            let summary = collect_metrics(&request).map_err(|err| err.to_string())?;
            if let Some(bus) = &bus {
                if let Err(err) = bus.publish_json("system.metrics", &summary) {
                    warn!("metrics_publish_failed: {err}");
                }
            }
            *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary);
            Ok(())
        })?;
        Ok(Self { task, latest })
    }

    /// The summary from the most recent successful run.
    pub fn latest(&self) -> Option<MetricsSummary> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn stop(&mut self) {
        self.task.stop();
    }
}
