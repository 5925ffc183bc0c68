//! Background jobs on dedicated threads: a single-shot-rescheduling
//! periodic task and a one-shot debouncer.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs `job` once at start, then re-arms a single timer after every run,
/// whether it succeeded or failed. Stopping cancels the pending timer.
pub struct PeriodicTask {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn start<F>(name: impl Into<String>, interval: Duration, mut job: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let task_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("cockpit-{name}"))
            .spawn(move || loop {
                if let Err(err) = job() {
                    warn!(task = %task_name, "periodic_task_failed: {err}");
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!(task = %task_name, "periodic_task_stopped");
                        break;
                    }
                }
            })?;
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancels the pending timer and waits for an in-flight run to finish.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        join_unless_current(self.handle.take());
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

enum DebounceMsg {
    Trigger,
    Stop,
}

/// Coalesces bursts of triggers: the callback fires once `delay` after the
/// last trigger.
pub struct Debouncer {
    tx: Sender<DebounceMsg>,
    handle: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn start<F>(name: impl Into<String>, delay: Duration, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<DebounceMsg>();
        let handle = thread::Builder::new()
            .name(format!("cockpit-{name}"))
            .spawn(move || {
                while let Ok(DebounceMsg::Trigger) = rx.recv() {
                    loop {
                        match rx.recv_timeout(delay) {
                            Ok(DebounceMsg::Trigger) => continue,
                            Err(RecvTimeoutError::Timeout) => {
                                callback();
                                break;
                            }
                            Ok(DebounceMsg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                }
            })?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Arms the timer, or resets it when already armed.
    pub fn trigger(&self) {
        let _ = self.tx.send(DebounceMsg::Trigger);
    }

    /// A cloneable trigger for other threads, such as watcher callbacks.
    pub fn trigger_handle(&self) -> DebounceTrigger {
        DebounceTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Drops any pending fire and joins the worker. Outstanding trigger
    /// handles become no-ops.
    pub fn stop(&mut self) {
        let _ = self.tx.send(DebounceMsg::Stop);
        join_unless_current(self.handle.take());
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
pub struct DebounceTrigger {
    tx: Sender<DebounceMsg>,
}

impl DebounceTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(DebounceMsg::Trigger);
    }
}

fn join_unless_current(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}
