use crate::reference::ReferenceHelper;
use crate::IndexError;
use cockpit_core::Debouncer;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const REFRESH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Keeps a [`ReferenceHelper`] current by watching its roots. When the
/// platform watcher cannot be created the watcher is degraded and callers
/// refresh by hand with [`ReferenceWatcher::refresh_now`].
pub struct ReferenceWatcher {
    helper: Arc<ReferenceHelper>,
    // Declared before the debouncer so the notify callback is gone before
    // the debounce thread is joined.
    watcher: Option<RecommendedWatcher>,
    debouncer: Option<Debouncer>,
    degraded: Option<String>,
}

impl ReferenceWatcher {
    pub fn start(helper: Arc<ReferenceHelper>) -> Self {
        Self::with_delay(helper, REFRESH_DEBOUNCE)
    }

    pub fn with_delay(helper: Arc<ReferenceHelper>, delay: Duration) -> Self {
        match Self::spawn(&helper, delay) {
            Ok((watcher, debouncer)) => Self {
                helper,
                watcher: Some(watcher),
                debouncer: Some(debouncer),
                degraded: None,
            },
            Err(err) => {
                warn!("reference_watch_failed: {err}");
                Self {
                    helper,
                    watcher: None,
                    debouncer: None,
                    degraded: Some(err.to_string()),
                }
            }
        }
    }

    fn spawn(
        helper: &Arc<ReferenceHelper>,
        delay: Duration,
    ) -> Result<(RecommendedWatcher, Debouncer), IndexError> {
        let refresh_target = Arc::clone(helper);
        let debouncer = Debouncer::start("reference-refresh", delay, move || {
            refresh_target.refresh();
        })
        .map_err(|err| IndexError::Watch(err.to_string()))?;

        let trigger = debouncer.trigger_handle();
        let filter_target = Arc::clone(helper);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let relevant = event.paths.iter().any(|path| {
                        filter_target
                            .roots()
                            .iter()
                            .any(|root| filter_target.policy().is_relevant(root, path))
                    });
                    if relevant {
                        trigger.trigger();
                    }
                }
                Err(err) => debug!("reference_watch_event_error: {err}"),
            },
            Config::default(),
        )
        .map_err(|err| IndexError::Watch(err.to_string()))?;

        let mut watched = 0;
        for root in helper.roots() {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => watched += 1,
                Err(err) => warn!(root = %root.display(), "reference_watch_root_failed: {err}"),
            }
        }
        if watched == 0 && !helper.roots().is_empty() {
            return Err(IndexError::Watch("no root could be watched".to_string()));
        }
        Ok((watcher, debouncer))
    }

    pub fn helper(&self) -> &Arc<ReferenceHelper> {
        &self.helper
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    /// Refreshes immediately, bypassing the debounce.
    pub fn refresh_now(&self) -> usize {
        self.helper.refresh()
    }

    pub fn stop(&mut self) {
        self.watcher.take();
        if let Some(mut debouncer) = self.debouncer.take() {
            debouncer.stop();
        }
    }
}

impl Drop for ReferenceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
