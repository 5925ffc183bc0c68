use crate::guarded::OpenMode;
use crate::risk::{classify_command, RiskMatch, RiskRule};
use crate::SafetyError;
use cockpit_core::Bus;
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Violation,
    Approved,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SafetyNotice {
    pub kind: NoticeKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub argv: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RiskRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub argv: Vec<String>,
    pub risk: RiskMatch,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &SafetyNotice);
}

impl<F> Notifier for F
where
    F: Fn(&SafetyNotice) + Send + Sync,
{
    fn notify(&self, notice: &SafetyNotice) {
        self(notice)
    }
}

/// The single callback consulted before a risky command runs.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, request: &CommandRequest) -> bool;
}

impl<F> Confirmer for F
where
    F: Fn(&CommandRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &CommandRequest) -> bool {
        self(request)
    }
}

#[derive(Default)]
pub struct SafetyManager {
    protected_paths: RwLock<BTreeSet<PathBuf>>,
    protected_dirs: RwLock<BTreeSet<PathBuf>>,
    guard_installed: AtomicBool,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    confirmer: RwLock<Option<Arc<dyn Confirmer>>>,
    bus: Option<Bus>,
}

impl SafetyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(bus: Bus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::default()
        }
    }

    pub fn add_protected_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let normalized = normalize_path(path.as_ref());
        write_lock(&self.protected_paths).insert(normalized.clone());
        normalized
    }

    pub fn add_protected_directory(&self, path: impl AsRef<Path>) -> PathBuf {
        let normalized = normalize_path(path.as_ref());
        write_lock(&self.protected_dirs).insert(normalized.clone());
        normalized
    }

    pub fn remove_protected_path(&self, path: impl AsRef<Path>) -> bool {
        write_lock(&self.protected_paths).remove(&normalize_path(path.as_ref()))
    }

    pub fn remove_protected_directory(&self, path: impl AsRef<Path>) -> bool {
        write_lock(&self.protected_dirs).remove(&normalize_path(path.as_ref()))
    }

    pub fn is_protected(&self, path: impl AsRef<Path>) -> bool {
        let normalized = normalize_path(path.as_ref());
        if read_lock(&self.protected_paths).contains(&normalized) {
            return true;
        }
        read_lock(&self.protected_dirs)
            .iter()
            .any(|dir| normalized.starts_with(dir))
    }

    /// Turns on protected-path enforcement in every `GuardedFs` sharing this
    /// manager.
    pub fn install_file_guard(&self) {
        if !self.guard_installed.swap(true, Ordering::AcqRel) {
            info!("file_guard_installed");
        }
    }

    pub fn uninstall_file_guard(&self) {
        self.guard_installed.store(false, Ordering::Release);
    }

    pub fn is_guard_installed(&self) -> bool {
        self.guard_installed.load(Ordering::Acquire)
    }

    pub fn add_notifier(&self, notifier: impl Notifier + 'static) {
        write_lock(&self.notifiers).push(Arc::new(notifier));
    }

    pub fn set_confirmer(&self, confirmer: impl Confirmer + 'static) {
        *write_lock(&self.confirmer) = Some(Arc::new(confirmer));
    }

    pub fn clear_confirmer(&self) {
        *write_lock(&self.confirmer) = None;
    }

    /// Fails with a safety violation when `mode` would write to a protected
    /// path while the guard is installed.
    pub fn check_write(&self, path: &Path, mode: OpenMode) -> Result<(), SafetyError> {
        if !self.is_guard_installed() || !mode.is_guarded_write() {
            return Ok(());
        }
        if !self.is_protected(path) {
            return Ok(());
        }
        let message = format!("blocked {} of protected path {}", mode.as_str(), path.display());
        self.dispatch(SafetyNotice {
            kind: NoticeKind::Violation,
            message: message.clone(),
            path: Some(path.to_path_buf()),
            argv: Vec::new(),
            rule: None,
        });
        Err(SafetyError::Violation(message))
    }

    pub fn ensure_command_allowed(&self, argv: &[String]) -> Result<(), SafetyError> {
        let Some(risk) = classify_command(argv) else {
            return Ok(());
        };
        let request = CommandRequest {
            argv: argv.to_vec(),
            risk: risk.clone(),
        };
        let confirmer = read_lock(&self.confirmer).clone();
        let approved = match confirmer {
            Some(confirmer) => {
                match catch_unwind(AssertUnwindSafe(|| confirmer.confirm(&request))) {
                    Ok(approved) => approved,
                    Err(_) => {
                        error!(rule = %risk.rule, "confirmer_panicked");
                        false
                    }
                }
            }
            None => false,
        };

        if approved {
            self.dispatch(SafetyNotice {
                kind: NoticeKind::Approved,
                message: format!("approved risky command: {}", risk.reason),
                path: None,
                argv: argv.to_vec(),
                rule: Some(risk.rule),
            });
            return Ok(());
        }

        let message = format!("denied risky command: {}", risk.reason);
        self.dispatch(SafetyNotice {
            kind: NoticeKind::Violation,
            message: message.clone(),
            path: None,
            argv: argv.to_vec(),
            rule: Some(risk.rule),
        });
        Err(SafetyError::Violation(message))
    }

    fn dispatch(&self, notice: SafetyNotice) {
        match notice.kind {
            NoticeKind::Violation => warn!("safety_violation: {}", notice.message),
            NoticeKind::Approved => info!("safety_approved: {}", notice.message),
        }

        let notifiers: Vec<Arc<dyn Notifier>> = read_lock(&self.notifiers).clone();
        for notifier in notifiers {
            if catch_unwind(AssertUnwindSafe(|| notifier.notify(&notice))).is_err() {
                error!("safety_notifier_panicked");
            }
        }

        if let Some(bus) = &self.bus {
            let topic = match notice.kind {
                NoticeKind::Violation => "safety.violation",
                NoticeKind::Approved => "safety.approved",
            };
            if let Err(err) = bus.publish_json(topic, &notice) {
                warn!("safety_publish_failed: {err}");
            }
        }
    }
}

/// Expands `~`, makes the path absolute and resolves symlinks for the
/// longest existing prefix. Missing tails are cleaned lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let expanded = expand_user(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };
    let cleaned = clean_lexically(&absolute);

    let mut existing = cleaned.clone();
    let mut tail = Vec::new();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            let mut out = resolved;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|name| name.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return cleaned,
        }
    }
}

fn expand_user(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn clean_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
