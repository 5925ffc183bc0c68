use anyhow::{Context, Result};
use cockpit_core::{Bus, CockpitConfig, CockpitPaths};
use cockpit_safety::{GuardedFs, SafetyManager};
use cockpit_storage::JournalStore;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Shared services for one CLI invocation. Every write goes through the
/// guarded filesystem built from the configured protected set.
pub struct CockpitContext {
    pub paths: CockpitPaths,
    pub config: CockpitConfig,
    pub bus: Bus,
    pub safety: Arc<SafetyManager>,
    pub fs: GuardedFs,
    pub journal: Arc<JournalStore>,
}

impl CockpitContext {
    pub fn open(workspace: Option<&Path>) -> Result<Self> {
        let paths = match workspace {
            Some(root) => CockpitPaths::new(root),
            None => CockpitPaths::resolve().context("Failed to resolve workspace root")?,
        };
        let config = CockpitConfig::load(&paths);
        Ok(Self::with_config(paths, config))
    }

    pub fn with_config(paths: CockpitPaths, config: CockpitConfig) -> Self {
        let bus = Bus::new();
        let safety = Arc::new(SafetyManager::with_bus(bus.clone()));
        for path in &config.protected_paths {
            safety.add_protected_path(path);
        }
        for dir in &config.protected_directories {
            safety.add_protected_directory(dir);
        }
        safety.install_file_guard();
        let fs = GuardedFs::new(Arc::clone(&safety));
        let journal = Arc::new(JournalStore::new(paths.clone(), fs.clone()).with_bus(bus.clone()));
        debug!(
            workspace = %paths.workspace_root.display(),
            datasets = %paths.datasets_root.display(),
            "context_opened"
        );
        Self {
            paths,
            config,
            bus,
            safety,
            fs,
            journal,
        }
    }
}
