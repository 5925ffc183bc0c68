use crate::PromptError;
use cockpit_core::{CockpitPaths, PromptDefinition};
use cockpit_safety::{GuardedFs, OpenMode, SafetyError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// `(mtime, len)` of a file, `None` when absent.
type FileStamp = Option<(SystemTime, u64)>;

fn stamp(path: &Path) -> FileStamp {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

#[derive(Default)]
struct Cached {
    key: Option<(FileStamp, FileStamp)>,
    text: String,
}

/// One prompt backed by `<slug>.txt` plus an optional `<slug>.overlay.txt`.
pub struct PromptWatcher {
    definition: PromptDefinition,
    dir: PathBuf,
    fs: GuardedFs,
    cache: Mutex<Cached>,
}

impl PromptWatcher {
    pub fn new(definition: PromptDefinition, dir: impl Into<PathBuf>, fs: GuardedFs) -> Self {
        Self {
            definition,
            dir: dir.into(),
            fs,
            cache: Mutex::new(Cached::default()),
        }
    }

    pub fn definition(&self) -> &PromptDefinition {
        &self.definition
    }

    pub fn base_path(&self) -> PathBuf {
        self.dir.join(format!("{}.txt", self.definition.slug))
    }

    pub fn overlay_path(&self) -> PathBuf {
        self.dir.join(format!("{}.overlay.txt", self.definition.slug))
    }

    /// The current prompt text, reloaded when either file changed since the
    /// last read. The base file is seeded with the default on first access.
    pub fn text(&self) -> Result<String, PromptError> {
        let base_path = self.base_path();
        let overlay_path = self.overlay_path();
        let mut cache = self.cache.lock();
        if cache.key.is_none() && !base_path.exists() && !self.definition.default_text.trim().is_empty() {
            self.fs
                .write_atomic(&base_path, self.definition.default_text.as_bytes())?;
            info!(slug = %self.definition.slug, "prompt_seeded");
        }

        let key = (stamp(&base_path), stamp(&overlay_path));
        if cache.key.as_ref() == Some(&key) {
            return Ok(cache.text.clone());
        }
        let base = self.read_optional(&base_path)?;
        let overlay = self.read_optional(&overlay_path)?;
        cache.text = compose(&self.definition.default_text, &base, &overlay);
        cache.key = Some(key);
        debug!(slug = %self.definition.slug, "prompt_reloaded");
        Ok(cache.text.clone())
    }

    /// True when the files changed since the cached text was built.
    pub fn is_stale(&self) -> bool {
        let key = (stamp(&self.base_path()), stamp(&self.overlay_path()));
        self.cache.lock().key.as_ref() != Some(&key)
    }

    pub fn write_overlay(&self, text: &str) -> Result<(), PromptError> {
        self.fs.write_atomic(&self.overlay_path(), text.as_bytes())?;
        self.cache.lock().key = None;
        Ok(())
    }

    /// Removes the overlay; a missing overlay is not an error.
    pub fn clear_overlay(&self) -> Result<(), PromptError> {
        match self.fs.remove_file(&self.overlay_path()) {
            Ok(()) => {}
            Err(SafetyError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.cache.lock().key = None;
        Ok(())
    }

    fn read_optional(&self, path: &Path) -> Result<String, PromptError> {
        let mut file = match self.fs.open(path, OpenMode::Read) {
            Ok(file) => file,
            Err(SafetyError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(String::new());
            }
            Err(err) => return Err(err.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|err| SafetyError::io(path, err))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// `strip(base) + "\n\n" + strip(overlay)` with blank parts dropped. The
/// default only stands in when both files are blank.
fn compose(default_text: &str, base: &str, overlay: &str) -> String {
    let base = base.trim();
    let overlay = overlay.trim();
    match (base.is_empty(), overlay.is_empty()) {
        (false, false) => format!("{base}\n\n{overlay}"),
        (false, true) => base.to_string(),
        (true, false) => overlay.to_string(),
        (true, true) => default_text.trim().to_string(),
    }
}

fn validate_slug(slug: &str) -> Result<(), PromptError> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(PromptError::InvalidSlug(slug.to_string()))
    }
}

/// Registered prompts under one directory, keyed by slug.
pub struct PromptStore {
    dir: PathBuf,
    fs: GuardedFs,
    watchers: Mutex<BTreeMap<String, Arc<PromptWatcher>>>,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>, fs: GuardedFs) -> Self {
        Self {
            dir: dir.into(),
            fs,
            watchers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_paths(paths: &CockpitPaths, fs: GuardedFs) -> Self {
        Self::new(paths.prompts_dir(), fs)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registers `definition`, replacing any watcher with the same slug.
    pub fn register(&self, definition: PromptDefinition) -> Result<Arc<PromptWatcher>, PromptError> {
        validate_slug(&definition.slug)?;
        let slug = definition.slug.clone();
        let watcher = Arc::new(PromptWatcher::new(definition, &self.dir, self.fs.clone()));
        self.watchers.lock().insert(slug, Arc::clone(&watcher));
        Ok(watcher)
    }

    pub fn get(&self, slug: &str) -> Option<Arc<PromptWatcher>> {
        self.watchers.lock().get(slug).cloned()
    }

    pub fn definitions(&self) -> Vec<PromptDefinition> {
        self.watchers
            .lock()
            .values()
            .map(|watcher| watcher.definition().clone())
            .collect()
    }

    pub fn text(&self, slug: &str) -> Result<String, PromptError> {
        self.watcher(slug)?.text()
    }

    pub fn write_overlay(&self, slug: &str, text: &str) -> Result<(), PromptError> {
        self.watcher(slug)?.write_overlay(text)
    }

    pub fn clear_overlay(&self, slug: &str) -> Result<(), PromptError> {
        self.watcher(slug)?.clear_overlay()
    }

    fn watcher(&self, slug: &str) -> Result<Arc<PromptWatcher>, PromptError> {
        self.get(slug)
            .ok_or_else(|| PromptError::UnknownSlug(slug.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_safety::SafetyManager;
    use tempfile::TempDir;

    fn definition(default_text: &str) -> PromptDefinition {
        PromptDefinition::new("planner", "Planner", default_text)
    }

    #[test]
    fn composition_rules() {
        assert_eq!(compose("dflt", "  base \n", " over "), "base\n\nover");
        assert_eq!(compose("dflt", "", ""), "dflt");
        assert_eq!(compose("dflt", "\n", "extra"), "extra");
        assert_eq!(compose("dflt", "base", "  \n"), "base");
        assert_eq!(compose("", "", "extra"), "extra");
        assert_eq!(compose("", "", ""), "");
    }

    #[test]
    fn first_access_seeds_base_file() {
        let dir = TempDir::new().expect("temp dir");
        let watcher = PromptWatcher::new(definition("Plan carefully."), dir.path(), GuardedFs::unguarded());
        assert_eq!(watcher.text().expect("text"), "Plan carefully.");
        assert_eq!(
            fs::read_to_string(watcher.base_path()).expect("seeded"),
            "Plan carefully."
        );

        let empty = PromptWatcher::new(
            PromptDefinition::new("blank", "Blank", ""),
            dir.path(),
            GuardedFs::unguarded(),
        );
        assert_eq!(empty.text().expect("text"), "");
        assert!(!empty.base_path().exists());
    }

    #[test]
    fn edits_and_overlays_are_picked_up() {
        let dir = TempDir::new().expect("temp dir");
        let watcher = PromptWatcher::new(definition("default"), dir.path(), GuardedFs::unguarded());
        watcher.text().expect("seed");

        fs::write(watcher.base_path(), "edited base with more bytes\n").expect("edit base");
        assert!(watcher.is_stale());
        assert_eq!(watcher.text().expect("text"), "edited base with more bytes");
        assert!(!watcher.is_stale());

        watcher.write_overlay("\nlocal tweak\n").expect("overlay");
        assert_eq!(
            watcher.text().expect("text"),
            "edited base with more bytes\n\nlocal tweak"
        );
        watcher.clear_overlay().expect("clear");
        watcher.clear_overlay().expect("clear twice");
        assert_eq!(watcher.text().expect("text"), "edited base with more bytes");
    }

    #[test]
    fn blank_base_with_overlay_yields_only_the_overlay() {
        let dir = TempDir::new().expect("temp dir");
        let watcher = PromptWatcher::new(definition("default"), dir.path(), GuardedFs::unguarded());
        fs::write(watcher.base_path(), "  \n").expect("blank base");
        watcher.write_overlay("only the overlay\n").expect("overlay");
        assert_eq!(watcher.text().expect("text"), "only the overlay");

        watcher.clear_overlay().expect("clear");
        assert_eq!(watcher.text().expect("text"), "default");
    }

    #[test]
    fn store_routes_by_slug_and_honours_protection() {
        let dir = TempDir::new().expect("temp dir");
        let safety = Arc::new(SafetyManager::new());
        safety.install_file_guard();
        let store = PromptStore::new(dir.path(), GuardedFs::new(Arc::clone(&safety)));
        store.register(definition("default")).expect("register");
        assert!(matches!(
            store.register(PromptDefinition::new("../escape", "Bad", "")),
            Err(PromptError::InvalidSlug(_))
        ));
        assert!(matches!(store.text("missing"), Err(PromptError::UnknownSlug(_))));
        assert_eq!(store.text("planner").expect("text"), "default");

        safety.add_protected_path(dir.path().join("planner.overlay.txt"));
        assert!(matches!(
            store.write_overlay("planner", "nope"),
            Err(PromptError::Fs(SafetyError::Violation(_)))
        ));
        assert_eq!(store.definitions().len(), 1);
    }
}
