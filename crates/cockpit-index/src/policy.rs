use ignore::WalkBuilder;
use std::fs;
use std::path::{Component, Path, PathBuf};

const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".cockpit",
    "node_modules",
    "target",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".cache",
    ".venv",
    "venv",
    ".tox",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "pdf", "zip", "gz", "tgz",
    "bz2", "xz", "7z", "rar", "tar", "jar", "war", "exe", "dll", "so", "dylib", "a", "o", "obj",
    "lib", "bin", "class", "pyc", "pyo", "whl", "wasm", "db", "sqlite", "sqlite3", "mp3", "mp4",
    "wav", "ogg", "flac", "mov", "avi", "mkv", "ttf", "otf", "woff", "woff2", "eot", "npy", "npz",
    "pt", "onnx", "parquet",
];

#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Relative to the scan root, forward slashes.
    pub rel: String,
    pub is_dir: bool,
}

/// Which files and directories the index and the reference helper skip:
/// VCS metadata, caches, binaries by extension, plus explicit extra paths
/// such as the datasets directory.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    excluded: Vec<PathBuf>,
}

impl IgnorePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(canonical_or_lexical(path.into()));
        self
    }

    pub fn is_skipped_dir_name(name: &str) -> bool {
        SKIP_DIRS.contains(&name)
    }

    pub fn is_binary(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// True when any component of `rel` is a skipped directory.
    pub fn skips_relative(&self, rel: &Path) -> bool {
        rel.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .map(Self::is_skipped_dir_name)
                .unwrap_or(false),
            _ => false,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|excluded| path.starts_with(excluded))
    }

    /// Whether a change at `path` (absolute) matters to anything walked
    /// under `root`.
    pub fn is_relevant(&self, root: &Path, path: &Path) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        match path.strip_prefix(root) {
            Ok(rel) => !self.skips_relative(rel),
            Err(_) => false,
        }
    }

    /// Files and directories under `root`, sorted by relative path. The root
    /// itself is not included.
    pub fn walk(&self, root: &Path) -> Vec<WalkEntry> {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let walker = WalkBuilder::new(&root)
            .standard_filters(true)
            .hidden(false)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !Self::is_skipped_dir_name(name))
                    .unwrap_or(true)
            })
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path().to_path_buf();
            if self.is_excluded(&path) {
                continue;
            }
            let Ok(rel_path) = path.strip_prefix(&root) else {
                continue;
            };
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if !is_dir && !is_file {
                continue;
            }
            if is_file && Self::is_binary(&path) {
                continue;
            }
            let rel = rel_path.to_string_lossy().replace('\\', "/");
            entries.push(WalkEntry { path, rel, is_dir });
        }
        entries.sort_by(|a, b| a.rel.cmp(&b.rel));
        entries
    }
}

/// Canonicalizes the deepest existing ancestor so paths that do not exist
/// yet still compare equal to walked paths.
fn canonical_or_lexical(path: PathBuf) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(&path) {
        return canonical;
    }
    let mut missing = Vec::new();
    let mut current = path.as_path();
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            missing.push(name.to_os_string());
        }
        if let Ok(base) = fs::canonicalize(parent) {
            return missing.iter().rev().fold(base, |acc, name| acc.join(name));
        }
        current = parent;
    }
    path
}

/// Reads `path` as text; invalid UTF-8 sequences are dropped. Blank files
/// yield `None`.
pub fn read_text_lossy(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    if bytes.iter().take(8000).any(|byte| *byte == 0) {
        return None;
    }
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let mut text = String::from_utf8_lossy(&err.into_bytes()).into_owned();
            text.retain(|ch| ch != '\u{FFFD}');
            text
        }
    };
    if content.trim().is_empty() {
        return None;
    }
    Some(content)
}
