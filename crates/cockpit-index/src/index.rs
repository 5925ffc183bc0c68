use crate::embed::{cosine, Embedder, HashingEmbedder};
use crate::policy::{read_text_lossy, IgnorePolicy};
use crate::search::{keyword_search, rank, SearchHit};
use crate::segment::{segment_file, Language, SegmentLimits};
use crate::IndexError;
use cockpit_core::{now_ts, CockpitConfig, CockpitPaths, Extra, IndexSegment, SegmentKind};
use cockpit_safety::{GuardedFs, OpenMode, SafetyError};
use serde::Serialize;
use serde_json::{json, Map};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const EMBED_BATCH: usize = 64;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub repo_root: PathBuf,
    pub extra_roots: Vec<PathBuf>,
    /// The datasets directory; the index lives at `repo_index/index.jsonl`.
    pub data_root: PathBuf,
    pub embeddings: bool,
    pub block_lines: usize,
    pub small_file_lines: usize,
    pub max_file_bytes: u64,
}

impl IndexConfig {
    pub fn new(repo_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            extra_roots: Vec::new(),
            data_root: data_root.into(),
            embeddings: true,
            block_lines: 200,
            small_file_lines: 400,
            max_file_bytes: 1024 * 1024,
        }
    }

    pub fn from_cockpit(paths: &CockpitPaths, config: &CockpitConfig) -> Self {
        let mut index = Self::new(&paths.workspace_root, &paths.datasets_root);
        index.extra_roots = config.extra_index_roots.clone();
        index.embeddings = config.embeddings;
        index
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_root.join("repo_index").join("index.jsonl")
    }

    /// The primary root followed by extra roots, deduplicated.
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        std::iter::once(&self.repo_root)
            .chain(self.extra_roots.iter())
            .map(|root| fs::canonicalize(root).unwrap_or_else(|_| root.clone()))
            .filter(|root| seen.insert(root.clone()))
            .collect()
    }

    pub fn ignore_policy(&self) -> IgnorePolicy {
        IgnorePolicy::new().exclude(&self.data_root)
    }

    fn limits(&self) -> SegmentLimits {
        SegmentLimits {
            block_lines: self.block_lines,
            small_file_lines: self.small_file_lines,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RebuildSummary {
    pub files_indexed: usize,
    pub segments: usize,
    pub timestamp: f64,
    pub index_path: PathBuf,
}

/// Segment-level content index over one or more scan roots.
pub struct RepoIndex {
    config: IndexConfig,
    fs: GuardedFs,
    embedder: Option<Arc<dyn Embedder>>,
    segments: RwLock<Vec<IndexSegment>>,
}

impl RepoIndex {
    pub fn new(config: IndexConfig, fs: GuardedFs) -> Self {
        let embedder: Option<Arc<dyn Embedder>> = if config.embeddings {
            Some(Arc::new(HashingEmbedder::default()))
        } else {
            None
        };
        Self {
            config,
            fs,
            embedder,
            segments: RwLock::new(Vec::new()),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        if self.config.embeddings {
            self.embedder = Some(embedder);
        }
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.index_path()
    }

    /// Walks every scan root, segments and embeds each file, and replaces
    /// the on-disk index atomically.
    pub fn rebuild(&self) -> Result<RebuildSummary, IndexError> {
        let policy = self.config.ignore_policy();
        let mut segments = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut files_indexed = 0;

        for root in self.config.scan_roots() {
            if !root.is_dir() {
                warn!(root = %root.display(), "index_root_missing");
                continue;
            }
            let scan_root = root.to_string_lossy().to_string();
            for entry in policy.walk(&root) {
                if entry.is_dir {
                    continue;
                }
                let size = fs::metadata(&entry.path).map(|meta| meta.len()).unwrap_or(0);
                if size > self.config.max_file_bytes {
                    debug!(path = %entry.rel, size, "index_file_too_large");
                    continue;
                }
                let Some(content) = read_text_lossy(&entry.path) else {
                    continue;
                };
                let language = Language::detect(&entry.path);
                let raw_segments = segment_file(&content, language, self.config.limits());
                if raw_segments.is_empty() {
                    continue;
                }
                files_indexed += 1;
                for raw in raw_segments {
                    let id = segment_id(&scan_root, &entry.rel, raw.kind, raw.start_line, &raw.text);
                    if !seen_ids.insert(id.clone()) {
                        continue;
                    }
                    let mut metadata = Map::new();
                    metadata.insert("scan_root".to_string(), json!(scan_root));
                    metadata.insert("rel_path".to_string(), json!(entry.rel));
                    if let Some(name) = &raw.name {
                        metadata.insert("name".to_string(), json!(name));
                    }
                    segments.push(IndexSegment {
                        id,
                        path: entry.rel.clone(),
                        scan_root: scan_root.clone(),
                        kind: raw.kind,
                        language: language.as_str().to_string(),
                        start_line: raw.start_line,
                        end_line: raw.end_line,
                        text: raw.text,
                        embedding: None,
                        metadata,
                        extra: Extra::new(),
                    });
                }
            }
        }

        self.embed_segments(&mut segments);

        let mut buffer = Vec::new();
        for segment in &segments {
            serde_json::to_writer(&mut buffer, segment)
                .map_err(|err| IndexError::Encode(err.to_string()))?;
            buffer.push(b'\n');
        }
        let index_path = self.index_path();
        self.fs.write_atomic(&index_path, &buffer)?;

        let summary = RebuildSummary {
            files_indexed,
            segments: segments.len(),
            timestamp: now_ts(),
            index_path,
        };
        info!(
            files = summary.files_indexed,
            segments = summary.segments,
            "index_rebuilt"
        );
        *self.write_segments() = segments;
        Ok(summary)
    }

    /// Embeds every segment or none of them; a failed batch clears the
    /// vectors already assigned during this rebuild.
    fn embed_segments(&self, segments: &mut [IndexSegment]) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        let mut failed = false;
        for chunk in segments.chunks_mut(EMBED_BATCH) {
            let texts: Vec<&str> = chunk.iter().map(|segment| segment.text.as_str()).collect();
            match embedder.embed(&texts) {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    for (segment, vector) in chunk.iter_mut().zip(vectors) {
                        segment.embedding = Some(vector);
                    }
                    continue;
                }
                Ok(vectors) => warn!(
                    embedder = embedder.name(),
                    expected = chunk.len(),
                    got = vectors.len(),
                    "embedding_count_mismatch"
                ),
                Err(err) => warn!(embedder = embedder.name(), "embedding_failed: {err}"),
            }
            failed = true;
            break;
        }
        if failed {
            for segment in segments.iter_mut() {
                segment.embedding = None;
            }
        }
    }

    /// Reads the on-disk index into memory and returns the segment count.
    pub fn load(&self) -> Result<usize, IndexError> {
        let path = self.index_path();
        let mut file = match self.fs.open(&path, OpenMode::Read) {
            Ok(file) => file,
            Err(SafetyError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Err(IndexError::Missing(path));
            }
            Err(err) => return Err(err.into()),
        };
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|err| SafetyError::io(&path, err))?;

        let mut segments = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexSegment>(line) {
                Ok(segment) => segments.push(segment),
                Err(err) => warn!("index_line_skipped: {}:{}: {err}", path.display(), idx + 1),
            }
        }
        let count = segments.len();
        *self.write_segments() = segments;
        Ok(count)
    }

    /// Loads the index when nothing is cached yet, rebuilding if the file is
    /// missing.
    pub fn ensure_loaded(&self) -> Result<usize, IndexError> {
        let cached = self.read_segments().len();
        if cached > 0 {
            return Ok(cached);
        }
        match self.load() {
            Err(IndexError::Missing(_)) => self.rebuild().map(|summary| summary.segments),
            other => other,
        }
    }

    pub fn iter_segments(&self) -> std::vec::IntoIter<IndexSegment> {
        self.read_segments().clone().into_iter()
    }

    pub fn len(&self) -> usize {
        self.read_segments().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `k` segments by cosine similarity, or by keyword score when
    /// embeddings are off or unavailable.
    pub fn search(&self, text: &str, k: usize) -> Vec<SearchHit> {
        if k == 0 || text.trim().is_empty() {
            return Vec::new();
        }
        let segments = self.read_segments();
        if let Some(hits) = self.vector_search(&segments, text, k) {
            return hits;
        }
        keyword_search(&segments, text, k)
    }

    fn vector_search(&self, segments: &[IndexSegment], text: &str, k: usize) -> Option<Vec<SearchHit>> {
        let embedder = self.embedder.as_ref()?;
        if segments.is_empty() || segments.iter().any(|segment| segment.embedding.is_none()) {
            return None;
        }
        let query = match embedder.embed(&[text]) {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return None,
            Err(err) => {
                warn!(embedder = embedder.name(), "query_embedding_failed: {err}");
                return None;
            }
        };
        let mut hits: Vec<SearchHit> = segments
            .iter()
            .filter_map(|segment| {
                let score = cosine(&query, segment.embedding.as_deref()?);
                (score > 0.0).then(|| SearchHit {
                    score,
                    segment: segment.clone(),
                })
            })
            .collect();
        if hits.is_empty() {
            return None;
        }
        rank(&mut hits);
        hits.truncate(k);
        Some(hits)
    }

    fn read_segments(&self) -> std::sync::RwLockReadGuard<'_, Vec<IndexSegment>> {
        self.segments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_segments(&self) -> std::sync::RwLockWriteGuard<'_, Vec<IndexSegment>> {
        self.segments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Content address of a segment: stable while root, path, kind, start line
/// and text are unchanged.
pub fn segment_id(scan_root: &str, path: &str, kind: SegmentKind, start_line: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [scan_root, path, kind.as_str(), &start_line.to_string(), text] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, String> {
            Err("model offline".to_string())
        }
    }

    /// Delegates to the hashing embedder but fails its second call.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl Embedder for FlakyEmbedder {
        fn name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err("batch timed out".to_string());
            }
            self.inner.embed(texts)
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn segment_ids_are_content_addressed() {
        let a = segment_id("/r", "a.rs", SegmentKind::Function, 1, "fn a() {}");
        assert_eq!(a, segment_id("/r", "a.rs", SegmentKind::Function, 1, "fn a() {}"));
        assert_ne!(a, segment_id("/r", "a.rs", SegmentKind::Function, 2, "fn a() {}"));
        assert_ne!(a, segment_id("/other", "a.rs", SegmentKind::Function, 1, "fn a() {}"));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn embedding_failure_degrades_to_keyword_search() {
        let dir = TempDir::new().expect("temp dir");
        let repo = dir.path().join("repo");
        write(&repo, "src/watch.py", "def start_watchdog():\n    return True\n");
        write(&repo, "src/other.py", "def render():\n    return False\n");
        let config = IndexConfig::new(&repo, dir.path().join("datasets"));
        let index = RepoIndex::new(config, GuardedFs::unguarded()).with_embedder(Arc::new(BrokenEmbedder));

        let summary = index.rebuild().expect("rebuild");
        assert_eq!(summary.files_indexed, 2);
        assert!(index.iter_segments().all(|segment| segment.embedding.is_none()));

        let hits = index.search("watchdog", 3);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].segment.path, "src/watch.py");
    }

    #[test]
    fn failed_later_batch_leaves_no_segment_embedded() {
        let dir = TempDir::new().expect("temp dir");
        let repo = dir.path().join("repo");
        let notes = EMBED_BATCH + 6;
        for idx in 0..notes {
            write(&repo, &format!("notes/n{idx:03}.md"), &format!("# Note {idx}\ntopic{idx}\n"));
        }
        let config = IndexConfig::new(&repo, dir.path().join("datasets"));
        let embedder = FlakyEmbedder {
            inner: HashingEmbedder::default(),
            calls: AtomicUsize::new(0),
        };
        let index = RepoIndex::new(config, GuardedFs::unguarded()).with_embedder(Arc::new(embedder));

        let summary = index.rebuild().expect("rebuild");
        assert_eq!(summary.segments, notes);
        assert!(index.iter_segments().all(|segment| segment.embedding.is_none()));

        let last = format!("topic{}", notes - 1);
        let hits = index.search(&last, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].segment.path, format!("notes/n{:03}.md", notes - 1));
    }

    #[test]
    fn ensure_loaded_rebuilds_when_index_is_missing() {
        let dir = TempDir::new().expect("temp dir");
        let repo = dir.path().join("repo");
        write(&repo, "notes.md", "# Notes\nremember the bus\n");
        let mut config = IndexConfig::new(&repo, dir.path().join("datasets"));
        config.embeddings = false;
        let index = RepoIndex::new(config, GuardedFs::unguarded());
        assert!(matches!(index.load(), Err(IndexError::Missing(_))));
        assert_eq!(index.ensure_loaded().expect("ensure"), 1);
        assert!(index.index_path().exists());
    }
}
