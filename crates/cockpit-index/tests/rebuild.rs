use cockpit_index::{IndexConfig, ReferenceHelper, RepoIndex};
use cockpit_safety::GuardedFs;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn sample_repo(root: &Path) {
    write(
        root,
        "src/bus.rs",
        "pub struct Bus;\n\nimpl Bus {\n    pub fn publish(&self) {}\n}\n\npub fn subscribe() {}\n",
    );
    write(root, "README.md", "# Cockpit\nintro\n\n## Usage\nrun the index\n");
    write(root, "data/notes.txt", "free form notes about the journal\n");
    write(root, ".git/HEAD", "ref: refs/heads/main\n");
}

#[test]
fn segment_ids_survive_rebuilds_of_unchanged_content() {
    let dir = TempDir::new().expect("temp dir");
    let repo = dir.path().join("repo");
    sample_repo(&repo);
    let index = RepoIndex::new(
        IndexConfig::new(&repo, repo.join("datasets")),
        GuardedFs::unguarded(),
    );

    let first = index.rebuild().expect("first rebuild");
    let first_ids: Vec<String> = index.iter_segments().map(|segment| segment.id).collect();
    let unique: HashSet<&String> = first_ids.iter().collect();
    assert_eq!(unique.len(), first_ids.len());
    assert_eq!(first.files_indexed, 3);
    assert!(index
        .iter_segments()
        .all(|segment| !segment.path.starts_with(".git") && !segment.path.starts_with("datasets")));

    let second = index.rebuild().expect("second rebuild");
    let second_ids: Vec<String> = index.iter_segments().map(|segment| segment.id).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(first.segments, second.segments);

    let reloaded = RepoIndex::new(
        IndexConfig::new(&repo, repo.join("datasets")),
        GuardedFs::unguarded(),
    );
    assert_eq!(reloaded.load().expect("load"), second.segments);
    let reloaded_ids: Vec<String> = reloaded.iter_segments().map(|segment| segment.id).collect();
    assert_eq!(reloaded_ids, second_ids);
}

#[test]
fn search_returns_at_most_k_hits_best_first() {
    let dir = TempDir::new().expect("temp dir");
    let repo = dir.path().join("repo");
    sample_repo(&repo);

    for embeddings in [true, false] {
        let mut config = IndexConfig::new(&repo, dir.path().join("datasets"));
        config.embeddings = embeddings;
        let index = RepoIndex::new(config, GuardedFs::unguarded());
        index.rebuild().expect("rebuild");

        let hits = index.search("publish bus", 2);
        assert!(!hits.is_empty() && hits.len() <= 2, "embeddings={embeddings}");
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(hits[0].segment.path, "src/bus.rs");
        assert!(index.search("", 3).is_empty());
    }
}

#[test]
fn extra_roots_record_their_scan_root() {
    let dir = TempDir::new().expect("temp dir");
    let repo = dir.path().join("repo");
    let shared = dir.path().join("shared");
    write(&repo, "main.py", "def main():\n    pass\n");
    write(&shared, "helpers.py", "def helper():\n    pass\n");

    let mut config = IndexConfig::new(&repo, dir.path().join("datasets"));
    config.extra_roots.push(shared.clone());
    config.embeddings = false;
    let index = RepoIndex::new(config, GuardedFs::unguarded());
    let summary = index.rebuild().expect("rebuild");
    assert_eq!(summary.files_indexed, 2);

    let shared_root = fs::canonicalize(&shared).expect("canonical shared");
    let helper_segment = index
        .iter_segments()
        .find(|segment| segment.path == "helpers.py")
        .expect("helper segment");
    assert_eq!(helper_segment.scan_root, shared_root.to_string_lossy());
    assert_eq!(
        helper_segment.metadata.get("scan_root").and_then(|v| v.as_str()),
        Some(shared_root.to_string_lossy().to_string().as_str())
    );

    let references = ReferenceHelper::from_index(&index);
    let hits = references.suggestions("helpers", 5);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].absolute_path, shared_root.join("helpers.py"));
}
