use crate::index::RepoIndex;
use crate::policy::IgnorePolicy;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub relative_path: String,
    pub scan_root: PathBuf,
    pub absolute_path: PathBuf,
}

impl Suggestion {
    fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

#[derive(Default)]
struct Listing {
    files: Vec<Suggestion>,
    directories: Vec<Suggestion>,
}

/// File and directory completion over the index's scan roots.
pub struct ReferenceHelper {
    roots: Vec<PathBuf>,
    policy: IgnorePolicy,
    listing: RwLock<Listing>,
}

impl ReferenceHelper {
    pub fn new(roots: Vec<PathBuf>, policy: IgnorePolicy) -> Self {
        let helper = Self {
            roots,
            policy,
            listing: RwLock::new(Listing::default()),
        };
        helper.refresh();
        helper
    }

    /// Same roots and ignore policy as the index.
    pub fn from_index(index: &RepoIndex) -> Self {
        let config = index.config();
        Self::new(config.scan_roots(), config.ignore_policy())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn policy(&self) -> &IgnorePolicy {
        &self.policy
    }

    /// Re-walks every root. Returns the number of entries now listed.
    pub fn refresh(&self) -> usize {
        let mut listing = Listing::default();
        for root in &self.roots {
            for entry in self.policy.walk(root) {
                let suggestion = Suggestion {
                    kind: if entry.is_dir {
                        SuggestionKind::Directory
                    } else {
                        SuggestionKind::File
                    },
                    relative_path: entry.rel,
                    scan_root: root.clone(),
                    absolute_path: entry.path,
                };
                if entry.is_dir {
                    listing.directories.push(suggestion);
                } else {
                    listing.files.push(suggestion);
                }
            }
        }
        let total = listing.files.len() + listing.directories.len();
        debug!(
            files = listing.files.len(),
            directories = listing.directories.len(),
            "reference_refreshed"
        );
        *self
            .listing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = listing;
        total
    }

    pub fn file_count(&self) -> usize {
        self.read_listing().files.len()
    }

    pub fn directory_count(&self) -> usize {
        self.read_listing().directories.len()
    }

    /// Case-insensitive substring match on the relative path or file name.
    /// Prefix matches come first, then shorter paths, then alphabetical.
    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        if limit == 0 {
            return Vec::new();
        }
        let needle = query.trim().to_lowercase();
        let listing = self.read_listing();
        let mut ranked: Vec<(u8, &Suggestion)> = listing
            .files
            .iter()
            .chain(listing.directories.iter())
            .filter_map(|suggestion| {
                let rel = suggestion.relative_path.to_lowercase();
                let name = suggestion.file_name().to_lowercase();
                if rel.starts_with(&needle) || name.starts_with(&needle) {
                    Some((0, suggestion))
                } else if rel.contains(&needle) || name.contains(&needle) {
                    Some((1, suggestion))
                } else {
                    None
                }
            })
            .collect();
        ranked.sort_by(|(rank_a, a), (rank_b, b)| {
            rank_a
                .cmp(rank_b)
                .then_with(|| a.relative_path.len().cmp(&b.relative_path.len()))
                .then_with(|| a.relative_path.cmp(&b.relative_path))
                .then_with(|| a.scan_root.cmp(&b.scan_root))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|(_, suggestion)| suggestion.clone())
            .collect()
    }

    fn read_listing(&self) -> std::sync::RwLockReadGuard<'_, Listing> {
        self.listing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn helper_for(files: &[&str]) -> (TempDir, ReferenceHelper) {
        let dir = TempDir::new().expect("temp dir");
        for rel in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, "x\n").expect("write");
        }
        let root = fs::canonicalize(dir.path()).expect("canonical root");
        let helper = ReferenceHelper::new(vec![root], IgnorePolicy::new());
        (dir, helper)
    }

    #[test]
    fn prefix_matches_sort_before_inner_matches() {
        let (_dir, helper) = helper_for(&["src/config.rs", "docs/app_config.md", "config/defaults.json"]);
        let paths: Vec<String> = helper
            .suggestions("CONF", 10)
            .into_iter()
            .map(|suggestion| suggestion.relative_path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "config",
                "src/config.rs",
                "config/defaults.json",
                "docs/app_config.md",
            ]
        );
    }

    #[test]
    fn suggestions_report_kind_and_root() {
        let (dir, helper) = helper_for(&["notes/todo.txt"]);
        let hits = helper.suggestions("notes", 5);
        assert_eq!(hits[0].kind, SuggestionKind::Directory);
        assert_eq!(hits[1].kind, SuggestionKind::File);
        let root = fs::canonicalize(dir.path()).expect("canonical root");
        assert_eq!(hits[1].scan_root, root);
        assert_eq!(hits[1].absolute_path, root.join("notes/todo.txt"));
        assert_eq!(helper.suggestions("notes", 1).len(), 1);
        assert!(helper.suggestions("zzz", 5).is_empty());
    }

    #[test]
    fn refresh_picks_up_new_files() {
        let (dir, helper) = helper_for(&["a.txt"]);
        assert_eq!(helper.file_count(), 1);
        fs::write(dir.path().join("b.txt"), "y\n").expect("write");
        assert_eq!(helper.file_count(), 1);
        assert_eq!(helper.refresh(), 2);
        assert_eq!(helper.file_count(), 2);
    }
}
