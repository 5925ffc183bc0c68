use crate::manager::SafetyManager;
use crate::SafetyError;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Appends to an existing file; never creates one.
    Append,
    AppendCreate,
    /// Create or truncate.
    Write,
    CreateNew,
    ReadWriteCreate,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "read",
            OpenMode::Append => "append",
            OpenMode::AppendCreate => "append-create",
            OpenMode::Write => "write",
            OpenMode::CreateNew => "exclusive-create",
            OpenMode::ReadWriteCreate => "read-write-create",
        }
    }

    /// Modes that the file guard refuses on protected paths. Pure append and
    /// read are never blocked.
    pub fn is_guarded_write(&self) -> bool {
        matches!(
            self,
            OpenMode::Write | OpenMode::AppendCreate | OpenMode::CreateNew | OpenMode::ReadWriteCreate
        )
    }

    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Append => options.append(true),
            OpenMode::AppendCreate => options.append(true).create(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::CreateNew => options.write(true).create_new(true),
            OpenMode::ReadWriteCreate => options.read(true).write(true).create(true),
        };
        options
    }
}

/// The I/O façade every core write flows through.
#[derive(Clone)]
pub struct GuardedFs {
    safety: Arc<SafetyManager>,
}

impl fmt::Debug for GuardedFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedFs")
            .field("guard_installed", &self.safety.is_guard_installed())
            .finish()
    }
}

impl GuardedFs {
    pub fn new(safety: Arc<SafetyManager>) -> Self {
        Self { safety }
    }

    /// A façade backed by a private manager with no protected paths.
    pub fn unguarded() -> Self {
        Self::new(Arc::new(SafetyManager::new()))
    }

    pub fn safety(&self) -> &Arc<SafetyManager> {
        &self.safety
    }

    pub fn open(&self, path: &Path, mode: OpenMode) -> Result<File, SafetyError> {
        self.safety.check_write(path, mode)?;
        mode.options().open(path).map_err(|err| SafetyError::io(path, err))
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<(), SafetyError> {
        if path.is_dir() {
            return Ok(());
        }
        self.safety.check_write(path, OpenMode::CreateNew)?;
        fs::create_dir_all(path).map_err(|err| SafetyError::io(path, err))
    }

    /// Appends `bytes`, creating the file (and parents) when missing.
    pub fn append_bytes(&self, path: &Path, bytes: &[u8], sync: bool) -> Result<(), SafetyError> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let mut file = self.open(path, OpenMode::AppendCreate)?;
        file.write_all(bytes).map_err(|err| SafetyError::io(path, err))?;
        if sync {
            file.sync_all().map_err(|err| SafetyError::io(path, err))?;
        }
        Ok(())
    }

    /// Writes a sibling `<name>.tmp`, fsyncs it and renames it over `path`,
    /// so readers see either the previous or the new complete file.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), SafetyError> {
        self.safety.check_write(path, OpenMode::Write)?;
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let tmp_path = temp_sibling(path);
        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(SafetyError::io(path, err));
        }
        Ok(())
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), SafetyError> {
        self.safety.check_write(from, OpenMode::Write)?;
        self.safety.check_write(to, OpenMode::Write)?;
        fs::rename(from, to).map_err(|err| SafetyError::io(to, err))
    }

    pub fn remove_file(&self, path: &Path) -> Result<(), SafetyError> {
        self.safety.check_write(path, OpenMode::Write)?;
        fs::remove_file(path).map_err(|err| SafetyError::io(path, err))
    }
}

pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_core::{Classify, FailureKind};
    use std::io::Read;
    use tempfile::TempDir;

    fn guarded_with(protect: impl FnOnce(&SafetyManager)) -> GuardedFs {
        let manager = SafetyManager::new();
        protect(&manager);
        manager.install_file_guard();
        GuardedFs::new(Arc::new(manager))
    }

    #[test]
    fn protected_file_blocks_write_but_allows_append() {
        let dir = TempDir::new().expect("temp dir");
        let agent = dir.path().join("Agent.md");
        fs::write(&agent, "rules\n").expect("seed");
        let fs_guard = guarded_with(|manager| {
            manager.add_protected_path(&agent);
        });

        for mode in [OpenMode::Write, OpenMode::CreateNew, OpenMode::ReadWriteCreate, OpenMode::AppendCreate] {
            let err = fs_guard.open(&agent, mode).unwrap_err();
            assert_eq!(err.kind(), FailureKind::SafetyViolation, "mode {mode:?}");
        }
        assert!(fs_guard.write_atomic(&agent, b"clobber").is_err());

        let mut file = fs_guard.open(&agent, OpenMode::Append).expect("append");
        file.write_all(b"more\n").expect("append write");
        drop(file);

        let mut content = String::new();
        fs_guard
            .open(&agent, OpenMode::Read)
            .expect("read")
            .read_to_string(&mut content)
            .expect("read content");
        assert_eq!(content, "rules\nmore\n");
    }

    #[test]
    fn protected_directory_blocks_every_write_mode() {
        let dir = TempDir::new().expect("temp dir");
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).expect("mkdir");
        let fs_guard = guarded_with(|manager| {
            manager.add_protected_directory(&locked);
        });

        let nested = locked.join("sub").join("notes.txt");
        assert!(fs_guard.append_bytes(&nested, b"x", false).is_err());
        assert!(fs_guard.open(&locked.join("a.txt"), OpenMode::Write).is_err());
        assert!(!nested.exists());

        let free = dir.path().join("free.txt");
        fs_guard.write_atomic(&free, b"ok").expect("unprotected write");
        assert_eq!(fs::read_to_string(&free).expect("read"), "ok");
    }

    #[test]
    fn write_atomic_replaces_without_leaving_temp_files() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("data").join("tasks.jsonl");
        let fs_guard = GuardedFs::unguarded();

        fs_guard.write_atomic(&target, b"one\n").expect("first write");
        fs_guard.write_atomic(&target, b"two\n").expect("second write");
        assert_eq!(fs::read_to_string(&target).expect("read"), "two\n");
        assert!(!temp_sibling(&target).exists());
        assert_eq!(
            temp_sibling(&target).file_name().and_then(|n| n.to_str()),
            Some("tasks.jsonl.tmp")
        );
    }
}
