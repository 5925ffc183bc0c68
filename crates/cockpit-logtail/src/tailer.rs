use crate::LogTailError;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Byte-offset tail of a growing log file. A trailing line without LF is
/// held back as raw bytes until its terminator arrives, so a multi-byte
/// character split across two reads decodes intact.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Tails from the beginning of the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// Tails only what is written after now.
    pub fn from_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = std::fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        Self {
            path,
            offset,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn pending_partial(&self) -> &[u8] {
        &self.partial
    }

    /// Complete lines appended since the last call. A missing file yields
    /// nothing; a file shorter than the offset is read again from the start.
    pub fn read_new_lines(&mut self) -> Result<Vec<String>, LogTailError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LogTailError::io(&self.path, err)),
        };
        let len = file
            .metadata()
            .map_err(|err| LogTailError::io(&self.path, err))?
            .len();
        if len < self.offset {
            debug!(path = %self.path.display(), "log_truncated");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|err| LogTailError::io(&self.path, err))?;
        let mut bytes = Vec::new();
        let read = file
            .read_to_end(&mut bytes)
            .map_err(|err| LogTailError::io(&self.path, err))?;
        self.offset += read as u64;

        let mut buffer = std::mem::take(&mut self.partial);
        buffer.extend_from_slice(&bytes);
        let mut pieces: Vec<&[u8]> = buffer.split(|byte| *byte == b'\n').collect();
        // The last piece is empty after a trailing LF, otherwise a partial line.
        let rest = pieces.pop().unwrap_or_default().to_vec();
        let lines = pieces
            .into_iter()
            .map(|piece| {
                let piece = piece.strip_suffix(b"\r").unwrap_or(piece);
                String::from_utf8_lossy(piece).into_owned()
            })
            .collect();
        self.partial = rest;
        Ok(lines)
    }
}
