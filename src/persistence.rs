//! A byte-blob file store keyed by a single on-disk path.

use std::fs;
use std::path::{Path, PathBuf};

/// Stores, loads, and clears an opaque byte blob at a fixed path.
///
/// Construction with an empty path is a programming error and panics immediately, matching
/// the rest of this crate's policy of failing fast on caller misuse rather than threading a
/// `Result` through a constructor that every caller already knows cannot fail under normal
/// use.
#[derive(Debug, Clone)]
pub struct FileSettingsPersistence {
    filepath: PathBuf,
}

impl FileSettingsPersistence {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        let filepath = filepath.into();
        assert!(
            !filepath.as_os_str().is_empty(),
            "FileSettingsPersistence requires a non-empty path"
        );
        Self { filepath }
    }

    pub fn path(&self) -> &Path {
        &self.filepath
    }

    /// Writes `data` to the file, creating or truncating it. Does not create missing
    /// parent directories; returns `false` if the write fails for any reason.
    pub fn store(&self, data: &[u8]) -> bool {
        match fs::write(&self.filepath, data) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(path = %self.filepath.display(), %error, "failed to store persistence blob");
                false
            }
        }
    }

    /// Reads the file's contents. A missing file yields `Some(vec![])` ("no prior
    /// state"); any other IO error yields `None`.
    pub fn load(&self) -> Option<Vec<u8>> {
        match fs::read(&self.filepath) {
            Ok(bytes) => Some(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Some(Vec::new()),
            Err(error) => {
                tracing::warn!(path = %self.filepath.display(), %error, "failed to load persistence blob");
                None
            }
        }
    }

    /// Removes the file if present. Idempotent: absence of the file is success.
    pub fn clear(&self) -> bool {
        match fs::remove_file(&self.filepath) {
            Ok(()) => true,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => true,
            Err(error) => {
                tracing::warn!(path = %self.filepath.display(), %error, "failed to clear persistence blob");
                false
            }
        }
    }
}
