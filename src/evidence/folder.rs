//! Transient per-query evidence folder
//!
//! The folder is removed when the guard is dropped, so every exit path of
//! a query (success, early return, propagated error) releases it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const SNAPSHOT_FILE_NAME: &str = "xbrl_data.json";

#[derive(Debug)]
pub struct EvidenceFolder {
    path: PathBuf,
}

impl EvidenceFolder {
    /// Create a new uniquely named folder under `parent`.
    pub fn create(parent: &Path) -> io::Result<Self> {
        fs::create_dir_all(parent)?;
        let path = parent.join(Uuid::new_v4().to_string());
        fs::create_dir(&path)?;
        debug!(path = %path.display(), "Created evidence folder");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.path.join(sanitize_file_name(file_name)).exists()
    }

    /// Write (or overwrite) a file directly inside the folder.
    pub fn write_file(&self, file_name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let target = self.path.join(sanitize_file_name(file_name));
        fs::write(&target, contents)?;
        Ok(target)
    }

    /// Number of regular files currently in the folder.
    pub fn file_count(&self) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.path)? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Drop for EvidenceFolder {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Deleted evidence folder"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to delete evidence folder: {}", e),
        }
    }
}

/// Keep file names flat and portable.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}
