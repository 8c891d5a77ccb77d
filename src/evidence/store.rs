//! Session index store
//!
//! Owns the session key → persisted index mapping. At most one index is
//! live per session key: building a new one evicts the previous one first.

use super::folder::EvidenceFolder;
use super::index::EvidenceIndex;
use crate::error::PipelineError;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct SessionIndexStore {
    root: PathBuf,
    entries: RwLock<HashMap<String, PathBuf>>,
}

impl SessionIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic persisted location for a session key.
    pub fn path_for(&self, session_key: &str) -> PathBuf {
        let digest = Sha256::digest(session_key.as_bytes());
        self.root
            .join(format!("session-{}.json", hex::encode(&digest[..8])))
    }

    /// New query (`reuse == false`): index `folder` and replace any prior
    /// index for the session. Follow-up (`reuse == true`): reload the
    /// persisted index; `folder` is ignored.
    pub async fn build_or_load(
        &self,
        session_key: &str,
        folder: Option<&EvidenceFolder>,
        reuse: bool,
    ) -> Result<EvidenceIndex> {
        if reuse {
            return self.load(session_key).await;
        }

        let folder = folder.ok_or_else(|| {
            PipelineError::IndexError("No evidence folder supplied for a new query".to_string())
        })?;
        self.build(session_key, folder).await
    }

    /// The mapping lock is held only to evict and to record; indexing runs
    /// on the blocking pool. Callers serialize turns on one session key.
    pub async fn build(&self, session_key: &str, folder: &EvidenceFolder) -> Result<EvidenceIndex> {
        let previous = self.entries.write().await.remove(session_key);
        if let Some(previous) = previous {
            remove_index_file(&previous)?;
            info!(session_key, "Evicted previous session index");
        }

        let source = folder.path().to_path_buf();
        let path = self.path_for(session_key);
        let target = path.clone();
        let index = run_blocking(move || {
            let index = EvidenceIndex::from_folder(&source)?;
            index.save(&target)?;
            Ok(index)
        })
        .await?;

        info!(
            session_key,
            chunks = index.len(),
            path = %path.display(),
            "Persisted session index"
        );
        self.entries
            .write()
            .await
            .insert(session_key.to_string(), path);

        Ok(index)
    }

    pub async fn load(&self, session_key: &str) -> Result<EvidenceIndex> {
        let path = {
            let entries = self.entries.read().await;
            entries.get(session_key).cloned()
        }
        .ok_or_else(|| {
            PipelineError::IndexError(format!("No index exists for session '{}'", session_key))
        })?;

        run_blocking(move || EvidenceIndex::load(&path)).await
    }

    pub async fn contains(&self, session_key: &str) -> bool {
        self.entries.read().await.contains_key(session_key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every persisted index and mapping entry, including index
    /// files left under `root` by earlier processes. Returns how many
    /// indexes were cleared.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let mut cleared = entries.len();

        for (session_key, path) in entries.drain() {
            if let Err(e) = remove_index_file(&path) {
                warn!(session_key = %session_key, "Failed to remove session index: {}", e);
            }
        }

        let stale = self.sweep_stale_files();
        cleared += stale;

        info!(cleared, stale, "Cleared all session indexes");
        Ok(cleared)
    }

    fn sweep_stale_files(&self) -> usize {
        if !self.root.is_dir() {
            return 0;
        }

        let mut removed = 0;
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !(name.starts_with("session-") && name.ends_with(".json")) {
                continue;
            }
            match remove_index_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), "Failed to remove stale index: {}", e),
            }
        }
        removed
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::IndexError(format!("Index task failed: {}", e)))?
}

fn remove_index_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
