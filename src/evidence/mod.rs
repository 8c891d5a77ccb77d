//! Evidence handling
//!
//! Transient per-query folders of downloaded filings, the retrieval index
//! built over them, and the per-session store of persisted indexes.

pub mod folder;
pub mod index;
pub mod store;
pub mod text;

pub use folder::{EvidenceFolder, SNAPSHOT_FILE_NAME};
pub use index::EvidenceIndex;
pub use store::SessionIndexStore;
