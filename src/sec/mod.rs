//! SEC EDGAR data source
//!
//! Filing indexes (submissions), XBRL frames (structured facts) and raw
//! filing documents, behind the [`FilingSource`] trait so acquisition can
//! run against a recorded source in tests.

pub mod client;
pub mod throttle;
pub mod types;

pub use client::EdgarClient;
pub use throttle::Throttle;
pub use types::{FilingIndex, FilingRef, Frame, FrameFact, RecentFilings};

use crate::models::FiscalQuarter;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FilingSource: Send + Sync {
    /// Submissions document for a zero-padded 10-digit entity id.
    async fn filing_index(&self, entity_id: &str) -> Result<FilingIndex>;

    /// All facts reported for `concept` (USD) in the quarter's instantaneous frame.
    async fn frame(&self, concept: &str, quarter: &FiscalQuarter) -> Result<Frame>;

    /// Raw bytes of a filing document.
    async fn document(&self, url: &str) -> Result<Vec<u8>>;
}
