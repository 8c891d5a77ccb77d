//! Financial Filings Question Answering
//!
//! Answers natural-language questions about SEC-registered companies:
//! - Extracts entity ids, quarters and a category from the question
//! - Downloads filings from SEC EDGAR, falling back to XBRL structured facts
//! - Indexes the evidence per session and reuses it for follow-ups
//! - Answers with prose or a chart description via retrieval-augmented generation
//!
//! NEW QUERY: EXTRACT → ACQUIRE → INDEX → SYNTHESIZE
//! FOLLOW UP: LOAD INDEX → CLASSIFY → SYNTHESIZE

pub mod acquisition;
pub mod agent;
pub mod api;
pub mod chart;
pub mod config;
pub mod error;
pub mod evidence;
pub mod extractor;
pub mod gemini;
pub mod llm;
pub mod memory;
pub mod models;
pub mod sec;
pub mod synthesis;
pub mod usage;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineError, Result};

// Re-export common types
pub use models::*;
