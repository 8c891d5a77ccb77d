//! Error types for the filings question-answering pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Acquisition failure: {0}")]
    AcquisitionFailure(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Unsupported chart type: {0}")]
    UnsupportedChartType(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
