//! Error types for the ECG analysis pipeline.
//!
//! A single enum covers input loading, the engine transport and configuration.
//! The batch runner never propagates these past an item: they are recorded on
//! the failing `BatchItem` through their `Display` form.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Unsupported recording format '{extension}' (allowed: {allowed})")]
    UnsupportedFormat { extension: String, allowed: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot connect to inference engine at {0}")]
    EngineConnection(String),

    #[error("Timeout after {secs}s")]
    Timeout { secs: u64 },

    #[error("Inference engine returned HTTP {status}: {body}")]
    EngineStatus { status: u16, body: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid response from inference engine: {0}")]
    ResponseParsing(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Inference engine unreachable after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Failure raised by an invoker that carries only a message.
    #[error("{0}")]
    Invocation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}
