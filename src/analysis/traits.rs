//! Trait definitions for the analysis pipeline.
//!
//! The inference engine sits behind `AnalysisInvoker` so the runner can be
//! driven by the HTTP client in production and by scripted mocks in tests.

use super::error::AnalysisError;
use super::input::RecordingInput;
use super::types::AnalysisOutcome;

/// Analyzes one recording against a set of models.
///
/// Implementations block until the engine answers. An `Ok` outcome may still
/// carry `success = false`; the runner treats both that and `Err` as a failed item.
pub trait AnalysisInvoker: Send + Sync {
    fn analyze(
        &self,
        input: &RecordingInput,
        model_ids: &[String],
        use_gpu: bool,
    ) -> Result<AnalysisOutcome, AnalysisError>;
}
