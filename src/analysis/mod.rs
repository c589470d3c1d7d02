//! ECG batch analysis pipeline
//!
//! Sends recordings to the inference engine one at a time and turns the
//! per-model outputs into an exportable table.
//!
//! ## Architecture
//! ```text
//! RecordingInput → BatchRunner ──(AnalysisInvoker)──→ BatchState
//!                                                        │
//!                        ExportTable ← build_table ← normalize
//! ```
//!
//! - The runner is the only writer of `BatchState`; observers get a reference after each step.
//! - At most one engine call is in flight; a failed item never stops the batch.
//! - Normalization and export are pure and synchronous.

pub mod error;
pub mod types;
pub mod input;
pub mod traits;
pub mod engine_client;
pub mod runner;
pub mod normalize;
pub mod export;

pub use error::AnalysisError;
pub use types::*;
pub use input::{check_extension, load_supported, resolve_model_ids, RecordingInput};
pub use traits::AnalysisInvoker;
pub use engine_client::EngineClient;
pub use runner::{new_batch_id, BatchRunner, CancelFlag};
pub use normalize::{classify, normalize, normalize_outcome, ClassifiedResult, NormalizedResult};
pub use export::{
    batch_export_filename, batch_subjects, batch_table, build_table, format_probability,
    save_csv, single_export_filename, single_subject_table, ExportTable,
};
