pub mod analysis;
pub mod config;

use tracing_subscriber::EnvFilter;

pub use analysis::{
    AnalysisError, AnalysisInvoker, AnalysisOutcome, BatchRunner, BatchState, EngineClient,
    ExportTable, RecordingInput,
};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
