use std::path::PathBuf;
use std::process;

use clap::Parser;

use ecg_batch::analysis::{
    batch_export_filename, batch_table, export, load_supported, save_csv, BatchRunner,
    BatchState, EngineClient, ItemStatus,
};
use ecg_batch::config::{self, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "ecg-batch")]
#[command(about = "Analyze ECG recordings with the inference engine and export a CSV summary")]
#[command(version)]
struct Args {
    /// Recordings to analyze (.csv, .parquet, .xml, .npy)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Comma-separated model ids (default: all models)
    #[arg(short, long, value_delimiter = ',')]
    models: Vec<String>,

    /// Run inference on CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Directory for the CSV export (default: $ECG_EXPORT_DIR, then Downloads)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Cancel the remaining recordings after the first failure
    #[arg(long)]
    stop_on_error: bool,
}

fn main() {
    ecg_batch::init_tracing();
    let args = Args::parse();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let exit_code = match run(args) {
        Ok(state) if state.fail_count == 0 => 0,
        Ok(_) => 3,
        Err(e) => {
            eprintln!("❌ {e}");
            1
        }
    };
    process::exit(exit_code);
}

fn run(args: Args) -> Result<BatchState, ecg_batch::AnalysisError> {
    let engine_config = EngineConfig::from_env()?;
    let (inputs, rejected) = load_supported(&args.files);
    for (path, e) in &rejected {
        eprintln!("⚠️  Skipped {}: {e}", path.display());
    }
    if inputs.is_empty() {
        return Err(ecg_batch::AnalysisError::Config(
            "no supported recordings to analyze".into(),
        ));
    }

    let client = EngineClient::new(engine_config)?;
    let runner = BatchRunner::new(Box::new(client));
    let cancel = runner.cancel_flag();
    let stop_on_error = args.stop_on_error;

    let report = |state: &BatchState| {
        if stop_on_error && state.fail_count > 0 && !cancel.is_cancelled() {
            tracing::warn!("Recording failed, cancelling remaining items");
            cancel.cancel();
        }
        if let Some(item) = state.current_index.and_then(|i| state.items.get(i)) {
            if item.status == ItemStatus::Processing {
                println!(
                    "[{}/{}] {} ...",
                    item.index + 1,
                    state.total_files(),
                    item.filename
                );
            }
        }
    };

    let state = runner.run(&inputs, &args.models, !args.cpu, Some(&report));

    for item in &state.items {
        match item.status {
            ItemStatus::Success => println!(
                "✅ {} (patient {})",
                item.filename,
                item.patient_id().unwrap_or("-")
            ),
            _ => println!(
                "❌ {}: {}",
                item.filename,
                item.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!(
        "{} succeeded, {} failed in {:.1}s",
        state.success_count,
        state.fail_count,
        state.elapsed_ms as f64 / 1000.0
    );

    if state.success_count > 0 {
        let dir = args.out.unwrap_or_else(config::export_dir);
        let path = save_csv(&dir, &batch_export_filename(export::today()), &batch_table(&state))?;
        println!("📄 Results written to {}", path.display());
    }

    Ok(state)
}
