//! BatchRunner: drives a list of recordings through the inference engine.
//!
//! Runs sequentially (one engine call at a time) as the engine owns a single
//! accelerator. Every step republishes the full `BatchState` to the observer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use super::error::AnalysisError;
use super::input::{resolve_model_ids, RecordingInput};
use super::traits::AnalysisInvoker;
use super::types::BatchState;

/// Shared cancellation switch, checked before each engine call.
///
/// The call in flight is never interrupted; items not yet started settle as
/// `Error("Cancelled")`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub fn new_batch_id() -> String {
    Uuid::new_v4().to_string()
}

/// Orchestrates one batch run.
pub struct BatchRunner {
    invoker: Box<dyn AnalysisInvoker>,
    cancel: CancelFlag,
}

impl BatchRunner {
    pub fn new(invoker: Box<dyn AnalysisInvoker>) -> Self {
        Self {
            invoker,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels the batch from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Analyze every input in order and return the settled state.
    ///
    /// `progress_fn` sees the state once at start, before each call
    /// (item `Processing`), after each settlement, and once at the end.
    pub fn run(
        &self,
        inputs: &[RecordingInput],
        model_selection: &[String],
        use_gpu: bool,
        progress_fn: Option<&dyn Fn(&BatchState)>,
    ) -> BatchState {
        let start = Instant::now();
        let model_ids = resolve_model_ids(model_selection);

        let mut state = BatchState::new(
            new_batch_id(),
            inputs.iter().map(|i| i.filename.clone()),
            model_ids.iter().cloned().collect(),
        );
        state.is_running = true;

        tracing::info!(
            batch_id = %state.batch_id,
            file_count = inputs.len(),
            models = ?model_ids,
            use_gpu,
            "Batch analysis starting"
        );
        publish(progress_fn, &state);

        for (index, input) in inputs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::debug!(index, filename = %input.filename, "Batch cancelled, skipping item");
                state.record_failure(index, AnalysisError::Cancelled.to_string());
                state.elapsed_ms = elapsed_ms(start);
                publish(progress_fn, &state);
                continue;
            }

            state.mark_processing(index);
            state.elapsed_ms = elapsed_ms(start);
            publish(progress_fn, &state);

            let item_start = Instant::now();
            match self.invoker.analyze(input, &model_ids, use_gpu) {
                Ok(outcome) => {
                    if outcome.success {
                        tracing::debug!(
                            index,
                            filename = %input.filename,
                            models = outcome.results.len(),
                            duration_ms = elapsed_ms(item_start),
                            "Recording analyzed"
                        );
                    } else {
                        tracing::warn!(
                            index,
                            filename = %input.filename,
                            error = outcome.error.as_deref().unwrap_or(""),
                            "Engine reported analysis failure"
                        );
                    }
                    state.record_outcome(index, outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        index,
                        filename = %input.filename,
                        error = %e,
                        "Recording analysis failed, continuing with next"
                    );
                    state.record_failure(index, e.to_string());
                }
            }

            state.elapsed_ms = elapsed_ms(start);
            publish(progress_fn, &state);
        }

        state.is_running = false;
        state.current_index = None;
        state.elapsed_ms = elapsed_ms(start);
        publish(progress_fn, &state);

        tracing::info!(
            batch_id = %state.batch_id,
            successful = state.success_count,
            failed = state.fail_count,
            duration_ms = state.elapsed_ms,
            "Batch analysis completed"
        );

        state
    }
}

fn publish(progress_fn: Option<&dyn Fn(&BatchState)>, state: &BatchState) {
    if let Some(progress) = progress_fn {
        progress(state);
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{AnalysisOutcome, ItemStatus};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// What the scripted invoker does for a given filename.
    #[derive(Clone)]
    enum Script {
        Succeed,
        Report(&'static str),
        Raise(&'static str),
    }

    /// Scripted invoker recording call order and peak concurrency.
    struct ScriptedInvoker {
        script: Vec<(&'static str, Script)>,
        calls: Mutex<Vec<String>>,
        models_seen: Mutex<Vec<Vec<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedInvoker {
        fn new(script: Vec<(&'static str, Script)>) -> Self {
            Self {
                script,
                calls: Mutex::new(Vec::new()),
                models_seen: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl AnalysisInvoker for ScriptedInvoker {
        fn analyze(
            &self,
            input: &RecordingInput,
            model_ids: &[String],
            _use_gpu: bool,
        ) -> Result<AnalysisOutcome, AnalysisError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(input.filename.clone());
            self.models_seen.lock().unwrap().push(model_ids.to_vec());
            std::thread::sleep(std::time::Duration::from_millis(1));

            let action = self
                .script
                .iter()
                .find(|(name, _)| *name == input.filename)
                .map(|(_, s)| s.clone())
                .unwrap_or(Script::Succeed);

            let result = match action {
                Script::Succeed => Ok(outcome(true, None)),
                Script::Report(msg) => Ok(outcome(false, Some(msg))),
                Script::Raise(msg) => Err(AnalysisError::Invocation(msg.to_string())),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn outcome(success: bool, error: Option<&str>) -> AnalysisOutcome {
        AnalysisOutcome {
            success,
            patient_id: "P-42".into(),
            ecg_filename: String::new(),
            results: BTreeMap::new(),
            error: error.map(str::to_string),
            processing_time_ms: Some(12.0),
        }
    }

    fn inputs(names: &[&str]) -> Vec<RecordingInput> {
        names
            .iter()
            .map(|n| RecordingInput::new(*n, b"0.1;0.2".to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn second_item_timeout_does_not_abort_batch() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![("b.csv", Script::Raise("timeout"))]));
        let runner = BatchRunner::new(Box::new(SharedInvoker(invoker.clone())));

        let state = runner.run(&inputs(&["a.csv", "b.csv", "c.csv"]), &[], true, None);

        assert_eq!(state.items[0].status, ItemStatus::Success);
        assert_eq!(state.items[1].status, ItemStatus::Error);
        assert_eq!(state.items[1].error.as_deref(), Some("timeout"));
        assert!(state.items[1].outcome.is_none());
        assert_eq!(state.items[2].status, ItemStatus::Success);
        assert_eq!(state.success_count, 2);
        assert_eq!(state.fail_count, 1);
        assert!(!state.is_running);
        assert_eq!(state.current_index, None);
        assert_eq!(*invoker.calls.lock().unwrap(), vec!["a.csv", "b.csv", "c.csv"]);
    }

    #[test]
    fn items_keep_submission_order() {
        let names = ["z.csv", "a.xml", "m.npy", "b.parquet"];
        let invoker = ScriptedInvoker::new(vec![
            ("a.xml", Script::Report("bad leads")),
            ("b.parquet", Script::Raise("connection reset")),
        ]);
        let runner = BatchRunner::new(Box::new(invoker));

        let state = runner.run(&inputs(&names), &[], false, None);

        for (i, name) in names.iter().enumerate() {
            assert_eq!(state.items[i].filename, *name);
            assert_eq!(state.items[i].index, i);
        }
        assert_eq!(state.items[1].error.as_deref(), Some("bad leads"));
        assert!(state.items[1].outcome.is_some());
    }

    #[test]
    fn never_more_than_one_call_in_flight() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let runner = BatchRunner::new(Box::new(SharedInvoker(invoker.clone())));

        runner.run(&inputs(&["1.csv", "2.csv", "3.csv", "4.csv"]), &[], true, None);

        assert_eq!(invoker.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(invoker.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn counts_match_terminal_items_in_every_snapshot() {
        let invoker = ScriptedInvoker::new(vec![
            ("2.csv", Script::Raise("boom")),
            ("4.csv", Script::Report("no signal")),
        ]);
        let runner = BatchRunner::new(Box::new(invoker));
        let snapshots: RefCell<Vec<BatchState>> = RefCell::new(Vec::new());
        let observe = |s: &BatchState| snapshots.borrow_mut().push(s.clone());

        let final_state = runner.run(
            &inputs(&["1.csv", "2.csv", "3.csv", "4.csv"]),
            &[],
            true,
            Some(&observe),
        );

        let snapshots = snapshots.into_inner();
        // start + (processing + settled) per item + final
        assert_eq!(snapshots.len(), 1 + 2 * 4 + 1);
        for s in &snapshots {
            assert_eq!(
                (s.success_count + s.fail_count) as usize,
                s.terminal_count(),
                "count invariant broken in {s:?}"
            );
            assert_eq!(s.results().len(), s.terminal_count());
        }
        assert_eq!(
            (final_state.success_count + final_state.fail_count) as usize,
            final_state.items.len()
        );
        assert!(final_state.is_complete());
        assert_eq!(snapshots.last(), Some(&final_state));
    }

    #[test]
    fn item_marked_processing_before_call() {
        let runner = BatchRunner::new(Box::new(ScriptedInvoker::new(vec![])));
        let snapshots: RefCell<Vec<BatchState>> = RefCell::new(Vec::new());
        let observe = |s: &BatchState| snapshots.borrow_mut().push(s.clone());

        runner.run(&inputs(&["a.csv", "b.csv"]), &[], true, Some(&observe));

        let snapshots = snapshots.into_inner();
        assert!(snapshots[0].items.iter().all(|i| i.status == ItemStatus::Pending));
        assert!(snapshots[0].is_running);
        assert_eq!(snapshots[1].items[0].status, ItemStatus::Processing);
        assert_eq!(snapshots[1].items[1].status, ItemStatus::Pending);
        assert_eq!(snapshots[1].current_index, Some(0));
        assert_eq!(snapshots[2].items[0].status, ItemStatus::Success);
        assert_eq!(snapshots[3].items[1].status, ItemStatus::Processing);
        assert_eq!(snapshots[3].current_index, Some(1));
    }

    #[test]
    fn elapsed_time_is_monotonic() {
        let runner = BatchRunner::new(Box::new(ScriptedInvoker::new(vec![])));
        let snapshots: RefCell<Vec<u64>> = RefCell::new(Vec::new());
        let observe = |s: &BatchState| snapshots.borrow_mut().push(s.elapsed_ms);

        runner.run(&inputs(&["a.csv", "b.csv", "c.csv"]), &[], true, Some(&observe));

        let elapsed = snapshots.into_inner();
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));
        assert!(*elapsed.last().unwrap() >= 3);
    }

    #[test]
    fn empty_selection_sends_all_sentinel() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let runner = BatchRunner::new(Box::new(SharedInvoker(invoker.clone())));

        let state = runner.run(&inputs(&["a.csv"]), &[], true, None);

        assert_eq!(invoker.models_seen.lock().unwrap()[0], vec!["all"]);
        assert!(state.models_used.contains("all"));
    }

    #[test]
    fn selected_models_recorded() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let runner = BatchRunner::new(Box::new(SharedInvoker(invoker.clone())));
        let selection = vec!["wcr_77".to_string(), "efficientnet_77".to_string()];

        let state = runner.run(&inputs(&["a.csv"]), &selection, false, None);

        assert_eq!(invoker.models_seen.lock().unwrap()[0], selection);
        assert_eq!(state.models_used.len(), 2);
    }

    #[test]
    fn cancelled_before_start_settles_every_item() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![]));
        let flag = CancelFlag::new();
        let runner =
            BatchRunner::new(Box::new(SharedInvoker(invoker.clone()))).with_cancel_flag(flag.clone());
        flag.cancel();

        let state = runner.run(&inputs(&["a.csv", "b.csv"]), &[], true, None);

        assert!(invoker.calls.lock().unwrap().is_empty());
        assert!(state.is_complete());
        assert_eq!(state.fail_count, 2);
        assert!(state.items.iter().all(|i| i.error.as_deref() == Some("Cancelled")));
    }

    #[test]
    fn cancel_mid_batch_finishes_current_item() {
        /// Cancels the batch while analyzing the first recording.
        struct CancellingInvoker(CancelFlag);
        impl AnalysisInvoker for CancellingInvoker {
            fn analyze(
                &self,
                _input: &RecordingInput,
                _model_ids: &[String],
                _use_gpu: bool,
            ) -> Result<AnalysisOutcome, AnalysisError> {
                self.0.cancel();
                Ok(outcome(true, None))
            }
        }

        let flag = CancelFlag::new();
        let runner = BatchRunner::new(Box::new(CancellingInvoker(flag.clone()))).with_cancel_flag(flag);

        let state = runner.run(&inputs(&["a.csv", "b.csv", "c.csv"]), &[], true, None);

        assert_eq!(state.items[0].status, ItemStatus::Success);
        assert_eq!(state.items[1].status, ItemStatus::Error);
        assert_eq!(state.items[2].status, ItemStatus::Error);
        assert_eq!(state.success_count, 1);
        assert_eq!(state.fail_count, 2);
    }

    #[test]
    fn observer_cancels_after_first_failure() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![("b.csv", Script::Raise("timeout"))]));
        let runner = BatchRunner::new(Box::new(SharedInvoker(invoker.clone())));
        let cancel = runner.cancel_flag();
        let stop_on_error = |state: &BatchState| {
            if state.fail_count > 0 {
                cancel.cancel();
            }
        };

        let names = ["a.csv", "b.csv", "c.csv", "d.csv"];
        let state = runner.run(&inputs(&names), &[], true, Some(&stop_on_error));

        assert_eq!(*invoker.calls.lock().unwrap(), vec!["a.csv", "b.csv"]);
        assert_eq!(state.items[1].error.as_deref(), Some("timeout"));
        assert_eq!(state.items[2].error.as_deref(), Some("Cancelled"));
        assert_eq!(state.items[3].error.as_deref(), Some("Cancelled"));
        assert_eq!(state.success_count, 1);
        assert_eq!(state.fail_count, 3);
        assert!(state.is_complete());
    }

    #[test]
    fn empty_batch_completes_immediately() {
        let runner = BatchRunner::new(Box::new(ScriptedInvoker::new(vec![])));
        let state = runner.run(&[], &[], true, None);
        assert!(state.items.is_empty());
        assert!(state.is_complete());
        assert!(!state.is_running);
    }

    #[test]
    fn batch_ids_are_unique() {
        assert_ne!(new_batch_id(), new_batch_id());
    }

    /// Lets a test keep a handle on the invoker the runner owns.
    struct SharedInvoker(Arc<ScriptedInvoker>);

    impl AnalysisInvoker for SharedInvoker {
        fn analyze(
            &self,
            input: &RecordingInput,
            model_ids: &[String],
            use_gpu: bool,
        ) -> Result<AnalysisOutcome, AnalysisError> {
            self.0.analyze(input, model_ids, use_gpu)
        }
    }
}
