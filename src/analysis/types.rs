//! Core types for the ECG batch analysis pipeline.
//!
//! These types model the full lifecycle:
//! Recording → Engine call → Outcome → Batch state → Normalized result → Export table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Model output (as returned by the engine)
// ═══════════════════════════════════════════

/// A result with more diagnoses than this is multi-label whatever its tag says.
pub const BINARY_MAX_DIAGNOSES: usize = 10;

/// Clinical status attached to a single diagnosis.
///
/// Known values are matched case-insensitively. Anything else is kept verbatim
/// in `Other` so that it still reaches the export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DiagnosisStatus {
    Normal,
    Borderline,
    Abnormal,
    Other(String),
}

impl DiagnosisStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::Borderline => "borderline",
            Self::Abnormal => "abnormal",
            Self::Other(raw) => raw,
        }
    }
}

impl Default for DiagnosisStatus {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for DiagnosisStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "borderline" => Self::Borderline,
            "abnormal" => Self::Abnormal,
            _ => Self::Other(raw),
        }
    }
}

impl From<DiagnosisStatus> for String {
    fn from(status: DiagnosisStatus) -> Self {
        match status {
            DiagnosisStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `null` deserializes to the type's default instead of failing.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One diagnosis produced by one model for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub name: String,
    /// 0.0-1.0
    pub probability: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: DiagnosisStatus,
}

/// Declared model family. Older engine builds omit the tag, send `null`, or
/// send values we do not know; all deserialize to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    MultiLabel,
    Binary,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Output of a single model for a single recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub architecture: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model_type: ModelType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub diagnoses: Vec<Diagnosis>,
}

impl ModelResult {
    /// Multi-label if tagged so, or if the diagnosis count rules out a binary model.
    pub fn is_multi_label(&self) -> bool {
        self.model_type == ModelType::MultiLabel || self.diagnoses.len() > BINARY_MAX_DIAGNOSES
    }

    pub fn is_binary(&self) -> bool {
        !self.is_multi_label() && self.model_type == ModelType::Binary
    }
}

/// Parse every model result on its own. A malformed entry is logged and
/// dropped; the other models of the recording are kept.
fn lenient_results<'de, D>(deserializer: D) -> Result<BTreeMap<String, ModelResult>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<ModelResult>(value) {
            Ok(result) => Some((key, result)),
            Err(e) => {
                tracing::warn!(model_id = %key, error = %e, "Malformed model result dropped");
                None
            }
        })
        .collect())
}

/// Response of one engine call for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub patient_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ecg_filename: String,
    /// model_id → result. Ordered so that every consumer iterates identically.
    #[serde(default, deserialize_with = "lenient_results")]
    pub results: BTreeMap<String, ModelResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
}

// ═══════════════════════════════════════════
// Batch items and state
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recording within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    pub filename: String,
    pub status: ItemStatus,
    pub outcome: Option<AnalysisOutcome>,
    pub error: Option<String>,
}

impl BatchItem {
    pub fn pending(index: usize, filename: impl Into<String>) -> Self {
        Self {
            index,
            filename: filename.into(),
            status: ItemStatus::Pending,
            outcome: None,
            error: None,
        }
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .map(|o| o.patient_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// The outcome, only when the item succeeded.
    pub fn successful_outcome(&self) -> Option<&AnalysisOutcome> {
        match self.status {
            ItemStatus::Success => self.outcome.as_ref(),
            _ => None,
        }
    }
}

/// Fallback error text when the engine reports failure without a message.
const UNREPORTED_FAILURE: &str = "Analysis failed without an error message";

/// Aggregate state of one batch. Owned and written only by the runner;
/// observers receive it by reference after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    /// Always in submission order.
    pub items: Vec<BatchItem>,
    pub success_count: u32,
    pub fail_count: u32,
    /// Milliseconds from batch start to the latest update.
    pub elapsed_ms: u64,
    pub models_used: BTreeSet<String>,
    /// Index of the item currently being analyzed.
    pub current_index: Option<usize>,
    pub is_running: bool,
}

impl BatchState {
    pub fn new<I, S>(batch_id: String, filenames: I, models_used: BTreeSet<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = filenames
            .into_iter()
            .enumerate()
            .map(|(i, name)| BatchItem::pending(i, name))
            .collect();
        Self {
            batch_id,
            items,
            success_count: 0,
            fail_count: 0,
            elapsed_ms: 0,
            models_used,
            current_index: None,
            is_running: false,
        }
    }

    pub fn total_files(&self) -> usize {
        self.items.len()
    }

    /// Items that reached a terminal status, in submission order.
    pub fn results(&self) -> Vec<&BatchItem> {
        self.items.iter().filter(|i| i.status.is_terminal()).collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_terminal()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.status.is_terminal())
    }

    /// Pending → Processing. Returns false if the item is not pending.
    pub(crate) fn mark_processing(&mut self, index: usize) -> bool {
        match self.items.get_mut(index) {
            Some(item) if item.status == ItemStatus::Pending => {
                item.status = ItemStatus::Processing;
                self.current_index = Some(index);
                true
            }
            _ => false,
        }
    }

    /// Record an engine response. `success = false` counts as a failure.
    pub(crate) fn record_outcome(&mut self, index: usize, outcome: AnalysisOutcome) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.status.is_terminal() {
            tracing::warn!(index, "Ignoring outcome for an item already settled");
            return;
        }
        if outcome.success {
            item.status = ItemStatus::Success;
            self.success_count += 1;
        } else {
            item.status = ItemStatus::Error;
            item.error = Some(
                outcome
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| UNREPORTED_FAILURE.to_string()),
            );
            self.fail_count += 1;
        }
        item.outcome = Some(outcome);
    }

    /// Record a failed invocation.
    pub(crate) fn record_failure(&mut self, index: usize, error: String) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.status.is_terminal() {
            tracing::warn!(index, "Ignoring failure for an item already settled");
            return;
        }
        item.status = ItemStatus::Error;
        item.error = Some(error);
        self.fail_count += 1;
    }

    /// Progress event describing this state, for lightweight listeners.
    pub fn status_event(&self) -> BatchStatusEvent {
        let total = self.total_files() as u32;
        if !self.is_running && self.is_complete() {
            return BatchStatusEvent::Completed {
                successful: self.success_count,
                failed: self.fail_count,
                duration_ms: self.elapsed_ms,
            };
        }
        match self.current_index.and_then(|i| self.items.get(i)) {
            Some(item) => BatchStatusEvent::Progress {
                completed: self.terminal_count() as u32,
                total,
                current_filename: item.filename.clone(),
            },
            None => BatchStatusEvent::Started {
                batch_id: self.batch_id.clone(),
                file_count: total,
            },
        }
    }
}

// ═══════════════════════════════════════════
// Batch Status Events
// ═══════════════════════════════════════════

/// Compact progress event for status indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchStatusEvent {
    Started {
        batch_id: String,
        file_count: u32,
    },
    Progress {
        completed: u32,
        total: u32,
        current_filename: String,
    },
    Completed {
        successful: u32,
        failed: u32,
        duration_ms: u64,
    },
}
