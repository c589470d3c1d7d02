//! Result normalization: classifies model outputs and groups them for export.
//!
//! Each `ModelResult` is classified once into a [`ClassifiedResult`]; the export
//! stage only ever sees the grouped [`NormalizedResult`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{AnalysisOutcome, Diagnosis, ModelResult};

/// A model result after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedResult<'a> {
    /// Many-class output, grouped under its upper-cased architecture.
    MultiLabel {
        architecture: String,
        diagnoses: &'a [Diagnosis],
    },
    /// Single-diagnosis output. `None` when the model returned nothing.
    Binary {
        model_id: &'a str,
        diagnosis: Option<&'a Diagnosis>,
    },
    /// Untagged output too small to be multi-label.
    Unclassified,
}

/// Classify one model result.
pub fn classify(result: &ModelResult) -> ClassifiedResult<'_> {
    if result.is_multi_label() {
        ClassifiedResult::MultiLabel {
            architecture: result.architecture.trim().to_uppercase(),
            diagnoses: &result.diagnoses,
        }
    } else if result.is_binary() {
        ClassifiedResult::Binary {
            model_id: &result.model_id,
            diagnosis: result.diagnoses.first(),
        }
    } else {
        ClassifiedResult::Unclassified
    }
}

/// Model outputs of one recording, grouped for tabular export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    /// ARCHITECTURE → diagnosis name → diagnosis
    pub multi_label_by_architecture: BTreeMap<String, BTreeMap<String, Diagnosis>>,
    /// model_id → its single diagnosis
    pub binary_by_model_id: BTreeMap<String, Diagnosis>,
}

impl NormalizedResult {
    pub fn is_empty(&self) -> bool {
        self.multi_label_by_architecture.is_empty() && self.binary_by_model_id.is_empty()
    }
}

/// Group model results by kind. Never fails: results that cannot be
/// classified, and binary results without a diagnosis, are dropped.
///
/// Two multi-label models sharing an architecture merge into one map; for a
/// diagnosis both produce, the model with the greater id wins.
pub fn normalize(results: &BTreeMap<String, ModelResult>) -> NormalizedResult {
    let mut normalized = NormalizedResult::default();

    for (key, result) in results {
        match classify(result) {
            ClassifiedResult::MultiLabel { architecture, diagnoses } => {
                let by_name = normalized
                    .multi_label_by_architecture
                    .entry(architecture)
                    .or_default();
                for d in diagnoses {
                    by_name.insert(d.name.clone(), d.clone());
                }
            }
            ClassifiedResult::Binary { model_id, diagnosis: Some(d) } => {
                normalized
                    .binary_by_model_id
                    .insert(model_id.to_string(), d.clone());
            }
            ClassifiedResult::Binary { model_id, diagnosis: None } => {
                tracing::debug!(model_id, "Binary result without diagnosis, skipped");
            }
            ClassifiedResult::Unclassified => {
                tracing::debug!(
                    model_id = key.as_str(),
                    diagnoses = result.diagnoses.len(),
                    "Model result has no usable type, skipped"
                );
            }
        }
    }

    normalized
}

/// Normalize the results of a successful outcome. Failed outcomes yield `None`.
pub fn normalize_outcome(outcome: &AnalysisOutcome) -> Option<NormalizedResult> {
    outcome.success.then(|| normalize(&outcome.results))
}
