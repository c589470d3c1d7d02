//! Tabular export: one denormalized row per analyzed recording.
//!
//! ## Column layout
//! ```text
//! filename
//! per diagnosis (sorted):
//!   one architecture:   <dx>_prob, <dx>_status
//!   several:            <dx>_<ARCH>_prob, <dx>_<ARCH>_status (per ARCH, sorted), <dx>_diff
//! per binary model id (sorted):
//!   <id>_prob, <id>_status
//! ```
//! Column order depends only on the set of names seen, never on map order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::AnalysisError;
use super::normalize::{normalize_outcome, NormalizedResult};
use super::types::{AnalysisOutcome, BatchState, Diagnosis};

pub const LABEL_HEADER: &str = "filename";
pub const CSV_DELIMITER: &str = ";";
pub const UTF8_BOM: &str = "\u{feff}";

/// Header plus rows, all cells already formatted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    /// `;`-separated, BOM-prefixed, `\n`-joined. Cells containing the
    /// delimiter, quotes or line breaks are quoted.
    pub fn to_csv(&self) -> String {
        let lines: Vec<String> = std::iter::once(&self.headers)
            .chain(self.rows.iter())
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| escape_cell(c))
                    .collect::<Vec<_>>()
                    .join(CSV_DELIMITER)
            })
            .collect();
        format!("{UTF8_BOM}{}", lines.join("\n"))
    }

    /// Position of a header, for readers of the table.
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}

fn escape_cell(cell: &str) -> String {
    if cell.contains(CSV_DELIMITER) || cell.contains(['"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Two decimals, ties to even on the exact binary value (`0.125` → `0.12`).
pub fn format_probability(probability: f64) -> String {
    format!("{probability:.2}")
}

/// Name universes collected across every subject.
struct Schema {
    diagnoses: BTreeSet<String>,
    architectures: BTreeSet<String>,
    binary_models: BTreeSet<String>,
}

impl Schema {
    fn collect(subjects: &[(String, NormalizedResult)]) -> Self {
        let mut schema = Self {
            diagnoses: BTreeSet::new(),
            architectures: BTreeSet::new(),
            binary_models: BTreeSet::new(),
        };
        for (_, normalized) in subjects {
            for (arch, by_name) in &normalized.multi_label_by_architecture {
                schema.architectures.insert(arch.clone());
                schema.diagnoses.extend(by_name.keys().cloned());
            }
            schema
                .binary_models
                .extend(normalized.binary_by_model_id.keys().cloned());
        }
        schema
    }

    fn has_multiple_architectures(&self) -> bool {
        self.architectures.len() > 1
    }

    fn headers(&self) -> Vec<String> {
        let mut headers = vec![LABEL_HEADER.to_string()];
        for name in &self.diagnoses {
            if self.has_multiple_architectures() {
                for arch in &self.architectures {
                    headers.push(format!("{name}_{arch}_prob"));
                    headers.push(format!("{name}_{arch}_status"));
                }
                headers.push(format!("{name}_diff"));
            } else {
                headers.push(format!("{name}_prob"));
                headers.push(format!("{name}_status"));
            }
        }
        for id in &self.binary_models {
            headers.push(format!("{id}_prob"));
            headers.push(format!("{id}_status"));
        }
        headers
    }

    fn row(&self, label: &str, normalized: &NormalizedResult) -> Vec<String> {
        let mut row = vec![label.to_string()];

        for name in &self.diagnoses {
            if self.has_multiple_architectures() {
                let mut probabilities = Vec::with_capacity(2);
                for arch in &self.architectures {
                    let found = lookup(normalized, arch, name);
                    push_cells(&mut row, found);
                    if let Some(d) = found {
                        probabilities.push(d.probability);
                    }
                }
                // Only the first two architectures take part in the diff.
                match probabilities.as_slice() {
                    [first, second, ..] => row.push(format_probability((first - second).abs())),
                    _ => row.push(String::new()),
                }
            } else {
                let found = self
                    .architectures
                    .first()
                    .and_then(|arch| lookup(normalized, arch, name));
                push_cells(&mut row, found);
            }
        }

        for id in &self.binary_models {
            push_cells(&mut row, normalized.binary_by_model_id.get(id));
        }

        row
    }
}

fn lookup<'a>(normalized: &'a NormalizedResult, arch: &str, name: &str) -> Option<&'a Diagnosis> {
    normalized
        .multi_label_by_architecture
        .get(arch)
        .and_then(|by_name| by_name.get(name))
}

fn push_cells(row: &mut Vec<String>, diagnosis: Option<&Diagnosis>) {
    match diagnosis {
        Some(d) => {
            row.push(format_probability(d.probability));
            row.push(d.status.as_str().to_string());
        }
        None => {
            row.push(String::new());
            row.push(String::new());
        }
    }
}

/// Build the export table for labelled subjects, one row each, in order.
pub fn build_table(subjects: &[(String, NormalizedResult)]) -> ExportTable {
    let schema = Schema::collect(subjects);
    ExportTable {
        headers: schema.headers(),
        rows: subjects
            .iter()
            .map(|(label, normalized)| schema.row(label, normalized))
            .collect(),
    }
}

/// Successful batch items as export subjects, labelled by filename.
pub fn batch_subjects(state: &BatchState) -> Vec<(String, NormalizedResult)> {
    state
        .items
        .iter()
        .filter_map(|item| {
            let normalized = item.successful_outcome().and_then(normalize_outcome)?;
            Some((item.filename.clone(), normalized))
        })
        .collect()
}

pub fn batch_table(state: &BatchState) -> ExportTable {
    build_table(&batch_subjects(state))
}

/// Table for a single analysis. A failed outcome yields the header row only.
pub fn single_subject_table(filename: &str, outcome: &AnalysisOutcome) -> ExportTable {
    let subjects: Vec<(String, NormalizedResult)> = normalize_outcome(outcome)
        .map(|n| vec![(filename.to_string(), n)])
        .unwrap_or_default();
    build_table(&subjects)
}

/// `ecg_analysis_results_<date>.csv`
pub fn batch_export_filename(date: NaiveDate) -> String {
    format!("ecg_analysis_results_{}.csv", date.format("%Y-%m-%d"))
}

/// `ecg_analysis_<stem>_<date>.csv`, the stem being the filename minus its last extension.
pub fn single_export_filename(filename: &str, date: NaiveDate) -> String {
    let stem = match filename.rfind('.') {
        Some(dot) if dot > 0 && !filename[dot + 1..].contains('/') => &filename[..dot],
        _ => filename,
    };
    format!("ecg_analysis_{stem}_{}.csv", date.format("%Y-%m-%d"))
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Write the table as CSV into `dir`, creating it if needed.
pub fn save_csv(dir: &Path, filename: &str, table: &ExportTable) -> Result<PathBuf, AnalysisError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    let csv = table.to_csv();
    std::fs::write(&path, csv.as_bytes())?;
    tracing::info!(
        path = %path.display(),
        rows = table.rows.len(),
        columns = table.headers.len(),
        "CSV export written"
    );
    Ok(path)
}
