//! Recording inputs: extension check, loading, content type.

use std::path::{Path, PathBuf};

use super::error::AnalysisError;
use crate::config::{ALLOWED_EXTENSIONS, ALL_MODELS_SENTINEL};

/// A recording ready to be sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl RecordingInput {
    /// Build from in-memory bytes. The filename extension must be supported.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, AnalysisError> {
        let filename = filename.into();
        check_extension(&filename)?;
        Ok(Self { filename, bytes })
    }

    /// Load a recording from disk.
    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        check_extension(&filename)?;
        let bytes = std::fs::read(path)?;
        Ok(Self { filename, bytes })
    }

    /// Lowercased extension including the dot, e.g. `.csv`.
    pub fn extension(&self) -> String {
        extension_of(&self.filename)
    }

    pub fn content_type(&self) -> &'static str {
        if self.extension() == ".csv" {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Reject filenames whose extension the engine does not accept.
pub fn check_extension(filename: &str) -> Result<(), AnalysisError> {
    let extension = extension_of(filename);
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(AnalysisError::UnsupportedFormat {
            extension,
            allowed: ALLOWED_EXTENSIONS.join(", "),
        })
    }
}

/// Load every supported path; unsupported or unreadable ones are returned
/// separately with their error so the caller can report them.
pub fn load_supported(paths: &[PathBuf]) -> (Vec<RecordingInput>, Vec<(PathBuf, AnalysisError)>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for path in paths {
        match RecordingInput::from_path(path) {
            Ok(input) => accepted.push(input),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping recording");
                rejected.push((path.clone(), e));
            }
        }
    }

    (accepted, rejected)
}

/// Model ids to request. An empty selection means every model.
pub fn resolve_model_ids(selection: &[String]) -> Vec<String> {
    let ids: Vec<String> = selection
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        vec![ALL_MODELS_SENTINEL.to_string()]
    } else {
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_extensions_case_insensitive() {
        assert!(check_extension("rec.csv").is_ok());
        assert!(check_extension("REC.PARQUET").is_ok());
        assert!(check_extension("scan.Xml").is_ok());
        assert!(check_extension("signal.npy").is_ok());
    }

    #[test]
    fn rejects_other_extensions() {
        let err = check_extension("notes.pdf").unwrap_err();
        match err {
            AnalysisError::UnsupportedFormat { extension, allowed } => {
                assert_eq!(extension, ".pdf");
                assert!(allowed.contains(".parquet"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(check_extension("no_extension").is_err());
    }

    #[test]
    fn content_type_by_extension() {
        let csv = RecordingInput::new("a.CSV", vec![]).unwrap();
        assert_eq!(csv.content_type(), "text/csv");
        let parquet = RecordingInput::new("a.parquet", vec![]).unwrap();
        assert_eq!(parquet.content_type(), "application/octet-stream");
    }

    #[test]
    fn load_supported_splits_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("ecg_001.csv");
        std::fs::write(&good, b"lead_I;lead_II\n0.1;0.2\n").unwrap();
        let bad = tmp.path().join("photo.png");
        std::fs::write(&bad, b"png").unwrap();
        let missing = tmp.path().join("missing.csv");

        let (accepted, rejected) = load_supported(&[good, bad.clone(), missing.clone()]);

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].filename, "ecg_001.csv");
        assert_eq!(accepted[0].bytes, b"lead_I;lead_II\n0.1;0.2\n");
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].0, bad);
        assert!(matches!(rejected[0].1, AnalysisError::UnsupportedFormat { .. }));
        assert_eq!(rejected[1].0, missing);
        assert!(matches!(rejected[1].1, AnalysisError::Io(_)));
    }

    #[test]
    fn empty_selection_means_all_models() {
        assert_eq!(resolve_model_ids(&[]), vec!["all".to_string()]);
        assert_eq!(resolve_model_ids(&["  ".to_string()]), vec!["all".to_string()]);
    }

    #[test]
    fn selection_kept_in_order() {
        let ids = resolve_model_ids(&["efficientnet_77".to_string(), " wcr_afib ".to_string()]);
        assert_eq!(ids, vec!["efficientnet_77", "wcr_afib"]);
    }
}
