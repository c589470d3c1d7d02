use std::time::{Duration, Instant};

use reqwest::blocking::multipart::{Form, Part};

use super::error::AnalysisError;
use super::input::RecordingInput;
use super::traits::AnalysisInvoker;
use super::types::AnalysisOutcome;
use crate::config::EngineConfig;

/// HTTP client for the remote ECG inference engine.
///
/// Each recording is posted as multipart form data to `{base_url}/analyze`.
/// Transient failures (connection, timeout, non-422 HTTP errors) are retried
/// up to `max_retries` attempts; validation errors and unreadable responses are not.
pub struct EngineClient {
    config: EngineConfig,
    client: reqwest::blocking::Client,
}

impl EngineClient {
    pub fn new(config: EngineConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::HttpClient(e.to_string()))?;

        Ok(Self {
            config: EngineConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }

    pub fn analyze_url(&self) -> String {
        format!("{}/analyze", self.config.base_url)
    }

    fn attempt(
        &self,
        input: &RecordingInput,
        model_ids: &[String],
        use_gpu: bool,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let file = Part::bytes(input.bytes.clone())
            .file_name(input.filename.clone())
            .mime_str(input.content_type())
            .map_err(|e| AnalysisError::HttpClient(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("models", model_ids.join(","))
            .text("use_gpu", use_gpu.to_string());

        let response = self
            .client
            .post(self.analyze_url())
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout {
                        secs: self.config.timeout_secs,
                    }
                } else if e.is_connect() {
                    AnalysisError::EngineConnection(self.config.base_url.clone())
                } else {
                    AnalysisError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().unwrap_or_default();
            return Err(AnalysisError::Validation(truncate(&body, 500)));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AnalysisError::EngineStatus {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let body = response
            .text()
            .map_err(|e| AnalysisError::ResponseParsing(format!("unreadable body: {e}")))?;
        let mut outcome: AnalysisOutcome = serde_json::from_str(&body).map_err(|e| {
            AnalysisError::ResponseParsing(format!("{e} (body: {})", truncate(&body, 200)))
        })?;
        if outcome.ecg_filename.is_empty() {
            outcome.ecg_filename = input.filename.clone();
        }
        Ok(outcome)
    }
}

impl AnalysisInvoker for EngineClient {
    fn analyze(
        &self,
        input: &RecordingInput,
        model_ids: &[String],
        use_gpu: bool,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let start = Instant::now();
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            tracing::info!(
                filename = %input.filename,
                size = input.bytes.len(),
                attempt,
                attempts,
                "Sending recording to inference engine"
            );

            match self.attempt(input, model_ids, use_gpu) {
                Ok(outcome) => {
                    tracing::info!(
                        filename = %input.filename,
                        patient_id = %outcome.patient_id,
                        models = outcome.results.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Analysis complete"
                    );
                    return Ok(outcome);
                }
                Err(e) if !is_retryable(&e) => {
                    tracing::warn!(filename = %input.filename, error = %e, "Analysis rejected");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        filename = %input.filename,
                        attempt,
                        error = %e,
                        "Inference engine error"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < attempts && self.config.retry_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
            }
        }

        tracing::error!(
            filename = %input.filename,
            attempts,
            last_error = %last_error,
            "Inference engine unreachable"
        );
        Err(AnalysisError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

fn is_retryable(error: &AnalysisError) -> bool {
    matches!(
        error,
        AnalysisError::EngineConnection(_)
            | AnalysisError::Timeout { .. }
            | AnalysisError::EngineStatus { .. }
            | AnalysisError::HttpClient(_)
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
