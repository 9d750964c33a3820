//! JSON output for tool integration
//!
//! When --json-progress flag is enabled, all progress and status information
//! is emitted as JSON lines to stdout, suppressing all other output.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::image_processing::subject_detection::SubjectDetectionResult;
use crate::image_processing::RecomposeOutcome;

/// Last progress emission timestamp (milliseconds since epoch)
/// Used for throttling progress updates to ~25 FPS (40ms between updates)
static LAST_PROGRESS_MS: AtomicU64 = AtomicU64::new(0);

const PROGRESS_INTERVAL_MS: u64 = 40;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonMessage {
    /// Progress update
    Progress {
        current: usize,
        total: usize,
        message: String,
    },
    /// Focal points found for one file
    Detection {
        input_path: String,
        width: u32,
        height: u32,
        result: SubjectDetectionResult,
    },
    /// File processing completed
    FileCompleted {
        input_path: String,
        output_paths: Vec<String>,
        processing_time_ms: u128,
    },
    /// Recompose finished; `protected` is false when the synthesized
    /// image was copied through without the original on top
    Recomposed {
        input_path: String,
        output_path: String,
        protected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        processing_time_ms: u128,
    },
    /// File processing failed
    FileFailed { input_path: String, error: String },
    /// Processing summary
    Summary {
        total_files: usize,
        processed: usize,
        failed: usize,
        fallbacks: usize,
        duration_secs: f64,
    },
}

impl JsonMessage {
    pub fn to_line(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Emit JSON message to stdout
    pub fn emit(&self) {
        if let Some(json) = self.to_line() {
            println!("{}", json);
        }
    }

    /// Create and emit progress message (throttled to ~25 FPS)
    ///
    /// The final progress (current == total) is always emitted.
    pub fn progress(current: usize, total: usize, message: impl Into<String>) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if should_emit(now_ms, LAST_PROGRESS_MS.load(Ordering::Relaxed), current, total) {
            LAST_PROGRESS_MS.store(now_ms, Ordering::Relaxed);
            Self::Progress {
                current,
                total,
                message: message.into(),
            }
            .emit();
        }
    }

    pub fn detection(input_path: &Path, dimensions: (u32, u32), result: &SubjectDetectionResult) {
        Self::Detection {
            input_path: input_path.display().to_string(),
            width: dimensions.0,
            height: dimensions.1,
            result: result.clone(),
        }
        .emit();
    }

    /// Create and emit file completed message
    pub fn file_completed(input_path: &Path, output_paths: &[std::path::PathBuf], processing_time_ms: u128) {
        Self::FileCompleted {
            input_path: input_path.display().to_string(),
            output_paths: output_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            processing_time_ms,
        }
        .emit();
    }

    pub fn recomposed_message(
        input_path: &Path,
        output_path: &Path,
        outcome: &RecomposeOutcome,
        processing_time_ms: u128,
    ) -> Self {
        let reason = match outcome {
            RecomposeOutcome::Protected => None,
            RecomposeOutcome::Unprotected { reason } => Some(reason.clone()),
        };
        Self::Recomposed {
            input_path: input_path.display().to_string(),
            output_path: output_path.display().to_string(),
            protected: outcome.is_protected(),
            reason,
            processing_time_ms,
        }
    }

    /// Create and emit recompose result message
    pub fn recomposed(input_path: &Path, output_path: &Path, outcome: &RecomposeOutcome, processing_time_ms: u128) {
        Self::recomposed_message(input_path, output_path, outcome, processing_time_ms).emit();
    }

    /// Create and emit file failed message
    pub fn file_failed(input_path: &Path, error: impl Into<String>) {
        Self::FileFailed {
            input_path: input_path.display().to_string(),
            error: error.into(),
        }
        .emit();
    }

    /// Create and emit summary message
    pub fn summary(total_files: usize, processed: usize, failed: usize, fallbacks: usize, duration_secs: f64) {
        Self::Summary {
            total_files,
            processed,
            failed,
            fallbacks,
            duration_secs,
        }
        .emit();
    }
}

fn should_emit(now_ms: u64, last_ms: u64, current: usize, total: usize) -> bool {
    now_ms.saturating_sub(last_ms) >= PROGRESS_INTERVAL_MS || current == total
}
