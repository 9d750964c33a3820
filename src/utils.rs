use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Create a styled progress bar
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(template) = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
    ) {
        pb.set_style(template.progress_chars("#>-"));
    }
    pb
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Install the stderr tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `-v` selects debug output for this
/// crate and warnings are shown for everything else.
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "warn,reframe_processor=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Check the input paths before any work starts
pub fn validate_input_paths(input_paths: &[PathBuf]) -> Result<()> {
    if input_paths.is_empty() {
        return Err(anyhow::anyhow!("No input paths given"));
    }
    for input_path in input_paths {
        if !input_path.exists() {
            return Err(anyhow::anyhow!(
                "Input path does not exist: {}",
                input_path.display()
            ));
        }
        if !input_path.is_dir() && !input_path.is_file() {
            return Err(anyhow::anyhow!(
                "Input path is neither a file nor a directory: {}",
                input_path.display()
            ));
        }
    }
    Ok(())
}

/// Validate the knobs shared by every batch command
pub fn validate_batch_settings(sensitivity: u8, jobs: usize, extensions: &[String]) -> Result<()> {
    if extensions.is_empty() {
        return Err(anyhow::anyhow!("No valid extensions specified"));
    }

    if !(1..=10).contains(&sensitivity) {
        return Err(anyhow::anyhow!(
            "Sensitivity must be between 1 and 10, got: {}",
            sensitivity
        ));
    }

    if jobs > 32 {
        return Err(anyhow::anyhow!(
            "Job count too high (max 32), got: {}",
            jobs
        ));
    }

    Ok(())
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file has one of the specified extensions
pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    if let Some(ext) = get_file_extension(path) {
        extensions.contains(&ext)
    } else {
        false
    }
}

/// Print verbose information if verbose mode is enabled
pub fn verbose_println(verbose: bool, message: &str) {
    if verbose {
        println!("{} {}", style("[VERBOSE]").dim(), message);
    }
}

/// Print warning message
pub fn warn_println(message: &str) {
    println!("{} {}", style("[WARNING]").yellow().bold(), message);
}

/// Print error message
pub fn error_println(message: &str) {
    eprintln!("{} {}", style("[ERROR]").red().bold(), message);
}

/// Calculate processing statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    /// Images that got the center fallback instead of a detected subject
    pub fallbacks: usize,
    pub total_duration: Duration,
}

impl ProcessingStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.successful as f64 / self.total_files as f64) * 100.0
        }
    }

    pub fn average_duration(&self) -> Duration {
        if self.successful == 0 {
            Duration::new(0, 0)
        } else {
            self.total_duration / self.successful as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(1)), "1.000s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
    }

    #[test]
    fn test_has_valid_extension() {
        let extensions = vec!["jpg".to_string(), "png".to_string()];
        assert!(has_valid_extension(Path::new("a/b/photo.JPG"), &extensions));
        assert!(has_valid_extension(Path::new("photo.png"), &extensions));
        assert!(!has_valid_extension(Path::new("photo.webp"), &extensions));
        assert!(!has_valid_extension(Path::new("README"), &extensions));
    }

    #[test]
    fn test_validate_batch_settings() {
        let extensions = vec!["jpg".to_string()];
        assert!(validate_batch_settings(5, 0, &extensions).is_ok());
        assert!(validate_batch_settings(0, 0, &extensions).is_err());
        assert!(validate_batch_settings(11, 0, &extensions).is_err());
        assert!(validate_batch_settings(5, 33, &extensions).is_err());
        assert!(validate_batch_settings(5, 4, &[]).is_err());
    }

    #[test]
    fn test_validate_input_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_input_paths(&[dir.path().to_path_buf()]).is_ok());
        assert!(validate_input_paths(&[dir.path().join("missing")]).is_err());
        assert!(validate_input_paths(&[]).is_err());
    }

    #[test]
    fn test_stats_rates() {
        let stats = ProcessingStats {
            total_files: 4,
            successful: 3,
            failed: 1,
            fallbacks: 1,
            total_duration: Duration::from_secs(3),
        };
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(stats.average_duration(), Duration::from_secs(1));
    }
}
