//! Per-image decision report for the `--report` flag
//!
//! Collects what the scanner found and what the planner did with it, and
//! prints one table per run.
use prettytable::{format, Cell, Row, Table};
use std::path::Path;

use super::subject_detection::{DetectionMethod, SubjectDetectionResult};

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub input_filename: String,
    pub output_filename: String,
    /// Absent for commands that do not scan, such as outpaint
    pub detection: Option<SubjectDetectionResult>,
    /// Planner or canvas decision, e.g. `crop 1000x1000+1000+0`
    pub decision: String,
}

#[derive(Debug, Default)]
pub struct ReframeReport {
    pub entries: Vec<ReportEntry>,
}

impl ReframeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn fallback_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                e.detection
                    .as_ref()
                    .is_some_and(|d| d.method == DetectionMethod::Fallback)
            })
            .count()
    }

    /// Table of all entries
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);

        table.add_row(Row::new(vec![
            Cell::new("Input"),
            Cell::new("Output"),
            Cell::new("Method"),
            Cell::new("Focal"),
            Cell::new("Score"),
            Cell::new("Secondary"),
            Cell::new("Decision"),
        ]));

        for entry in &self.entries {
            let (method, focal, score, secondary) = match &entry.detection {
                Some(d) => (
                    d.method.to_string(),
                    format!("{},{}", d.primary.x, d.primary.y),
                    format!("{:.2}", d.primary.score),
                    d.secondary
                        .map(|p| format!("{},{}", p.x, p.y))
                        .unwrap_or_else(|| "✗".to_string()),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
            };

            table.add_row(Row::new(vec![
                Cell::new(&truncate(&entry.input_filename, 25)),
                Cell::new(&truncate(&entry.output_filename, 25)),
                Cell::new(&method),
                Cell::new(&focal),
                Cell::new(&score),
                Cell::new(&secondary),
                Cell::new(&entry.decision),
            ]));
        }

        table
    }

    pub fn print(&self) {
        if self.entries.is_empty() {
            return;
        }

        println!("\n🎯 REFRAME DECISIONS ({} images)\n", self.entries.len());
        self.table().printstd();

        let total = self.entries.len();
        let fallbacks = self.fallback_count();
        let with_secondary = self
            .entries
            .iter()
            .filter(|e| e.detection.as_ref().is_some_and(|d| d.secondary.is_some()))
            .count();

        println!("\n📊 Summary:");
        println!("   • Images processed: {}", total);
        println!(
            "   • Center fallbacks: {} ({:.1}%)",
            fallbacks,
            fallbacks as f32 / total as f32 * 100.0
        );
        println!("   • Secondary subjects found: {}", with_secondary);
        println!();
    }
}

/// Truncate string to fit in column
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

/// Helper to extract filename from path
pub fn extract_filename(path: &Path) -> String {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unknown")
        .to_string()
}
