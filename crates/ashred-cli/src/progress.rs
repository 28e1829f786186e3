//! Progress display and the final summary line.

use ashred_core::ShredReport;
use ashred_core::pipeline::Progress;
use indicatif::{ProgressBar, ProgressStyle};

/// Shred progress tracker
pub struct ShredProgress {
    bar: ProgressBar,
}

impl ShredProgress {
    /// Create a progress tracker; hidden unless `visible`
    #[must_use]
    pub fn new(target: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .expect("Invalid progress bar template")
                .progress_chars("#>-")
        );

        bar.set_message(format!("Shredding: {target}"));

        Self { bar }
    }

    /// Update progress from a pipeline snapshot
    pub fn update(&self, progress: Progress) {
        if self.bar.length() != Some(progress.total) {
            self.bar.set_length(progress.total);
        }
        self.bar.set_position(progress.confirmed);
    }

    /// Finish with success message
    pub fn finish(&self) {
        self.bar.finish_with_message("Shred complete");
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// The one-line report printed after a successful run.
///
/// `<bytes> bytes in <seconds> seconds = <rate> bytes/s`
#[must_use]
pub fn summary_line(report: &ShredReport) -> String {
    format!(
        "{} bytes in {} seconds = {} bytes/s",
        report.bytes_written(),
        report.elapsed.as_secs_f64(),
        report.throughput()
    )
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}
