//! Send progress display and human-readable units.

use callwire_transfer::{SendProgress, SendReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{msg}\n[{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec}";

/// Progress bar fed by a sender's progress updates
pub struct SendBar {
    bar: ProgressBar,
    label: String,
}

impl SendBar {
    /// Bar for a payload of `total_bytes` named `label`
    #[must_use]
    pub fn new(label: &str, total_bytes: u64) -> Self {
        let bar = ProgressBar::new(total_bytes);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(format!("Sending {label}"));
        Self {
            bar,
            label: label.to_string(),
        }
    }

    /// Apply one progress update
    pub fn observe(&self, progress: &SendProgress) {
        self.bar.set_position(progress.bytes_sent);
        self.bar.set_message(format!(
            "Sending {} (chunk {}/{})",
            self.label, progress.chunks_sent, progress.total_chunks
        ));
    }

    /// Finish after the last chunk went out
    pub fn complete(&self, report: &SendReport) {
        self.bar.set_position(report.bytes_sent);
        self.bar.finish_with_message(format!(
            "Sent {} in {} chunks",
            self.label, report.total_chunks
        ));
    }

    /// Leave the bar where it stopped
    pub fn fail(&self) {
        self.bar.abandon_with_message(format!("Failed to send {}", self.label));
    }
}

/// Byte count in binary units
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const SCALES: [(u64, &str); 4] = [
        (1 << 40, "TiB"),
        (1 << 30, "GiB"),
        (1 << 20, "MiB"),
        (1 << 10, "KiB"),
    ];

    SCALES
        .iter()
        .find(|(scale, _)| bytes >= *scale)
        .map_or_else(
            || format!("{bytes} B"),
            |(scale, unit)| format!("{:.2} {unit}", bytes as f64 / *scale as f64),
        )
}

/// Rate given in bits per second
#[must_use]
pub fn format_bitrate(bits_per_sec: f64) -> String {
    if bits_per_sec >= 1e6 {
        format!("{:.2} Mbit/s", bits_per_sec / 1e6)
    } else if bits_per_sec >= 1e3 {
        format!("{:.1} kbit/s", bits_per_sec / 1e3)
    } else {
        format!("{bits_per_sec:.0} bit/s")
    }
}

/// Short duration; round-trip times and loopback transfers are mostly
/// sub-second
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    match duration.as_secs() {
        0 => format!("{} ms", duration.as_millis()),
        1..60 => format!("{:.2} s", duration.as_secs_f64()),
        secs => format!("{}m{:02}s", secs / 60, secs % 60),
    }
}
