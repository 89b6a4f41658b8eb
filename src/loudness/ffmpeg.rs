//! Loudness measurement using ffmpeg's `ebur128` filter.
//!
//! This module shells out to the `ffmpeg` command-line tool and parses the
//! summary the filter prints on stderr once decoding finishes:
//!
//! ```text
//! [Parsed_ebur128_0 @ 0x55d5c1c0] Summary:
//!
//!   Integrated loudness:
//!     I:         -14.7 LUFS
//!     Threshold: -25.0 LUFS
//!   ...
//!   True peak:
//!     Peak:        2.6 dBFS
//! ```
//!
//! Install ffmpeg:
//! - Windows: `winget install Gyan.FFmpeg`
//! - macOS: `brew install ffmpeg`
//! - Linux: `apt install ffmpeg` or equivalent

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use super::{LoudnessMeasurement, LoudnessSource};
use crate::error::{Error, Result};

/// Default program name, resolved through `PATH`.
pub const DEFAULT_FFMPEG: &str = "ffmpeg";

/// [`LoudnessSource`] backed by an ffmpeg executable.
#[derive(Debug, Clone)]
pub struct FfmpegLoudness {
    program: PathBuf,
}

impl Default for FfmpegLoudness {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl FfmpegLoudness {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Get the ffmpeg version line (for diagnostics)
    pub fn version(&self) -> Option<String> {
        Command::new(&self.program)
            .arg("-version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| {
                String::from_utf8_lossy(&o.stdout)
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
            })
    }

    /// Check if the configured ffmpeg can be run
    pub fn is_available(&self) -> bool {
        self.version().is_some()
    }
}

impl LoudnessSource for FfmpegLoudness {
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement> {
        // R128 tags carry no peak, so Opus input skips the costly true peak pass
        let with_peak = !is_opus_path(path);
        let args = command_args(path, with_peak);
        debug!(target: "loudness::ffmpeg", path = %path.display(), with_peak, "Measuring");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                Error::measurement(
                    path,
                    format!("failed to run {}: {}", self.program.display(), e),
                )
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let last_line = stderr.lines().last().unwrap_or_default().trim();
            return Err(Error::measurement(
                path,
                format!("ffmpeg failed ({}): {}", output.status, last_line),
            ));
        }

        trace!(target: "loudness::ffmpeg", output = %stderr, "ffmpeg stderr");
        let measurement = parse_ebur128_summary(&stderr)
            .ok_or_else(|| Error::measurement(path, "no ebur128 summary in ffmpeg output"))?;

        debug!(
            target: "loudness::ffmpeg",
            path = %path.display(),
            loudness = measurement.loudness_lufs,
            peak = ?measurement.true_peak_dbtp,
            "Measured"
        );
        Ok(measurement)
    }
}

fn command_args(path: &Path, with_peak: bool) -> Vec<OsString> {
    let filter = if with_peak { "ebur128=peak=true" } else { "ebur128" };
    let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-nostdin", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-map", "0:a:0", "-filter:a", filter, "-f", "null", "-"]
            .iter()
            .map(OsString::from),
    );
    args
}

fn is_opus_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("opus"))
}

/// Parse the final `Summary:` block printed by the ebur128 filter.
///
/// Returns `None` if no integrated loudness can be found. The peak is absent
/// unless the filter ran with true peak metering.
pub fn parse_ebur128_summary(text: &str) -> Option<LoudnessMeasurement> {
    let summary = &text[text.rfind("Summary:")?..];

    let mut loudness = None;
    let mut peak = None;
    for line in summary.lines().map(str::trim) {
        if loudness.is_none() {
            loudness = field_value(line, "I:");
        }
        if peak.is_none() {
            peak = field_value(line, "Peak:");
        }
    }

    Some(LoudnessMeasurement::new(loudness?, peak))
}

/// Numeric value of a `Label: value unit` line.
fn field_value(line: &str, label: &str) -> Option<f64> {
    line.strip_prefix(label)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}
