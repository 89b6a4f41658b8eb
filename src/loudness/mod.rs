//! Loudness measurement.
//!
//! The measurement itself is delegated to an external analyzer behind the
//! [`LoudnessSource`] trait, so the scanner can be driven by a test double.

pub mod ffmpeg;

use std::path::Path;

use serde::Serialize;

use crate::error::Result;

pub use ffmpeg::FfmpegLoudness;

/// Integrated loudness and true peak of one file (or one album).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoudnessMeasurement {
    /// Integrated loudness in LUFS
    pub loudness_lufs: f64,
    /// True peak in dBTP, absent when the analyzer did not report one
    pub true_peak_dbtp: Option<f64>,
}

impl LoudnessMeasurement {
    pub fn new(loudness_lufs: f64, true_peak_dbtp: Option<f64>) -> Self {
        Self {
            loudness_lufs,
            true_peak_dbtp,
        }
    }
}

/// Something that can measure a file's loudness.
///
/// Implementations must be shareable across the measurement worker pool.
pub trait LoudnessSource: Send + Sync {
    /// Measure the file at `path`.
    ///
    /// Fails with [`crate::error::Error::Measurement`] when the file cannot be analyzed.
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement>;
}

impl<T: LoudnessSource + ?Sized> LoudnessSource for &T {
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement> {
        (**self).measure(path)
    }
}
