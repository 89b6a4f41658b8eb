//! Album level loudness from per-track measurements.
//!
//! Loudness is averaged in the energy domain: each track's LUFS value is
//! converted to linear power, the powers are averaged, and the mean is
//! converted back. The album peak is the highest track peak.
//!
//! Inputs are sorted before summing so the floating point result does not
//! depend on the order tracks were measured in.

use crate::error::{Error, Result};
use crate::loudness::LoudnessMeasurement;

/// Combine track measurements into one album measurement.
///
/// Fails with [`Error::InvalidInput`] for an empty slice.
pub fn aggregate(tracks: &[LoudnessMeasurement]) -> Result<LoudnessMeasurement> {
    match tracks {
        [] => Err(Error::invalid_input("cannot aggregate an empty album")),
        [single] => Ok(*single),
        _ => Ok(LoudnessMeasurement::new(
            album_loudness(tracks),
            album_peak(tracks),
        )),
    }
}

fn album_loudness(tracks: &[LoudnessMeasurement]) -> f64 {
    let mut energies: Vec<f64> = tracks
        .iter()
        .map(|t| 10f64.powf(t.loudness_lufs / 10.0))
        .collect();
    energies.sort_by(f64::total_cmp);

    let mean = energies.iter().sum::<f64>() / energies.len() as f64;
    10.0 * mean.log10()
}

fn album_peak(tracks: &[LoudnessMeasurement]) -> Option<f64> {
    tracks
        .iter()
        .filter_map(|t| t.true_peak_dbtp)
        .reduce(f64::max)
}
