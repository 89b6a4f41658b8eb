//! Reading and writing normalization tags.
//!
//! Uses the lofty crate for format-independent tag access. Each file is
//! resolved once to a [`TagFamily`], which fixes the field names, reference
//! loudness and number formatting used for it.
//!
//! # Features
//! - Detect whether track/album gain tags already exist
//! - Write track and album gain/peak in the family's native fields
//! - Optionally move the Opus track gain into the OpusHead output gain

pub mod family;

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagExt, TagItem};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::gain::{float_to_q7dot8, gain_db, peak_db_to_linear, q7dot8_to_float};
use crate::loudness::LoudnessMeasurement;
use crate::opus;

pub use family::{GainScope, TagFamily};

/// Gain and peak for one scope (track or album).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GainValues {
    /// Gain in dB relative to the family's reference loudness
    pub gain_db: f64,
    /// Peak as a linear amplitude ratio
    pub peak_linear: Option<f64>,
}

impl GainValues {
    pub fn from_measurement(measurement: &LoudnessMeasurement, reference_lufs: f64) -> Self {
        Self {
            gain_db: gain_db(reference_lufs, measurement.loudness_lufs),
            peak_linear: measurement.true_peak_dbtp.map(peak_db_to_linear),
        }
    }
}

/// Values to persist into one file.
///
/// A missing scope leaves the corresponding tags untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GainTagSet {
    pub track: Option<GainValues>,
    pub album: Option<GainValues>,
}

impl GainTagSet {
    /// Compute the tag values for `family` from track and album measurements.
    pub fn compute(
        family: TagFamily,
        track: Option<&LoudnessMeasurement>,
        album: Option<&LoudnessMeasurement>,
    ) -> Self {
        let reference = family.reference_lufs();
        Self {
            track: track.map(|m| GainValues::from_measurement(m, reference)),
            album: album.map(|m| GainValues::from_measurement(m, reference)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_none() && self.album.is_none()
    }
}

/// Which gain tags a file already carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TagPresence {
    pub track: bool,
    pub album: bool,
}

/// Gain values parsed back from a tag.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StoredGains {
    pub track_gain_db: Option<f64>,
    pub track_peak: Option<f64>,
    pub album_gain_db: Option<f64>,
    pub album_peak: Option<f64>,
}

/// Persists gain tags and answers whether they exist.
///
/// Implement this trait to substitute an in-memory store in tests.
pub trait TagWriter: Send + Sync {
    /// Resolve the tag family of `path`, `None` if unsupported.
    fn family(&self, path: &Path) -> Result<Option<TagFamily>>;

    /// Report whether track and album gain tags exist.
    fn has_tags(&self, path: &Path) -> Result<TagPresence>;

    /// Write every scope present in `gains`.
    fn write(&self, path: &Path, family: TagFamily, gains: &GainTagSet) -> Result<()>;

    fn write_track_gain(&self, path: &Path, family: TagFamily, values: GainValues) -> Result<()> {
        let gains = GainTagSet {
            track: Some(values),
            album: None,
        };
        self.write(path, family, &gains)
    }

    fn write_album_gain(&self, path: &Path, family: TagFamily, values: GainValues) -> Result<()> {
        let gains = GainTagSet {
            track: None,
            album: Some(values),
        };
        self.write(path, family, &gains)
    }
}

impl<T: TagWriter + ?Sized> TagWriter for &T {
    fn family(&self, path: &Path) -> Result<Option<TagFamily>> {
        (**self).family(path)
    }

    fn has_tags(&self, path: &Path) -> Result<TagPresence> {
        (**self).has_tags(path)
    }

    fn write(&self, path: &Path, family: TagFamily, gains: &GainTagSet) -> Result<()> {
        (**self).write(path, family, gains)
    }
}

/// Key/value pairs `gains` turns into for `family`.
pub fn tag_entries(family: TagFamily, gains: &GainTagSet) -> Vec<(ItemKey, String)> {
    let mut entries = Vec::with_capacity(4);
    let scopes = [(GainScope::Track, gains.track), (GainScope::Album, gains.album)];
    for (scope, values) in scopes {
        let Some(values) = values else { continue };
        entries.push((family.gain_key(scope), family.format_gain(values.gain_db)));
        let peak = family
            .peak_key(scope)
            .zip(values.peak_linear.and_then(|p| family.format_peak(p)));
        if let Some((key, text)) = peak {
            entries.push((key, text));
        }
    }
    entries
}

/// Store `gains` into an in-memory tag.
///
/// Custom keys (`ItemKey::Unknown`) bypass lofty's key mapping, which would
/// otherwise refuse them.
pub fn apply_gains(tag: &mut Tag, family: TagFamily, gains: &GainTagSet) -> Result<()> {
    for (key, text) in tag_entries(family, gains) {
        if let Some(alias) = family.read_alias(&key) {
            tag.remove_key(&alias);
        }
        if let ItemKey::Unknown(_) = key {
            tag.insert_unchecked(TagItem::new(key, ItemValue::Text(text)));
            continue;
        }
        let description = format!("{:?}", key);
        if !tag.insert_text(key, text) {
            return Err(Error::invalid_input(format!(
                "{:?} tag cannot hold {}",
                tag.tag_type(),
                description
            )));
        }
    }
    Ok(())
}

/// Text stored under `key`, or under the key lofty reads it back as.
fn lookup<'a>(tag: &'a Tag, family: TagFamily, key: &ItemKey) -> Option<&'a str> {
    tag.get_string(key).or_else(|| {
        family
            .read_alias(key)
            .and_then(|alias| tag.get_string(&alias))
    })
}

/// Parse whatever gain values `tag` holds for `family`.
pub fn read_gains(tag: &Tag, family: TagFamily) -> StoredGains {
    let gain = |scope| {
        lookup(tag, family, &family.gain_key(scope)).and_then(|s| family.parse_gain(s))
    };
    let peak = |scope| {
        family
            .peak_key(scope)
            .and_then(|key| lookup(tag, family, &key).and_then(TagFamily::parse_peak))
    };
    StoredGains {
        track_gain_db: gain(GainScope::Track),
        track_peak: peak(GainScope::Track),
        album_gain_db: gain(GainScope::Album),
        album_peak: peak(GainScope::Album),
    }
}

/// Which gain keys `tag` carries, regardless of whether they parse.
pub fn presence(tag: &Tag, family: TagFamily) -> TagPresence {
    let has = |scope| lookup(tag, family, &family.gain_key(scope)).is_some();
    TagPresence {
        track: has(GainScope::Track),
        album: has(GainScope::Album),
    }
}

/// Tag values once the Opus track gain is folded into the header.
///
/// Players apply the header gain before any R128 tag, so the track tag becomes
/// zero and the album tag is made relative to what the header applies. Returns
/// the Q7.8 delta to add to the header, `None` without a track scope.
fn header_adjusted(gains: &GainTagSet) -> (Option<i16>, GainTagSet) {
    let Some(track) = gains.track else {
        return (None, *gains);
    };

    let delta = float_to_q7dot8(track.gain_db);
    let applied_db = q7dot8_to_float(delta);
    let adjusted = GainTagSet {
        track: Some(GainValues {
            gain_db: 0.0,
            peak_linear: None,
        }),
        album: gains.album.map(|album| GainValues {
            gain_db: album.gain_db - applied_db,
            peak_linear: None,
        }),
    };
    (Some(delta), adjusted)
}

/// Add `delta` to the Opus header gain of `path`, then run `save`.
///
/// If `save` fails the previous header gain is written back, so the header
/// and the tags never disagree.
fn save_with_header_gain<F>(path: &Path, delta: Option<i16>, save: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let Some(delta) = delta else {
        return save();
    };

    let (previous, header_gain) = opus::adjust_file_output_gain(path, delta)?;
    info!(
        target: "metadata::write",
        path = %path.display(),
        delta,
        header_gain,
        "Opus output gain updated"
    );

    if let Err(err) = save() {
        warn!(
            target: "metadata::write",
            path = %path.display(),
            previous,
            "Tag save failed, restoring Opus output gain"
        );
        if let Err(restore) = opus::write_file_output_gain(path, previous) {
            error!(
                target: "metadata::write",
                path = %path.display(),
                error = %restore,
                "Could not restore Opus output gain"
            );
        }
        return Err(err);
    }
    Ok(())
}

/// [`TagWriter`] that edits real files through lofty.
#[derive(Debug, Clone, Default)]
pub struct LoftyTagWriter {
    /// Write Opus track gain into the OpusHead output gain field
    pub opus_output_gain: bool,
}

impl LoftyTagWriter {
    pub fn new(opus_output_gain: bool) -> Self {
        Self { opus_output_gain }
    }
}

impl TagWriter for LoftyTagWriter {
    fn family(&self, path: &Path) -> Result<Option<TagFamily>> {
        TagFamily::detect(path)
    }

    fn has_tags(&self, path: &Path) -> Result<TagPresence> {
        let tagged_file = Probe::open(path)
            .and_then(|p| p.read())
            .map_err(|e| Error::metadata(path, e.to_string()))?;
        let Some(family) = TagFamily::from_file_type(tagged_file.file_type()) else {
            return Err(Error::UnsupportedFormat(path.to_path_buf()));
        };
        Ok(tagged_file
            .tag(family.tag_type())
            .map(|tag| presence(tag, family))
            .unwrap_or_default())
    }

    fn write(&self, path: &Path, family: TagFamily, gains: &GainTagSet) -> Result<()> {
        if gains.is_empty() {
            return Ok(());
        }

        let (delta, gains) = if family == TagFamily::Opus && self.opus_output_gain {
            header_adjusted(gains)
        } else {
            (None, *gains)
        };

        let mut tagged_file = Probe::open(path)
            .and_then(|p| p.read())
            .map_err(|e| Error::metadata(path, e.to_string()))?;

        let tag_type = family.tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let Some(tag) = tagged_file.tag_mut(tag_type) else {
            return Err(Error::metadata(
                path,
                format!("file cannot hold a {:?} tag", tag_type),
            ));
        };

        // The tag is complete before the header is touched
        apply_gains(tag, family, &gains).map_err(|e| Error::metadata(path, e.to_string()))?;
        save_with_header_gain(path, delta, || {
            tag.save_to_path(path, WriteOptions::default())
                .map_err(|e| Error::metadata(path, format!("failed to save tags: {}", e)))
        })?;

        debug!(
            target: "metadata::write",
            path = %path.display(),
            family = ?family,
            track = ?gains.track,
            album = ?gains.album,
            "Gain tags written"
        );
        Ok(())
    }
}
