//! Per-container tag conventions for gain and peak values.

use std::path::Path;

use lofty::file::FileType;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, TagType};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::gain::{R128_REFERENCE_LUFS, RG2_REFERENCE_LUFS, float_to_q7dot8, q7dot8_to_float};

/// Vorbis comment keys of the R128 convention.
pub const R128_TRACK_GAIN: &str = "R128_TRACK_GAIN";
pub const R128_ALBUM_GAIN: &str = "R128_ALBUM_GAIN";

/// MP4 freeform atoms, `----:<mean>:<name>`, with upper case names.
pub const MP4_TRACK_GAIN: &str = "----:com.apple.iTunes:REPLAYGAIN_TRACK_GAIN";
pub const MP4_TRACK_PEAK: &str = "----:com.apple.iTunes:REPLAYGAIN_TRACK_PEAK";
pub const MP4_ALBUM_GAIN: &str = "----:com.apple.iTunes:REPLAYGAIN_ALBUM_GAIN";
pub const MP4_ALBUM_PEAK: &str = "----:com.apple.iTunes:REPLAYGAIN_ALBUM_PEAK";

/// Which tag convention a file uses for normalization data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagFamily {
    /// Ogg Vorbis, FLAC, Speex
    VorbisComment,
    /// Ogg Opus, R128 tags in Vorbis comments
    Opus,
    /// MP3 and other ID3v2 carriers, TXXX frames
    Id3v2,
    /// MP4/M4A freeform atoms
    Mp4,
    /// WavPack, Monkey's Audio, Musepack
    Ape,
}

/// Whether a value belongs to the track or to the album.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainScope {
    Track,
    Album,
}

impl TagFamily {
    pub fn from_file_type(file_type: FileType) -> Option<Self> {
        match file_type {
            FileType::Vorbis | FileType::Flac | FileType::Speex => Some(Self::VorbisComment),
            FileType::Opus => Some(Self::Opus),
            FileType::Mpeg | FileType::Aac | FileType::Aiff | FileType::Wav => Some(Self::Id3v2),
            FileType::Mp4 => Some(Self::Mp4),
            FileType::WavPack | FileType::Ape | FileType::Mpc => Some(Self::Ape),
            _ => None,
        }
    }

    /// Sniff the container of `path` and map it to a family.
    ///
    /// Returns `Ok(None)` for containers without a known convention.
    pub fn detect(path: &Path) -> Result<Option<Self>> {
        let file_type = Probe::open(path)
            .map_err(|e| Error::metadata(path, e.to_string()))?
            .guess_file_type()?
            .file_type();
        Ok(file_type.and_then(Self::from_file_type))
    }

    /// Tag type holding the values for this family.
    pub fn tag_type(self) -> TagType {
        match self {
            Self::VorbisComment | Self::Opus => TagType::VorbisComments,
            Self::Id3v2 => TagType::Id3v2,
            Self::Mp4 => TagType::Mp4Ilst,
            Self::Ape => TagType::Ape,
        }
    }

    /// Loudness the gains of this family are relative to.
    pub fn reference_lufs(self) -> f64 {
        match self {
            Self::Opus => R128_REFERENCE_LUFS,
            _ => RG2_REFERENCE_LUFS,
        }
    }

    /// Key the gain is written under.
    ///
    /// lofty's own MP4 mapping lower-cases the ReplayGain atom names, so MP4
    /// uses raw freeform keys like Opus does.
    pub fn gain_key(self, scope: GainScope) -> ItemKey {
        match (self, scope) {
            (Self::Opus, GainScope::Track) => ItemKey::Unknown(R128_TRACK_GAIN.to_string()),
            (Self::Opus, GainScope::Album) => ItemKey::Unknown(R128_ALBUM_GAIN.to_string()),
            (Self::Mp4, GainScope::Track) => ItemKey::Unknown(MP4_TRACK_GAIN.to_string()),
            (Self::Mp4, GainScope::Album) => ItemKey::Unknown(MP4_ALBUM_GAIN.to_string()),
            (_, GainScope::Track) => ItemKey::ReplayGainTrackGain,
            (_, GainScope::Album) => ItemKey::ReplayGainAlbumGain,
        }
    }

    /// Key for the peak value, `None` when the family stores no peak.
    pub fn peak_key(self, scope: GainScope) -> Option<ItemKey> {
        match (self, scope) {
            (Self::Opus, _) => None,
            (Self::Mp4, GainScope::Track) => Some(ItemKey::Unknown(MP4_TRACK_PEAK.to_string())),
            (Self::Mp4, GainScope::Album) => Some(ItemKey::Unknown(MP4_ALBUM_PEAK.to_string())),
            (_, GainScope::Track) => Some(ItemKey::ReplayGainTrackPeak),
            (_, GainScope::Album) => Some(ItemKey::ReplayGainAlbumPeak),
        }
    }

    /// Key lofty gives `key` when the tag is read back from a file.
    ///
    /// lofty maps known names case-insensitively on read, so an upper case
    /// MP4 freeform atom comes back as `ItemKey::ReplayGainTrackGain` and so on.
    pub fn read_alias(self, key: &ItemKey) -> Option<ItemKey> {
        let ItemKey::Unknown(name) = key else {
            return None;
        };
        match ItemKey::from_key(self.tag_type(), name) {
            ItemKey::Unknown(_) => None,
            alias => Some(alias),
        }
    }

    pub fn format_gain(self, gain_db: f64) -> String {
        match self {
            Self::Opus => float_to_q7dot8(gain_db).to_string(),
            _ => format!("{:.2} dB", gain_db),
        }
    }

    /// Peak text, `None` when the family stores no peak.
    pub fn format_peak(self, peak_linear: f64) -> Option<String> {
        match self {
            Self::Opus => None,
            Self::VorbisComment | Self::Ape => Some(format!("{:.8}", peak_linear)),
            Self::Id3v2 | Self::Mp4 => Some(format!("{:.6}", peak_linear)),
        }
    }

    /// Parse a stored gain back to dB.
    pub fn parse_gain(self, text: &str) -> Option<f64> {
        let text = text.trim();
        match self {
            Self::Opus => text.parse::<i16>().ok().map(q7dot8_to_float),
            _ => {
                let number = text
                    .strip_suffix("dB")
                    .or_else(|| text.strip_suffix("db"))
                    .unwrap_or(text);
                number.trim().parse().ok()
            }
        }
    }

    pub fn parse_peak(text: &str) -> Option<f64> {
        text.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_mapping() {
        assert_eq!(TagFamily::from_file_type(FileType::Flac), Some(TagFamily::VorbisComment));
        assert_eq!(TagFamily::from_file_type(FileType::Vorbis), Some(TagFamily::VorbisComment));
        assert_eq!(TagFamily::from_file_type(FileType::Opus), Some(TagFamily::Opus));
        assert_eq!(TagFamily::from_file_type(FileType::Mpeg), Some(TagFamily::Id3v2));
        assert_eq!(TagFamily::from_file_type(FileType::Mp4), Some(TagFamily::Mp4));
        assert_eq!(TagFamily::from_file_type(FileType::WavPack), Some(TagFamily::Ape));
    }

    #[test]
    fn test_references() {
        assert_eq!(TagFamily::Opus.reference_lufs(), -23.0);
        assert_eq!(TagFamily::Mp4.reference_lufs(), -18.0);
        assert_eq!(TagFamily::VorbisComment.reference_lufs(), -18.0);
    }

    #[test]
    fn test_gain_formatting() {
        assert_eq!(TagFamily::VorbisComment.format_gain(2.6000000000000014), "2.60 dB");
        assert_eq!(TagFamily::Id3v2.format_gain(-4.1), "-4.10 dB");
        assert_eq!(TagFamily::Opus.format_gain(-8.3), "-2125");
        assert_eq!(TagFamily::Opus.format_gain(0.0), "0");
    }

    #[test]
    fn test_peak_formatting() {
        let peak = 10f64.powf(0.1 / 20.0);
        assert_eq!(TagFamily::VorbisComment.format_peak(peak).unwrap(), "1.01157945");
        assert_eq!(TagFamily::Ape.format_peak(peak).unwrap(), "1.01157945");
        assert_eq!(TagFamily::Mp4.format_peak(peak).unwrap(), "1.011579");
        assert_eq!(TagFamily::Id3v2.format_peak(peak).unwrap(), "1.011579");
        assert_eq!(TagFamily::Opus.format_peak(peak), None);
    }

    #[test]
    fn test_parse_gain() {
        assert_eq!(TagFamily::VorbisComment.parse_gain("2.60 dB"), Some(2.6));
        assert_eq!(TagFamily::Ape.parse_gain(" -5.23dB "), Some(-5.23));
        assert_eq!(TagFamily::Id3v2.parse_gain("-10.0"), Some(-10.0));
        assert_eq!(TagFamily::Opus.parse_gain("-2125"), Some(-8.30078125));
        assert_eq!(TagFamily::Opus.parse_gain("2.60 dB"), None);
        assert!(TagFamily::Mp4.parse_gain("loud").is_none());
    }

    #[test]
    fn test_opus_has_no_peak_key() {
        assert!(TagFamily::Opus.peak_key(GainScope::Track).is_none());
        assert_eq!(
            TagFamily::Ape.peak_key(GainScope::Album),
            Some(ItemKey::ReplayGainAlbumPeak)
        );
    }

    #[test]
    fn test_mp4_keys_are_upper_case_freeform() {
        assert_eq!(
            TagFamily::Mp4.gain_key(GainScope::Track),
            ItemKey::Unknown("----:com.apple.iTunes:REPLAYGAIN_TRACK_GAIN".to_string())
        );
        assert_eq!(
            TagFamily::Mp4.peak_key(GainScope::Album),
            Some(ItemKey::Unknown(
                "----:com.apple.iTunes:REPLAYGAIN_ALBUM_PEAK".to_string()
            ))
        );
    }

    #[test]
    fn test_read_alias() {
        let mp4_gain = TagFamily::Mp4.gain_key(GainScope::Album);
        assert_eq!(
            TagFamily::Mp4.read_alias(&mp4_gain),
            Some(ItemKey::ReplayGainAlbumGain)
        );
        let r128 = TagFamily::Opus.gain_key(GainScope::Track);
        assert_eq!(TagFamily::Opus.read_alias(&r128), None);
        assert_eq!(
            TagFamily::VorbisComment.read_alias(&ItemKey::ReplayGainTrackGain),
            None
        );
    }

    #[test]
    fn test_detect_rejects_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"This is just some text, not music.").unwrap();
        assert_eq!(TagFamily::detect(&path).unwrap(), None);
    }

    #[test]
    fn test_detect_missing_file_is_error() {
        assert!(TagFamily::detect(Path::new("/nonexistent/song.flac")).is_err());
    }
}
