//! Test utilities and fixtures for r128tag tests.
//!
//! This module provides Ogg Opus byte fixtures and in-memory doubles for the
//! two external seams: the loudness analyzer and the tag store.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{MemoryTagWriter, MockLoudness};
//!
//! let source = MockLoudness::new().with_level("a.flac", -20.6, Some(0.1));
//! let writer = MemoryTagWriter::new().with_family("a.flac", TagFamily::VorbisComment);
//! let orchestrator = ScanOrchestrator::new(&source, &writer, 2).unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use lofty::tag::Tag;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::loudness::{LoudnessMeasurement, LoudnessSource};
use crate::metadata::{
    GainTagSet, StoredGains, TagFamily, TagPresence, TagWriter, apply_gains, presence, read_gains,
};
use crate::opus::crc;

/// Build one Ogg page holding `packet`, with lacing values and a valid CRC.
///
/// The packet must fit in a single page (at most 255 * 255 bytes).
pub fn ogg_page(header_type: u8, serial: u32, sequence: u32, packet: &[u8]) -> Vec<u8> {
    let mut lacing = vec![255u8; packet.len() / 255];
    lacing.push((packet.len() % 255) as u8);

    let mut page = Vec::with_capacity(27 + lacing.len() + packet.len());
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&0u64.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(packet);

    let sum = crc::checksum(&page);
    page[22..26].copy_from_slice(&sum.to_le_bytes());
    page
}

/// Build a 19 byte OpusHead packet (channel mapping family 0).
pub fn opus_head(channels: u8, pre_skip: u16, input_rate: u32, gain: i16) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&input_rate.to_le_bytes());
    head.extend_from_slice(&gain.to_le_bytes());
    head.push(0);
    head
}

/// A minimal Ogg Opus stream: OpusHead page, OpusTags page, one audio page.
pub fn ogg_opus_stream(gain: i16) -> Vec<u8> {
    const SERIAL: u32 = 0x1234_5678;

    let mut tags = b"OpusTags".to_vec();
    let vendor = b"r128tag tests";
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&0u32.to_le_bytes());

    let mut stream = ogg_page(0x02, SERIAL, 0, &opus_head(2, 312, 48000, gain));
    stream.extend(ogg_page(0x00, SERIAL, 1, &tags));
    stream.extend(ogg_page(0x04, SERIAL, 2, &[0xfc, 0xff, 0xfe]));
    stream
}

/// [`LoudnessSource`] returning canned measurements and recording every call.
#[derive(Debug, Default)]
pub struct MockLoudness {
    levels: HashMap<PathBuf, LoudnessMeasurement>,
    failing: HashSet<PathBuf>,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockLoudness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, path: impl Into<PathBuf>, lufs: f64, peak: Option<f64>) -> Self {
        self.levels
            .insert(path.into(), LoudnessMeasurement::new(lufs, peak));
        self
    }

    pub fn with_failure(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Paths measured so far, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

impl LoudnessSource for MockLoudness {
    fn measure(&self, path: &Path) -> Result<LoudnessMeasurement> {
        self.calls.lock().push(path.to_path_buf());
        if self.failing.contains(path) {
            return Err(Error::measurement(path, "mock analyzer failure"));
        }
        self.levels
            .get(path)
            .copied()
            .ok_or_else(|| Error::measurement(path, "no mock level configured"))
    }
}

/// [`TagWriter`] keeping one lofty [`Tag`] per path in memory.
#[derive(Default)]
pub struct MemoryTagWriter {
    families: HashMap<PathBuf, TagFamily>,
    failing: HashSet<PathBuf>,
    tags: Mutex<HashMap<PathBuf, Tag>>,
    writes: Mutex<Vec<PathBuf>>,
}

impl MemoryTagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, path: impl Into<PathBuf>, family: TagFamily) -> Self {
        self.families.insert(path.into(), family);
        self
    }

    pub fn with_failing_write(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Text stored under the family's gain keys, for assertions.
    pub fn stored(&self, path: &Path) -> StoredGains {
        let Some(family) = self.families.get(path).copied() else {
            return StoredGains::default();
        };
        self.tags
            .lock()
            .get(path)
            .map(|tag| read_gains(tag, family))
            .unwrap_or_default()
    }

    /// Raw tag for `path`, if anything was written.
    pub fn tag(&self, path: &Path) -> Option<Tag> {
        self.tags.lock().get(path).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

impl TagWriter for MemoryTagWriter {
    fn family(&self, path: &Path) -> Result<Option<TagFamily>> {
        Ok(self.families.get(path).copied())
    }

    fn has_tags(&self, path: &Path) -> Result<TagPresence> {
        let Some(family) = self.families.get(path).copied() else {
            return Err(Error::UnsupportedFormat(path.to_path_buf()));
        };
        Ok(self
            .tags
            .lock()
            .get(path)
            .map(|tag| presence(tag, family))
            .unwrap_or_default())
    }

    fn write(&self, path: &Path, family: TagFamily, gains: &GainTagSet) -> Result<()> {
        if self.failing.contains(path) {
            return Err(Error::metadata(path, "mock write failure"));
        }
        self.writes.lock().push(path.to_path_buf());
        let mut tags = self.tags.lock();
        let tag = tags
            .entry(path.to_path_buf())
            .or_insert_with(|| Tag::new(family.tag_type()));
        apply_gains(tag, family, gains)
    }
}
