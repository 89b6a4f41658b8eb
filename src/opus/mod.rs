//! In-place access to the output gain field of an Ogg Opus stream.
//!
//! The OpusHead identification packet always sits alone on the first Ogg page.
//! Its layout is fixed:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 8 | `OpusHead` magic |
//! | 8 | 1 | version |
//! | 9 | 1 | channel count |
//! | 10 | 2 | pre-skip |
//! | 12 | 4 | input sample rate |
//! | 16 | 2 | output gain, Q7.8 dB, signed little endian |
//!
//! Rewriting the gain touches exactly two bytes plus the checksum of that first
//! page, so the file length never changes. The new page image is built in
//! memory and written back with a single write.

pub mod crc;

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result, ResultExt};

/// Ogg page capture pattern.
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Opus identification header magic.
pub const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// Fixed part of an Ogg page header, before the lacing values.
const PAGE_HEADER_LEN: usize = 27;

/// Offset of the CRC field inside the page header.
const CHECKSUM_OFFSET: usize = 22;

/// Offset of the segment count inside the page header.
const SEGMENT_COUNT_OFFSET: usize = 26;

/// Offset of the output gain inside the OpusHead packet.
const OUTPUT_GAIN_OFFSET: usize = 16;

/// Smallest valid OpusHead packet (mapping family 0).
const OPUS_HEAD_MIN_LEN: usize = 19;

/// One complete Ogg page, header and payload.
#[derive(Debug, Clone)]
struct OggPage {
    /// Position of the capture pattern in the stream
    offset: u64,
    /// Raw page bytes
    bytes: Vec<u8>,
    /// Length of header plus lacing values
    header_len: usize,
}

impl OggPage {
    /// Read the page starting at `offset`.
    fn read<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; PAGE_HEADER_LEN];
        let n = read_up_to(reader, &mut header)?;
        if n < PAGE_HEADER_LEN {
            return Err(Error::malformed(format!(
                "stream too short for an Ogg page header at offset {} ({} bytes)",
                offset, n
            )));
        }
        if &header[..4] != CAPTURE_PATTERN {
            return Err(Error::malformed(format!(
                "missing Ogg capture pattern at offset {}",
                offset
            )));
        }
        if header[4] != 0 {
            return Err(Error::malformed(format!(
                "unsupported Ogg stream structure version {}",
                header[4]
            )));
        }

        let segment_count = usize::from(header[SEGMENT_COUNT_OFFSET]);
        let mut lacing = vec![0u8; segment_count];
        read_exact_or_malformed(reader, &mut lacing, "lacing values")?;
        let payload_len: usize = lacing.iter().map(|&v| usize::from(v)).sum();

        let header_len = PAGE_HEADER_LEN + segment_count;
        let mut bytes = Vec::with_capacity(header_len + payload_len);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&lacing);
        bytes.resize(header_len + payload_len, 0);
        read_exact_or_malformed(reader, &mut bytes[header_len..], "page payload")?;

        Ok(Self {
            offset,
            bytes,
            header_len,
        })
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    fn stored_checksum(&self) -> u32 {
        let field = &self.bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4];
        u32::from_le_bytes([field[0], field[1], field[2], field[3]])
    }

    /// Checksum over the whole page with the checksum field zeroed.
    fn compute_checksum(&self) -> u32 {
        let mut scratch = self.bytes.clone();
        scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
        crc::checksum(&scratch)
    }

    fn refresh_checksum(&mut self) {
        let sum = self.compute_checksum();
        self.bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_le_bytes());
    }
}

/// Find the first page and the position of the gain field within it.
///
/// Returns `None` when the stream is not Ogg or its first packet is not OpusHead.
fn locate<R: Read + Seek>(reader: &mut R) -> Result<Option<(OggPage, usize)>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    let n = read_up_to(reader, &mut magic)?;
    if n == magic.len() && &magic != CAPTURE_PATTERN {
        debug!(target: "opus::header", "Stream is not Ogg");
        return Ok(None);
    }

    let page = OggPage::read(reader, 0)?;
    let payload = page.payload();
    if !payload.starts_with(OPUS_HEAD_MAGIC) {
        debug!(target: "opus::header", "First Ogg packet is not OpusHead");
        return Ok(None);
    }
    if payload.len() < OPUS_HEAD_MIN_LEN {
        return Err(Error::malformed(format!(
            "OpusHead packet truncated to {} bytes",
            payload.len()
        )));
    }

    let field = page.header_len + OUTPUT_GAIN_OFFSET;
    Ok(Some((page, field)))
}

/// Read the output gain of an Ogg Opus stream.
///
/// Returns `Ok(None)` for anything that is not Ogg Opus.
pub fn parse_output_gain<R: Read + Seek>(reader: &mut R) -> Result<Option<i16>> {
    Ok(locate(reader)?.map(|(page, field)| {
        i16::from_le_bytes([page.bytes[field], page.bytes[field + 1]])
    }))
}

/// Overwrite the output gain of an Ogg Opus stream and fix the page checksum.
///
/// Nothing is written unless the first page parses and its stored checksum
/// is valid.
pub fn write_output_gain<F: Read + Write + Seek>(stream: &mut F, gain: i16) -> Result<()> {
    let Some((mut page, field)) = locate(stream)? else {
        return Err(Error::invalid_input("stream is not Ogg Opus"));
    };

    let stored = page.stored_checksum();
    let expected = page.compute_checksum();
    if stored != expected {
        return Err(Error::malformed(format!(
            "first page checksum is already invalid (stored {:#010x}, computed {:#010x}), \
             refusing to patch a damaged file",
            stored, expected
        )));
    }

    page.bytes[field..field + 2].copy_from_slice(&gain.to_le_bytes());
    page.refresh_checksum();

    stream.seek(SeekFrom::Start(page.offset))?;
    stream.write_all(&page.bytes)?;
    stream.flush()?;

    debug!(target: "opus::header", gain, checksum = page.stored_checksum(), "Output gain written");
    Ok(())
}

/// Read the output gain of the file at `path`.
pub fn read_file_output_gain(path: &Path) -> Result<Option<i16>> {
    let mut file =
        File::open(path).with_context(format!("opening {}", path.display()))?;
    parse_output_gain(&mut file)
}

/// Set the output gain of the Ogg Opus file at `path`.
pub fn write_file_output_gain(path: &Path, gain: i16) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(format!("opening {}", path.display()))?;
    write_output_gain(&mut file, gain)?;
    file.sync_data()?;
    Ok(())
}

/// Add `delta` (Q7.8) to the output gain of the file at `path`.
///
/// The sum saturates to the i16 range. Returns the previous and the new gain.
pub fn adjust_file_output_gain(path: &Path, delta: i16) -> Result<(i16, i16)> {
    let current = read_file_output_gain(path)?.ok_or_else(|| {
        Error::invalid_input(format!("{} is not an Ogg Opus file", path.display()))
    })?;
    let updated = current.saturating_add(delta);
    write_file_output_gain(path, updated)?;
    Ok((current, updated))
}

/// Fill `buf` as far as the stream allows, returning the byte count.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_exact_or_malformed<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    let n = read_up_to(reader, buf)?;
    if n < buf.len() {
        return Err(Error::malformed(format!(
            "truncated {}: expected {} bytes, got {}",
            what,
            buf.len(),
            n
        )));
    }
    Ok(())
}
