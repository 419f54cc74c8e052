//! Typed readers for the individual boxes of the movie tree.
//!
//! Every function takes the payload offset reported by the box scanner (the byte
//! right after the four-character tag) and returns the parsed value together with
//! the offset of the first byte it did not consume.

use crate::boxes::FourCC;
use crate::error::{Error, Result};
use crate::known_boxes::KnownBox;
use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{Cursor, Read};

/// Version-dependent time fields shared by `mvhd`, `tkhd` and `mdhd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Timing {
    /// Version 0: 32-bit creation/modification times and duration.
    Short { creation: u32, modification: u32, duration: u32 },
    /// Version 1: 64-bit creation/modification times and duration.
    Long { creation: u64, modification: u64, duration: u64 },
}

impl Timing {
    pub fn duration(&self) -> u64 {
        match *self {
            Timing::Short { duration, .. } => duration as u64,
            Timing::Long { duration, .. } => duration,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileType {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieHeader {
    pub timing: Timing,
    pub timescale: u32,
    /// Preferred playback rate, 16.16 fixed point.
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackHeader {
    pub timing: Timing,
    pub track_id: u32,
    /// Integer part of the 16.16 fixed-point width.
    pub width: i32,
    /// Integer part of the 16.16 fixed-point height.
    pub height: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaHeader {
    pub timing: Timing,
    pub timescale: u32,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Handler {
    pub handler_type: FourCC,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleDescription {
    pub format: FourCC,
    pub width: u16,
    pub height: u16,
    pub compressor: String,
    pub depth: u16,
    /// e.g. `avc1.64001f`
    pub codec_string: String,
    /// Payload of the codec configuration record (`avcC`).
    #[serde(serialize_with = "serialize_hex")]
    pub config: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i32, // Can be negative in version 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSizes {
    /// Non-zero when every sample has the same size.
    pub sample_size: u32,
    pub sample_count: u32,
    /// Empty if `sample_size > 0`.
    pub sizes: Vec<u32>,
}

impl SampleSizes {
    pub fn size_of(&self, index: usize) -> Option<u32> {
        if self.sample_size > 0 {
            (index < self.sample_count as usize).then_some(self.sample_size)
        } else {
            self.sizes.get(index).copied()
        }
    }
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

// ---------- Helpers ----------

fn cursor_at(buf: &[u8], offset: usize) -> Result<Cursor<&[u8]>> {
    if offset > buf.len() {
        return Err(Error::malformed(format!(
            "offset {} past end of buffer ({} bytes)",
            offset,
            buf.len()
        )));
    }
    let mut cur = Cursor::new(buf);
    cur.set_position(offset as u64);
    Ok(cur)
}

fn read_version_flags(cur: &mut Cursor<&[u8]>) -> Result<(u8, u32)> {
    let version = cur.read_u8()?;
    let mut f = [0u8; 3];
    cur.read_exact(&mut f)?;
    let flags = ((f[0] as u32) << 16) | ((f[1] as u32) << 8) | (f[2] as u32);
    Ok((version, flags))
}

fn read_fourcc(cur: &mut Cursor<&[u8]>) -> Result<FourCC> {
    let mut t = [0u8; 4];
    cur.read_exact(&mut t)?;
    Ok(FourCC(t))
}

fn skip(cur: &mut Cursor<&[u8]>, n: u64) {
    cur.set_position(cur.position() + n);
}

fn next(cur: &Cursor<&[u8]>) -> usize {
    cur.position() as usize
}

/// Reads the creation/modification pair, then whatever `between` reads, then the
/// duration, with widths picked by `version`.
fn read_timing<T>(
    cur: &mut Cursor<&[u8]>,
    version: u8,
    between: impl FnOnce(&mut Cursor<&[u8]>) -> Result<T>,
) -> Result<(Timing, T)> {
    match version {
        0 => {
            let creation = cur.read_u32::<BigEndian>()?;
            let modification = cur.read_u32::<BigEndian>()?;
            let mid = between(cur)?;
            let duration = cur.read_u32::<BigEndian>()?;
            Ok((Timing::Short { creation, modification, duration }, mid))
        }
        1 => {
            let creation = cur.read_u64::<BigEndian>()?;
            let modification = cur.read_u64::<BigEndian>()?;
            let mid = between(cur)?;
            let duration = cur.read_u64::<BigEndian>()?;
            Ok((Timing::Long { creation, modification, duration }, mid))
        }
        v => Err(Error::malformed(format!("unsupported header version {}", v))),
    }
}

fn lang_from_u16(code: u16) -> String {
    if code == 0 {
        return "und".to_string();
    }
    let c1 = ((code >> 10) & 0x1F) as u8 + 0x60;
    let c2 = ((code >> 5) & 0x1F) as u8 + 0x60;
    let c3 = (code & 0x1F) as u8 + 0x60;
    format!("{}{}{}", c1 as char, c2 as char, c3 as char)
}

// ---------- Box parsers ----------

// ftyp: major + minor + compatible brands up to `end`
pub fn parse_ftyp(buf: &[u8], offset: usize, end: usize) -> Result<(FileType, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let major_brand = read_fourcc(&mut cur)?;
    let minor_version = cur.read_u32::<BigEndian>()?;
    let mut compatible_brands = Vec::new();
    while next(&cur) + 4 <= end {
        compatible_brands.push(read_fourcc(&mut cur)?);
    }
    let ftyp = FileType { major_brand, minor_version, compatible_brands };
    Ok((ftyp, next(&cur)))
}

pub fn parse_mvhd(buf: &[u8], offset: usize) -> Result<(MovieHeader, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let (version, _flags) = read_version_flags(&mut cur)?;
    let (timing, timescale) = read_timing(&mut cur, version, |c| Ok(c.read_u32::<BigEndian>()?))?;
    let rate = cur.read_i32::<BigEndian>()? as f64 / 65536.0;
    skip(&mut cur, 2 + 2 + 2 * 4); // volume, reserved
    skip(&mut cur, 9 * 4); // matrix
    skip(&mut cur, 6 * 4); // pre_defined
    let _next_track_id = cur.read_u32::<BigEndian>()?;
    Ok((MovieHeader { timing, timescale, rate }, next(&cur)))
}

pub fn parse_tkhd(buf: &[u8], offset: usize) -> Result<(TrackHeader, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let (version, _flags) = read_version_flags(&mut cur)?;
    let (timing, track_id) = read_timing(&mut cur, version, |c| {
        let track_id = c.read_u32::<BigEndian>()?;
        let _reserved = c.read_u32::<BigEndian>()?;
        Ok(track_id)
    })?;
    skip(&mut cur, 2 * 4); // reserved
    skip(&mut cur, 2 + 2 + 2 + 2); // layer, alternate_group, volume, reserved
    skip(&mut cur, 9 * 4); // matrix
    let width = cur.read_i32::<BigEndian>()? >> 16;
    let height = cur.read_i32::<BigEndian>()? >> 16;
    Ok((TrackHeader { timing, track_id, width, height }, next(&cur)))
}

pub fn parse_mdhd(buf: &[u8], offset: usize) -> Result<(MediaHeader, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let (version, _flags) = read_version_flags(&mut cur)?;
    let (timing, timescale) = read_timing(&mut cur, version, |c| Ok(c.read_u32::<BigEndian>()?))?;
    let language = lang_from_u16(cur.read_u16::<BigEndian>()?);
    let _pre_defined = cur.read_u16::<BigEndian>()?;
    Ok((MediaHeader { timing, timescale, language }, next(&cur)))
}

// hdlr: handler type + name (null-terminated or running to `end`)
pub fn parse_hdlr(buf: &[u8], offset: usize, end: usize) -> Result<(Handler, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let _pre_defined = cur.read_u32::<BigEndian>()?;
    let handler_type = read_fourcc(&mut cur)?;
    skip(&mut cur, 3 * 4); // reserved

    let end = end.min(buf.len());
    let start = next(&cur).min(end);
    let mut name_bytes = &buf[start..end];
    // strip trailing nulls
    while let [rest @ .., 0] = name_bytes {
        name_bytes = rest;
    }
    let name = String::from_utf8_lossy(name_bytes).to_string();
    Ok((Handler { handler_type, name }, end))
}

/// Parses the first visual sample entry of an `stsd` box and locates its codec
/// configuration record among the entry's child boxes.
pub fn parse_stsd(buf: &[u8], offset: usize) -> Result<(SampleDescription, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    if entry_count == 0 {
        return Err(Error::malformed("stsd has no sample entries"));
    }
    if entry_count > 1 {
        tracing::debug!(entry_count, "using the first of several sample descriptions");
    }

    let entry_start = next(&cur);
    let entry_size = cur.read_u32::<BigEndian>()? as usize;
    let format = read_fourcc(&mut cur)?;
    let entry_end = entry_start.saturating_add(entry_size).min(buf.len());
    if !KnownBox::from(format).is_avc_entry() {
        return Err(Error::UnsupportedCodec(format!("sample entry format {}", format)));
    }

    skip(&mut cur, 6); // reserved
    let _data_reference_index = cur.read_u16::<BigEndian>()?;
    skip(&mut cur, 2 + 2 + 3 * 4); // pre_defined, reserved, pre_defined
    let width = cur.read_u16::<BigEndian>()?;
    let height = cur.read_u16::<BigEndian>()?;
    skip(&mut cur, 4 + 4 + 4); // horizresolution, vertresolution, reserved
    let _frame_count = cur.read_u16::<BigEndian>()?;

    let mut name = [0u8; 32];
    cur.read_exact(&mut name)?;
    let name_len = (name[0] as usize).min(31);
    let compressor = String::from_utf8_lossy(&name[1..1 + name_len]).to_string();

    let depth = cur.read_u16::<BigEndian>()?;
    let _pre_defined = cur.read_i16::<BigEndian>()?;

    // child boxes of the sample entry: avcC, pasp, colr, btrt, ...
    let mut config = None;
    while next(&cur) + 8 <= entry_end {
        let child_start = next(&cur);
        let child_size = cur.read_u32::<BigEndian>()? as usize;
        let child_type = read_fourcc(&mut cur)?;
        if child_size < 8 || child_start + child_size > entry_end {
            return Err(Error::malformed(format!(
                "sample entry child {} has invalid size {}",
                child_type, child_size
            )));
        }
        if child_type == FourCC::AVCC {
            config = Some(buf[child_start + 8..child_start + child_size].to_vec());
        }
        cur.set_position((child_start + child_size) as u64);
    }

    let config = config.ok_or_else(|| {
        Error::UnsupportedCodec(format!("{} sample entry without {}", format, KnownBox::Avcc))
    })?;
    if config.len() < 4 {
        return Err(Error::malformed(format!(
            "avcC record too short ({} bytes)",
            config.len()
        )));
    }
    // profile_idc, constraint flags, level_idc
    let codec_string = format!(
        "{}.{:02x}{:02x}{:02x}",
        format, config[1], config[2], config[3]
    );

    let desc = SampleDescription {
        format,
        width,
        height,
        compressor,
        depth,
        codec_string,
        config,
    };
    Ok((desc, entry_end))
}

pub fn parse_stts(buf: &[u8], offset: usize) -> Result<(Vec<SttsEntry>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let sample_count = cur.read_u32::<BigEndian>()?;
        let sample_delta = cur.read_u32::<BigEndian>()?;
        entries.push(SttsEntry { sample_count, sample_delta });
    }
    Ok((entries, next(&cur)))
}

pub fn parse_ctts(buf: &[u8], offset: usize) -> Result<(Vec<CttsEntry>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let (version, _flags) = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let sample_count = cur.read_u32::<BigEndian>()?;
        let sample_offset = if version == 0 {
            cur.read_u32::<BigEndian>()? as i32
        } else {
            cur.read_i32::<BigEndian>()?
        };
        entries.push(CttsEntry { sample_count, sample_offset });
    }
    Ok((entries, next(&cur)))
}

/// Sync samples as zero-based frame indices.
pub fn parse_stss(buf: &[u8], offset: usize) -> Result<(Vec<u32>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut sync = Vec::new();
    for _ in 0..entry_count {
        let sample_number = cur.read_u32::<BigEndian>()?;
        if sample_number == 0 {
            return Err(Error::malformed("stss sample numbers are 1-based"));
        }
        sync.push(sample_number - 1);
    }
    Ok((sync, next(&cur)))
}

pub fn parse_stco(buf: &[u8], offset: usize) -> Result<(Vec<u64>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut offsets = Vec::new();
    for _ in 0..entry_count {
        offsets.push(cur.read_u32::<BigEndian>()? as u64);
    }
    Ok((offsets, next(&cur)))
}

pub fn parse_co64(buf: &[u8], offset: usize) -> Result<(Vec<u64>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut offsets = Vec::new();
    for _ in 0..entry_count {
        offsets.push(cur.read_u64::<BigEndian>()?);
    }
    Ok((offsets, next(&cur)))
}

pub fn parse_stsc(buf: &[u8], offset: usize) -> Result<(Vec<StscEntry>, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let entry_count = cur.read_u32::<BigEndian>()?;
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let first_chunk = cur.read_u32::<BigEndian>()?;
        let samples_per_chunk = cur.read_u32::<BigEndian>()?;
        let sample_description_index = cur.read_u32::<BigEndian>()?;
        entries.push(StscEntry { first_chunk, samples_per_chunk, sample_description_index });
    }
    Ok((entries, next(&cur)))
}

pub fn parse_stsz(buf: &[u8], offset: usize) -> Result<(SampleSizes, usize)> {
    let mut cur = cursor_at(buf, offset)?;
    let _ = read_version_flags(&mut cur)?;
    let sample_size = cur.read_u32::<BigEndian>()?;
    let sample_count = cur.read_u32::<BigEndian>()?;
    let mut sizes = Vec::new();
    if sample_size == 0 {
        for _ in 0..sample_count {
            sizes.push(cur.read_u32::<BigEndian>()?);
        }
    }
    Ok((SampleSizes { sample_size, sample_count, sizes }, next(&cur)))
}

/// Replays the sample-to-chunk runs into one samples-per-chunk entry per chunk.
///
/// Every run but the last ends where the next run's `first_chunk` begins; the last
/// run extends to `chunk_count`.
pub fn expand_samples_per_chunk(runs: &[StscEntry], chunk_count: usize) -> Result<Vec<u32>> {
    let mut per_chunk = Vec::with_capacity(chunk_count);
    for (i, run) in runs.iter().enumerate() {
        if run.first_chunk == 0 {
            return Err(Error::malformed("stsc first_chunk is 1-based"));
        }
        let first = run.first_chunk as usize - 1;
        if first != per_chunk.len() {
            return Err(Error::malformed(format!(
                "stsc run {} starts at chunk {} but {} chunks are already mapped",
                i,
                run.first_chunk,
                per_chunk.len()
            )));
        }
        let last = match runs.get(i + 1) {
            Some(following) if following.first_chunk > run.first_chunk => {
                following.first_chunk as usize - 1
            }
            Some(following) => {
                return Err(Error::malformed(format!(
                    "stsc runs not ascending ({} then {})",
                    run.first_chunk, following.first_chunk
                )));
            }
            None => chunk_count,
        };
        if last > chunk_count {
            return Err(Error::malformed(format!(
                "stsc references chunk {} but only {} chunk offsets exist",
                last, chunk_count
            )));
        }
        per_chunk.extend(std::iter::repeat_n(run.samples_per_chunk, last - first));
    }
    Ok(per_chunk)
}
