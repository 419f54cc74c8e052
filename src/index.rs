//! One-shot container index: video geometry, codec configuration and a flat,
//! frame-indexed sample table recovered from the chunk-oriented MP4 tables.

use crate::boxes::{BoxScanner, BoxSpan, FourCC};
use crate::error::{Error, Result};
use crate::known_boxes::KnownBox;
use crate::parser::{self, CttsEntry, FileType, Handler, MediaHeader, MovieHeader, SttsEntry, TrackHeader};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Size of the video frames, from the track header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackGeometry {
    pub frame_width: u32,
    pub frame_height: u32,
}

/// What the decoding engine needs to be configured for this track.
#[derive(Debug, Clone, Serialize)]
pub struct CodecConfig {
    /// Codec string such as `avc1.64001f`.
    pub codec: String,
    /// The decoder configuration record, passed through untouched.
    #[serde(serialize_with = "serialize_hex")]
    pub description: Vec<u8>,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

/// Byte range of one top-level `mdat` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaDataRegion {
    pub offset: usize,
    pub len: usize,
}

/// Sync (key) frame information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSamples {
    /// No `stss` box: every sample is independently decodable, but no explicit
    /// resync points are known.
    Unspecified,
    /// Zero-based indices listed by `stss`.
    Listed(BTreeSet<u32>),
}

/// Frame-indexed sample table.
#[derive(Debug, Clone)]
pub struct SampleTable {
    sizes: Vec<u32>,
    offsets: Vec<u64>,
    sync: SyncSamples,
    decode_times: Vec<u64>,
    durations: Vec<u32>,
    composition_offsets: Option<Vec<i32>>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn sync_samples(&self) -> &SyncSamples {
        &self.sync
    }

    /// Whether decoding may start at `index`. Frame 0 always qualifies since
    /// [`resync_point`](Self::resync_point) falls back to it.
    pub fn is_sync(&self, index: u32) -> bool {
        match &self.sync {
            SyncSamples::Unspecified => true,
            SyncSamples::Listed(set) => index == 0 || set.contains(&index),
        }
    }

    /// Greatest listed sync frame at or before `index`, or 0 when none qualifies
    /// or no sync metadata exists.
    pub fn resync_point(&self, index: u32) -> u32 {
        match &self.sync {
            SyncSamples::Unspecified => 0,
            SyncSamples::Listed(set) => set.range(..=index).next_back().copied().unwrap_or(0),
        }
    }

    pub fn decode_time(&self, index: usize) -> Option<u64> {
        self.decode_times.get(index).copied()
    }

    pub fn duration(&self, index: usize) -> Option<u32> {
        self.durations.get(index).copied()
    }

    pub fn composition_offset(&self, index: usize) -> i32 {
        self.composition_offsets
            .as_ref()
            .and_then(|c| c.get(index).copied())
            .unwrap_or(0)
    }
}

/// Summary returned to callers of `open`.
#[derive(Debug, Clone, Serialize)]
pub struct MovieInfo {
    pub num_frames: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub codec: String,
    pub track_id: u32,
    pub timescale: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub sync_frames: Option<usize>,
}

/// Everything recovered from one container. Owns the raw buffer.
#[derive(Debug)]
pub struct ContainerIndex {
    buffer: Vec<u8>,
    file_type: FileType,
    media_data: Vec<MediaDataRegion>,
    movie: MovieHeader,
    track: TrackHeader,
    media: MediaHeader,
    handler: Handler,
    geometry: TrackGeometry,
    codec: CodecConfig,
    samples: SampleTable,
}

impl ContainerIndex {
    /// Parse a whole container held in memory.
    ///
    /// Any violated assumption aborts with a single error; there is no partial
    /// index.
    pub fn parse(buffer: Vec<u8>) -> Result<Self> {
        let scanner = BoxScanner::new(&buffer);
        let len = buffer.len();

        let ftyp = require(scanner.span_within(FourCC::FTYP, 0, len), KnownBox::Ftyp)?;
        let (file_type, _) = parser::parse_ftyp(&buffer, ftyp.payload, ftyp.end)?;
        trace!(major = %file_type.major_brand, "file type");

        let media_data = media_data_regions(&scanner);
        let moov = require(find_outside(&scanner, FourCC::MOOV, &media_data), KnownBox::Moov)?;
        let mvhd = require(scanner.span_within(FourCC::MVHD, moov.payload, moov.end), KnownBox::Mvhd)?;
        let (movie, _) = parser::parse_mvhd(&buffer, mvhd.payload)?;

        let (trak, handler) = find_video_track(&scanner, moov)?;

        let tkhd = child(&scanner, trak, KnownBox::Tkhd)?;
        let (track, _) = parser::parse_tkhd(&buffer, tkhd.payload)?;
        if track.width <= 0 || track.height <= 0 {
            return Err(Error::malformed(format!(
                "track {} has non-positive geometry {}x{}",
                track.track_id, track.width, track.height
            )));
        }
        let geometry = TrackGeometry {
            frame_width: track.width as u32,
            frame_height: track.height as u32,
        };

        let mdia = child(&scanner, trak, KnownBox::Mdia)?;
        let mdhd = child(&scanner, mdia, KnownBox::Mdhd)?;
        let (media, _) = parser::parse_mdhd(&buffer, mdhd.payload)?;
        let hdlr = child(&scanner, mdia, KnownBox::Hdlr)?;
        let (media_handler, _) = parser::parse_hdlr(&buffer, hdlr.payload, hdlr.end)?;
        if media_handler.handler_type != FourCC::VIDE {
            return Err(Error::malformed(format!(
                "media handler {} is not video",
                media_handler.handler_type
            )));
        }

        let minf = child(&scanner, mdia, KnownBox::Minf)?;
        let stbl = child(&scanner, minf, KnownBox::Stbl)?;
        let tables = SampleTables::parse(&scanner, stbl)?;

        let codec = CodecConfig {
            codec: tables.description.codec_string.clone(),
            description: tables.description.config.clone(),
        };
        let samples = tables.into_sample_table(len)?;

        debug!(
            track_id = track.track_id,
            codec = %codec.codec,
            frames = samples.len(),
            width = geometry.frame_width,
            height = geometry.frame_height,
            "indexed video track"
        );

        Ok(Self {
            buffer,
            file_type,
            media_data,
            movie,
            track,
            media,
            handler,
            geometry,
            codec,
            samples,
        })
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn num_frames(&self) -> u32 {
        self.samples.len() as u32
    }

    pub fn geometry(&self) -> TrackGeometry {
        self.geometry
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    pub fn file_type(&self) -> &FileType {
        &self.file_type
    }

    pub fn media_data(&self) -> &[MediaDataRegion] {
        &self.media_data
    }

    pub fn movie_header(&self) -> &MovieHeader {
        &self.movie
    }

    pub fn track_header(&self) -> &TrackHeader {
        &self.track
    }

    pub fn media_header(&self) -> &MediaHeader {
        &self.media
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn info(&self) -> MovieInfo {
        let duration_seconds = (self.media.timescale > 0)
            .then(|| self.media.timing.duration() as f64 / self.media.timescale as f64);
        MovieInfo {
            num_frames: self.num_frames(),
            frame_width: self.geometry.frame_width,
            frame_height: self.geometry.frame_height,
            codec: self.codec.codec.clone(),
            track_id: self.track.track_id,
            timescale: self.media.timescale,
            duration_seconds,
            sync_frames: match &self.samples.sync {
                SyncSamples::Unspecified => None,
                SyncSamples::Listed(set) => Some(set.len()),
            },
        }
    }
}

fn require(span: Option<BoxSpan>, kind: KnownBox) -> Result<BoxSpan> {
    span.ok_or(Error::MissingBox(kind))
}

fn child(scanner: &BoxScanner<'_>, parent: BoxSpan, kind: KnownBox) -> Result<BoxSpan> {
    require(scanner.span_within(kind.fourcc(), parent.payload, parent.end), kind)
}

fn optional_child(scanner: &BoxScanner<'_>, parent: BoxSpan, kind: KnownBox) -> Option<BoxSpan> {
    scanner.span_within(kind.fourcc(), parent.payload, parent.end)
}

// There can be more than one (or zero) mdat boxes per file.
fn media_data_regions(scanner: &BoxScanner<'_>) -> Vec<MediaDataRegion> {
    let buf = scanner.buffer();
    scanner
        .spans(FourCC::MDAT, 0, buf.len())
        .into_iter()
        .map(|span| {
            let large = span.payload >= 8 && buf[span.payload - 8..span.payload - 4] == [0u8, 0, 0, 1];
            let offset = if large { (span.payload + 8).min(span.end) } else { span.payload };
            MediaDataRegion { offset, len: span.end - offset }
        })
        .collect()
}

// Sample bytes can contain any tag; skip matches that land inside media data.
fn find_outside(scanner: &BoxScanner<'_>, tag: FourCC, regions: &[MediaDataRegion]) -> Option<BoxSpan> {
    let len = scanner.buffer().len();
    let mut from = 0;
    loop {
        let span = scanner.span_within(tag, from, len)?;
        match regions
            .iter()
            .find(|r| span.payload > r.offset && span.payload <= r.offset + r.len)
        {
            Some(r) => from = r.offset + r.len,
            None => return Some(span),
        }
    }
}

fn find_video_track(scanner: &BoxScanner<'_>, moov: BoxSpan) -> Result<(BoxSpan, Handler)> {
    for trak in scanner.spans(FourCC::TRAK, moov.payload, moov.end) {
        let Some(hdlr) = optional_child(scanner, trak, KnownBox::Hdlr) else {
            trace!(at = trak.payload, "track without handler, skipping");
            continue;
        };
        let (handler, _) = parser::parse_hdlr(scanner.buffer(), hdlr.payload, hdlr.end)?;
        if handler.handler_type == FourCC::VIDE {
            return Ok((trak, handler));
        }
        trace!(handler = %handler.handler_type, "skipping non-video track");
    }
    Err(Error::malformed("no video track"))
}

/// Raw tables collected from `stbl` before they are flattened per frame.
struct SampleTables {
    description: parser::SampleDescription,
    stts: Option<Vec<SttsEntry>>,
    ctts: Option<Vec<CttsEntry>>,
    stss: Option<Vec<u32>>,
    chunk_offsets: Vec<u64>,
    samples_per_chunk: Vec<u32>,
    sizes: parser::SampleSizes,
}

impl SampleTables {
    fn parse(scanner: &BoxScanner<'_>, stbl: BoxSpan) -> Result<Self> {
        let buf = scanner.buffer();

        let stsd = child(scanner, stbl, KnownBox::Stsd)?;
        let (description, _) = parser::parse_stsd(buf, stsd.payload)?;

        let stts = match optional_child(scanner, stbl, KnownBox::Stts) {
            Some(span) => Some(parser::parse_stts(buf, span.payload)?.0),
            None => None,
        };
        let ctts = match optional_child(scanner, stbl, KnownBox::Ctts) {
            Some(span) => Some(parser::parse_ctts(buf, span.payload)?.0),
            None => None,
        };
        let stss = match optional_child(scanner, stbl, KnownBox::Stss) {
            Some(span) => Some(parser::parse_stss(buf, span.payload)?.0),
            None => None,
        };

        let chunk_offsets = match optional_child(scanner, stbl, KnownBox::Stco) {
            Some(span) => parser::parse_stco(buf, span.payload)?.0,
            None => {
                let span = child(scanner, stbl, KnownBox::Co64)?;
                parser::parse_co64(buf, span.payload)?.0
            }
        };

        let stsc = child(scanner, stbl, KnownBox::Stsc)?;
        let (runs, _) = parser::parse_stsc(buf, stsc.payload)?;
        let samples_per_chunk = parser::expand_samples_per_chunk(&runs, chunk_offsets.len())?;

        let stsz = child(scanner, stbl, KnownBox::Stsz)?;
        let (sizes, _) = parser::parse_stsz(buf, stsz.payload)?;

        Ok(Self {
            description,
            stts,
            ctts,
            stss,
            chunk_offsets,
            samples_per_chunk,
            sizes,
        })
    }

    fn into_sample_table(self, buffer_len: usize) -> Result<SampleTable> {
        let declared = self.sizes.sample_count as u64;
        if declared == 0 {
            return Err(Error::malformed("video track has no samples"));
        }
        let mapped: u64 = self.samples_per_chunk.iter().map(|&n| n as u64).sum();
        if mapped != declared {
            return Err(Error::malformed(format!(
                "sample-to-chunk table maps {} samples but stsz declares {}",
                mapped, declared
            )));
        }
        let sample_size = self.sizes.sample_size as u64;
        if sample_size > 0 && declared > buffer_len as u64 / sample_size {
            return Err(Error::malformed(format!(
                "{} samples of {} bytes cannot fit in a {} byte buffer",
                declared, sample_size, buffer_len
            )));
        }
        let num_frames = declared as usize;
        let sizes: Vec<u32> = (0..num_frames)
            .map(|i| self.sizes.size_of(i).unwrap_or(0))
            .collect();

        let offsets = frame_offsets(&self.chunk_offsets, &self.samples_per_chunk, &sizes)?;
        for (i, (&offset, &size)) in offsets.iter().zip(&sizes).enumerate() {
            if offset.saturating_add(size as u64) > buffer_len as u64 {
                return Err(Error::malformed(format!(
                    "frame {} ({} bytes at {}) runs past end of buffer ({} bytes)",
                    i, size, offset, buffer_len
                )));
            }
        }

        let sync = match self.stss {
            Some(list) => SyncSamples::Listed(list.into_iter().collect()),
            None => SyncSamples::Unspecified,
        };

        let (decode_times, durations) = match &self.stts {
            Some(entries) => expand_decode_times(entries, num_frames),
            None => (vec![0; num_frames], vec![0; num_frames]),
        };
        let composition_offsets = self
            .ctts
            .as_ref()
            .map(|entries| expand_runs(entries.iter().map(|e| (e.sample_count, e.sample_offset)), num_frames, 0));

        Ok(SampleTable {
            sizes,
            offsets,
            sync,
            decode_times,
            durations,
            composition_offsets,
        })
    }
}

/// Walk chunks in order and, inside each chunk, its samples in order:
/// `offset[i] = chunk_offset[chunk(i)] + sum of sizes of the samples before i in that chunk`.
pub fn frame_offsets(chunk_offsets: &[u64], samples_per_chunk: &[u32], sizes: &[u32]) -> Result<Vec<u64>> {
    let mut offsets = Vec::with_capacity(sizes.len());
    for (&chunk_offset, &count) in chunk_offsets.iter().zip(samples_per_chunk) {
        let mut sample_offset = 0u64;
        for _ in 0..count {
            let Some(&size) = sizes.get(offsets.len()) else {
                return Err(Error::malformed(format!(
                    "sample-to-chunk table maps more than the {} samples declared by stsz",
                    sizes.len()
                )));
            };
            let offset = chunk_offset
                .checked_add(sample_offset)
                .ok_or_else(|| Error::malformed(format!("offset of sample {} overflows", offsets.len())))?;
            offsets.push(offset);
            sample_offset = sample_offset
                .checked_add(size as u64)
                .ok_or_else(|| Error::malformed(format!("chunk at {} overflows", chunk_offset)))?;
        }
    }
    if offsets.len() != sizes.len() {
        return Err(Error::malformed(format!(
            "sample-to-chunk table maps {} samples but stsz declares {}",
            offsets.len(),
            sizes.len()
        )));
    }
    Ok(offsets)
}

// Run-length (count, value) pairs to one value per sample. Samples past the
// last run repeat its value.
fn expand_runs<T: Copy>(runs: impl Iterator<Item = (u32, T)>, n: usize, fallback: T) -> Vec<T> {
    let mut out = Vec::with_capacity(n);
    let mut last = fallback;
    for (count, value) in runs {
        last = value;
        let take = (count as usize).min(n - out.len());
        out.extend(std::iter::repeat_n(value, take));
        if out.len() == n {
            break;
        }
    }
    out.resize(n, last);
    out
}

fn expand_decode_times(entries: &[SttsEntry], n: usize) -> (Vec<u64>, Vec<u32>) {
    let durations = expand_runs(entries.iter().map(|e| (e.sample_count, e.sample_delta)), n, 0);
    let mut dts = 0u64;
    let decode_times = durations
        .iter()
        .map(|&d| {
            let t = dts;
            dts += d as u64;
            t
        })
        .collect();
    (decode_times, durations)
}
