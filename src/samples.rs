use crate::error::{Error, Result};
use crate::index::ContainerIndex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SampleInfo {
    /// 0-based sample index
    pub index: u32,

    /// Decode time (DTS) in track timescale units
    pub dts: u64,

    /// Presentation time (PTS) in track timescale units (DTS + composition offset)
    pub pts: u64,

    /// Start time in seconds (pts / timescale as f64)
    pub start_time: f64,

    /// Duration in track timescale units (from stts)
    pub duration: u32,

    /// Composition/rendered offset in track timescale units (from ctts, may be 0)
    pub rendered_offset: i64,

    /// Byte offset in the buffer (from stsc + stco/co64)
    pub file_offset: u64,

    /// Sample size in bytes (from stsz)
    pub size: u32,

    /// Whether this sample is a sync sample / keyframe (from stss)
    pub is_sync: bool,
}

/// Frame index to byte range lookups over a parsed container.
#[derive(Debug, Clone, Copy)]
pub struct SampleLocator<'a> {
    index: &'a ContainerIndex,
}

impl<'a> SampleLocator<'a> {
    pub fn new(index: &'a ContainerIndex) -> Self {
        Self { index }
    }

    /// `(offset, size)` of a frame's coded bytes.
    pub fn sample_range(&self, frame: u32) -> Result<(u64, u32)> {
        let table = self.index.samples();
        let i = self.check(frame)?;
        Ok((table.offsets()[i], table.sizes()[i]))
    }

    /// The coded bytes of a frame, borrowed from the container buffer.
    pub fn sample_bytes(&self, frame: u32) -> Result<&'a [u8]> {
        let (offset, size) = self.sample_range(frame)?;
        let start = offset as usize;
        // Ranges were validated against the buffer when the index was built.
        Ok(&self.index.buffer()[start..start + size as usize])
    }

    pub fn sample_info(&self, frame: u32) -> Result<SampleInfo> {
        let table = self.index.samples();
        let i = self.check(frame)?;
        let timescale = self.index.media_header().timescale;

        let dts = table.decode_time(i).unwrap_or(0);
        let composition_offset = table.composition_offset(i);
        let pts = (dts as i64 + composition_offset as i64).max(0) as u64;
        let start_time = if timescale > 0 { pts as f64 / timescale as f64 } else { 0.0 };

        Ok(SampleInfo {
            index: frame,
            dts,
            pts,
            start_time,
            duration: table.duration(i).unwrap_or(0),
            rendered_offset: composition_offset as i64,
            file_offset: table.offsets()[i],
            size: table.sizes()[i],
            is_sync: table.is_sync(frame),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = SampleInfo> + '_ {
        (0..self.index.num_frames()).filter_map(|i| self.sample_info(i).ok())
    }

    fn check(&self, frame: u32) -> Result<usize> {
        let num_frames = self.index.num_frames();
        if frame >= num_frames {
            return Err(Error::OutOfRangeSeek { index: frame, num_frames });
        }
        Ok(frame as usize)
    }
}
