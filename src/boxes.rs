use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSS: Self = Self(*b"stss");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const AVCC: Self = Self(*b"avcC");

    /// Handler type of video tracks (`0x76696465`).
    pub const VIDE: Self = Self(*b"vide");

    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else { None }
    }
    pub fn as_str_lossy(&self) -> String {
        self.0.iter().map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}
impl fmt::Debug for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }
impl fmt::Display for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }

/// Byte range of one box found by [`BoxScanner`].
///
/// `payload` is the offset immediately after the tag; `end` is derived from the
/// size field in front of the tag and clamped to the scanned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxSpan {
    pub typ: FourCC,
    pub payload: usize,
    pub end: usize,
}

impl BoxSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.payload)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Linear tag locator over an immutable buffer.
///
/// The scanner does not walk box headers; it matches the four tag bytes wherever
/// they occur, which is what makes track-local lookups cheap. Callers bound the
/// search with the parent's [`BoxSpan`] to keep matches inside the right box.
#[derive(Debug, Clone, Copy)]
pub struct BoxScanner<'a> {
    buf: &'a [u8],
}

impl<'a> BoxScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    /// Offset just past the first occurrence of `tag` at or after `search_from`,
    /// anywhere in the buffer.
    pub fn find_box(&self, tag: FourCC, search_from: usize) -> Option<usize> {
        self.find_within(tag, search_from, self.buf.len())
    }

    /// Like [`find_box`](Self::find_box) but the whole tag must lie before `end`.
    pub fn find_within(&self, tag: FourCC, search_from: usize, end: usize) -> Option<usize> {
        let end = end.min(self.buf.len());
        if search_from >= end || end - search_from < 4 {
            return None;
        }
        self.buf[search_from..end]
            .windows(4)
            .position(|w| w == tag.0)
            .map(|pos| search_from + pos + 4)
    }

    /// Locate `tag` inside `[search_from, end)` and resolve its extent from the
    /// size field that precedes the tag.
    pub fn span_within(&self, tag: FourCC, search_from: usize, end: usize) -> Option<BoxSpan> {
        let end = end.min(self.buf.len());
        let payload = self.find_within(tag, search_from, end)?;
        Some(BoxSpan {
            typ: tag,
            payload,
            end: self.box_end(payload, end),
        })
    }

    /// Every box carrying `tag` in `[search_from, end)`, skipping over each
    /// match's payload so nested bytes are never reported twice.
    pub fn spans(&self, tag: FourCC, search_from: usize, end: usize) -> Vec<BoxSpan> {
        let mut found = Vec::new();
        let mut from = search_from;
        while let Some(span) = self.span_within(tag, from, end) {
            from = span.end.max(span.payload);
            found.push(span);
        }
        found
    }

    // `payload` points past the tag. Size 1 means a 64-bit size follows the tag,
    // size 0 runs to the end of the enclosing range.
    fn box_end(&self, payload: usize, limit: usize) -> usize {
        let start = payload.saturating_sub(8);
        if payload < 8 {
            return limit;
        }
        let size32 = u32::from_be_bytes([
            self.buf[start],
            self.buf[start + 1],
            self.buf[start + 2],
            self.buf[start + 3],
        ]) as u64;
        let size = match size32 {
            0 => return limit,
            1 => match self.buf.get(payload..payload + 8) {
                Some(b) => u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
                None => return limit,
            },
            s => s,
        };
        let end = (start as u64).saturating_add(size);
        if end < payload as u64 {
            return limit;
        }
        usize::try_from(end).map_or(limit, |e| e.min(limit))
    }
}

impl serde::Serialize for FourCC {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}
