use crate::boxes::FourCC;

/// Boxes the container index visits, by role.
///
/// Anything else becomes `KnownBox::Unknown(fourcc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBox {
    Ftyp,
    Moov,
    Mdat,
    Mvhd,
    Trak,
    Tkhd,
    Mdia,
    Mdhd,
    Hdlr,
    Minf,
    Stbl,
    Stsd,
    Stts,
    Ctts,
    Stss,
    Stco,
    Co64,
    Stsc,
    Stsz,
    Avc1,
    Avc3,
    Avcc,
    Unknown(FourCC),
}

// tag, variant, name used in diagnostics
const TABLE: &[(FourCC, KnownBox, &str)] = &[
    (FourCC::FTYP, KnownBox::Ftyp, "File Type Box"),
    (FourCC::MOOV, KnownBox::Moov, "Movie Box"),
    (FourCC::MDAT, KnownBox::Mdat, "Media Data Box"),
    (FourCC::MVHD, KnownBox::Mvhd, "Movie Header Box"),
    (FourCC::TRAK, KnownBox::Trak, "Track Box"),
    (FourCC::TKHD, KnownBox::Tkhd, "Track Header Box"),
    (FourCC::MDIA, KnownBox::Mdia, "Media Box"),
    (FourCC::MDHD, KnownBox::Mdhd, "Media Header Box"),
    (FourCC::HDLR, KnownBox::Hdlr, "Handler Reference Box"),
    (FourCC::MINF, KnownBox::Minf, "Media Information Box"),
    (FourCC::STBL, KnownBox::Stbl, "Sample Table Box"),
    (FourCC::STSD, KnownBox::Stsd, "Sample Description Box"),
    (FourCC::STTS, KnownBox::Stts, "Decoding Time to Sample Box"),
    (FourCC::CTTS, KnownBox::Ctts, "Composition Time to Sample Box"),
    (FourCC::STSS, KnownBox::Stss, "Sync Sample Box"),
    (FourCC::STCO, KnownBox::Stco, "Chunk Offset Box"),
    (FourCC::CO64, KnownBox::Co64, "64-bit Chunk Offset Box"),
    (FourCC::STSC, KnownBox::Stsc, "Sample to Chunk Box"),
    (FourCC::STSZ, KnownBox::Stsz, "Sample Size Box"),
    (FourCC(*b"avc1"), KnownBox::Avc1, "AVC Sample Entry"),
    (FourCC(*b"avc3"), KnownBox::Avc3, "AVC Sample Entry (in-band parameter sets)"),
    (FourCC::AVCC, KnownBox::Avcc, "AVC Configuration Box"),
];

impl From<FourCC> for KnownBox {
    fn from(cc: FourCC) -> Self {
        TABLE
            .iter()
            .find(|(tag, _, _)| *tag == cc)
            .map_or(KnownBox::Unknown(cc), |&(_, kind, _)| kind)
    }
}

impl KnownBox {
    fn entry(&self) -> Option<&'static (FourCC, KnownBox, &'static str)> {
        TABLE.iter().find(|(_, kind, _)| kind == self)
    }

    pub fn fourcc(&self) -> FourCC {
        match (self, self.entry()) {
            (KnownBox::Unknown(cc), _) => *cc,
            (_, Some(&(tag, _, _))) => tag,
            (_, None) => FourCC(*b"????"),
        }
    }

    /// Human-readable name, e.g. "Sample Table Box".
    pub fn full_name(&self) -> &'static str {
        self.entry().map_or("Unknown Box", |&(_, _, name)| name)
    }

    /// Sample entry formats whose codec string can be synthesized.
    pub fn is_avc_entry(&self) -> bool {
        matches!(self, KnownBox::Avc1 | KnownBox::Avc3)
    }
}

impl std::fmt::Display for KnownBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.full_name(), self.fourcc())
    }
}
