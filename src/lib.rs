pub mod boxes;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod known_boxes;
pub mod parser;
pub mod pipeline;
pub mod samples;
pub mod seek;
pub mod util;

pub use boxes::{BoxScanner, BoxSpan, FourCC};
pub use config::ReaderConfig;
pub use engine::{ChunkKind, DecodeEngine, DecoderConfig, EncodedChunk, Materialize, SequenceTag};
pub use error::{EngineError, Error, Result};
pub use index::{CodecConfig, ContainerIndex, MovieInfo, SampleTable, SyncSamples, TrackGeometry};
pub use samples::{SampleInfo, SampleLocator};
pub use seek::{SeekAction, SeekController, SeekState};

/// Parse a container held in memory and summarize its video track.
///
/// ```no_run
/// let bytes = std::fs::read("video.mp4")?;
/// let index = mp4seek::open(bytes)?;
/// println!("{} frames, {}x{}", index.num_frames(), index.geometry().frame_width, index.geometry().frame_height);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn open(buffer: Vec<u8>) -> Result<ContainerIndex> {
    ContainerIndex::parse(buffer)
}
