//! Boundary with the external decoding engine.
//!
//! The engine is opaque: it accepts a configuration and coded samples, and reports
//! back through two notifications that the host routes to
//! [`SeekController::on_input_ready`](crate::seek::SeekController::on_input_ready) and
//! [`SeekController::on_output`](crate::seek::SeekController::on_output). Outputs
//! carry the [`SequenceTag`] of the sample they came from.

use crate::error::EngineError;
use crate::index::{ContainerIndex, TrackGeometry};
use serde::Serialize;

/// Whether a coded sample can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// Identifies one submission. `generation` changes on every engine reset, so
/// outputs from an earlier epoch are recognized by a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SequenceTag {
    pub generation: u64,
    pub index: u32,
}

/// One coded sample handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct EncodedChunk<'a> {
    pub data: &'a [u8],
    pub kind: ChunkKind,
    pub tag: SequenceTag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Codec configuration record, hex in JSON.
    #[serde(serialize_with = "serialize_hex")]
    pub description: Vec<u8>,
    pub optimize_for_latency: bool,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

impl DecoderConfig {
    pub fn from_index(index: &ContainerIndex, optimize_for_latency: bool) -> Self {
        let TrackGeometry { frame_width, frame_height } = index.geometry();
        let codec = index.codec();
        Self {
            codec: codec.codec.clone(),
            coded_width: frame_width,
            coded_height: frame_height,
            description: codec.description.clone(),
            optimize_for_latency,
        }
    }
}

/// An external block decoder.
///
/// Decoded images are owned values; dropping one releases it back to the engine.
pub trait DecodeEngine {
    type Image;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), EngineError>;

    /// Queue one coded sample. Output arrives later, possibly after further input.
    fn decode(&mut self, chunk: EncodedChunk<'_>) -> Result<(), EngineError>;

    /// Emit everything still buffered; called once all samples are submitted.
    fn flush(&mut self) -> Result<(), EngineError>;

    /// Drop all queued input and pending output. Requires `configure` afterwards.
    fn reset(&mut self);
}

/// Turns an engine image into something the caller can display.
///
/// Invoked once per image that is served or cached; the engine image is released
/// as soon as the conversion returns.
pub trait Materialize<I> {
    type Bitmap;

    fn materialize(&mut self, image: I) -> Self::Bitmap;
}

impl<I, B, F> Materialize<I> for F
where
    F: FnMut(I) -> B,
{
    type Bitmap = B;

    fn materialize(&mut self, image: I) -> B {
        self(image)
    }
}
