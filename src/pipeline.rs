use crate::config::ReaderConfig;
use crate::engine::{ChunkKind, DecodeEngine, DecoderConfig, EncodedChunk, Materialize, SequenceTag};
use crate::error::{Error, Result};
use crate::index::ContainerIndex;
use crate::samples::SampleLocator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Mutable decode state for one open container.
#[derive(Debug)]
pub struct DecodeSession<B> {
    /// Next sample to submit.
    pub next_push: u32,
    /// Position the next current-generation output will be counted as.
    pub next_pull: u32,
    /// Last index handed to the caller.
    pub last_served: Option<u32>,
    /// Most recent seek request.
    pub target: Option<u32>,
    /// Bumped on every engine reset.
    pub generation: u64,
    /// Whether the engine was asked to flush in this generation.
    pub flushed: bool,
    cache: BTreeMap<u32, B>,
}

impl<B> DecodeSession<B> {
    fn new() -> Self {
        Self {
            next_push: 0,
            next_pull: 0,
            last_served: None,
            target: None,
            generation: 0,
            flushed: false,
            cache: BTreeMap::new(),
        }
    }

    pub fn is_cached(&self, index: u32) -> bool {
        self.cache.contains_key(&index)
    }

    pub fn cached_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.cache.keys().copied()
    }
}

/// Owns the engine and pushes coded samples into it in index order.
pub struct DecodePipeline<E: DecodeEngine, C: Materialize<E::Image>> {
    index: Arc<ContainerIndex>,
    engine: E,
    converter: C,
    config: DecoderConfig,
    decode_ahead: u32,
    session: DecodeSession<C::Bitmap>,
}

impl<E: DecodeEngine, C: Materialize<E::Image>> DecodePipeline<E, C> {
    /// Configure `engine` for the container's video track.
    ///
    /// A rejected configuration is reported as [`Error::UnsupportedCodec`].
    pub fn new(index: Arc<ContainerIndex>, mut engine: E, converter: C, reader: &ReaderConfig) -> Result<Self> {
        let config = DecoderConfig::from_index(&index, reader.optimize_for_latency);
        engine
            .configure(&config)
            .map_err(|e| Error::UnsupportedCodec(format!("{}: {}", config.codec, e)))?;
        debug!(codec = %config.codec, "engine configured");
        Ok(Self {
            index,
            engine,
            converter,
            config,
            decode_ahead: reader.decode_ahead,
            session: DecodeSession::new(),
        })
    }

    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    pub fn session(&self) -> &DecodeSession<C::Bitmap> {
        &self.session
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn decoder_config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn set_target(&mut self, index: u32) {
        self.session.target = Some(index);
    }

    /// Remove a cached frame, marking it served.
    pub fn take_cached(&mut self, index: u32) -> Option<C::Bitmap> {
        let bitmap = self.session.cache.remove(&index)?;
        self.session.last_served = Some(index);
        Some(bitmap)
    }

    /// Submit the next sample, or flush once every sample is in.
    ///
    /// Returns `false` when there is nothing left to do in this generation.
    pub fn submit_next(&mut self) -> Result<bool> {
        let s = &mut self.session;
        if s.next_push < self.index.num_frames() {
            let index = s.next_push;
            let data = SampleLocator::new(&self.index).sample_bytes(index)?;
            let kind = if self.index.samples().is_sync(index) { ChunkKind::Key } else { ChunkKind::Delta };
            let tag = SequenceTag { generation: s.generation, index };
            trace!(index, ?kind, generation = s.generation, "submit");
            self.engine.decode(EncodedChunk { data, kind, tag })?;
            s.next_push += 1;
            Ok(true)
        } else if !s.flushed {
            trace!(generation = s.generation, "all samples submitted, flushing");
            s.flushed = true;
            self.engine.flush()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Whether outputs up to the target (plus decode-ahead) are still owed.
    pub fn wants_input(&self) -> bool {
        let s = &self.session;
        s.target
            .is_some_and(|t| s.next_pull <= t.saturating_add(self.decode_ahead))
    }

    /// Engine notification: it can take more input.
    pub fn on_input_ready(&mut self) -> Result<()> {
        if self.wants_input() {
            self.submit_next()?;
        }
        Ok(())
    }

    /// Release every cached frame, reset and reconfigure the engine, and rebase
    /// the counters on `sync`.
    pub fn resync(&mut self, sync: u32) -> Result<()> {
        self.release_cache();
        self.engine.reset();
        self.engine
            .configure(&self.config)
            .map_err(|e| Error::UnsupportedCodec(format!("{}: {}", self.config.codec, e)))?;

        let s = &mut self.session;
        s.generation += 1;
        s.next_push = sync;
        s.next_pull = sync;
        s.last_served = sync.checked_sub(1);
        s.flushed = false;
        debug!(sync, generation = s.generation, "engine reset");
        Ok(())
    }

    /// Engine notification: a decoded image is available.
    ///
    /// Returns the frame when it is the current target; later frames are cached
    /// and earlier or stale ones are released.
    pub fn on_output(&mut self, image: E::Image, tag: SequenceTag) -> Option<(u32, C::Bitmap)> {
        let s = &mut self.session;
        if tag.generation != s.generation {
            trace!(index = tag.index, generation = tag.generation, "releasing stale output");
            drop(image);
            return None;
        }

        let position = s.next_pull;
        s.next_pull += 1;
        if position != tag.index {
            trace!(position, tag = tag.index, "output reordered by engine");
        }

        match s.target {
            Some(target) if position == target => {
                let bitmap = self.converter.materialize(image);
                s.last_served = Some(position);
                Some((position, bitmap))
            }
            Some(target) if position > target => {
                let bitmap = self.converter.materialize(image);
                // a slot holds at most one frame; the older one is released
                if s.cache.insert(position, bitmap).is_some() {
                    trace!(position, "replaced cached frame");
                }
                None
            }
            _ => {
                trace!(position, "releasing output before target");
                drop(image);
                None
            }
        }
    }

    fn release_cache(&mut self) {
        let released = self.session.cache.len();
        self.session.cache.clear();
        if released > 0 {
            trace!(released, "released cached frames");
        }
    }

    /// Drop cached frames and reset the engine.
    pub fn shutdown(&mut self) {
        self.release_cache();
        self.engine.reset();
        self.session.target = None;
    }
}
