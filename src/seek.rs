//! Frame-accurate random access on top of [`DecodePipeline`].
//!
//! Three orderings meet here: submission order (monotonic, gap-free within a
//! generation), engine output order (lags submission and arrives through
//! [`SeekController::on_output`]), and the order the caller asks for frames in
//! through [`SeekController::seek`].
//!
//! A seek is classified against the last served frame:
//!
//! * **Idle** - nothing served yet. Decoding continues from the current position
//!   if no later sync frame lies between it and the request, else resyncs.
//! * **Adjacent** - the frame right after the last served one; one more sample
//!   is submitted.
//! * **Random** - anything else. Cached frames are released, the engine is reset
//!   and decoding restarts at the closest sync frame at or before the request.
//!
//! A frame already in the cache is served immediately in every state. Each
//! reset bumps the session generation; outputs tagged with an older generation
//! are released without being counted, so a Random seek fully supersedes any
//! replay still in flight.

use crate::config::ReaderConfig;
use crate::engine::{DecodeEngine, Materialize, SequenceTag};
use crate::error::{Error, Result};
use crate::index::{ContainerIndex, MovieInfo};
use crate::pipeline::{DecodePipeline, DecodeSession};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekState {
    Idle,
    Adjacent,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAction {
    ServeCached,
    Continue,
    Resync { sync: u32 },
}

pub struct SeekController<E, C, F>
where
    E: DecodeEngine,
    C: Materialize<E::Image>,
    F: FnMut(C::Bitmap, u32),
{
    pipeline: DecodePipeline<E, C>,
    on_frame_ready: F,
}

impl<E, C, F> SeekController<E, C, F>
where
    E: DecodeEngine,
    C: Materialize<E::Image>,
    F: FnMut(C::Bitmap, u32),
{
    /// Configure `engine` for the container and wait for seeks.
    ///
    /// `on_frame_ready(bitmap, frame_index)` fires once per satisfied request and
    /// takes ownership of the bitmap.
    pub fn new(
        index: Arc<ContainerIndex>,
        engine: E,
        converter: C,
        config: &ReaderConfig,
        on_frame_ready: F,
    ) -> Result<Self> {
        let pipeline = DecodePipeline::new(index, engine, converter, config)?;
        Ok(Self { pipeline, on_frame_ready })
    }

    pub fn info(&self) -> MovieInfo {
        self.pipeline.index().info()
    }

    pub fn num_frames(&self) -> u32 {
        self.pipeline.index().num_frames()
    }

    pub fn session(&self) -> &DecodeSession<C::Bitmap> {
        self.pipeline.session()
    }

    pub fn engine(&self) -> &E {
        self.pipeline.engine()
    }

    /// Classify a request without acting on it.
    pub fn plan(&self, index: u32) -> (SeekState, SeekAction) {
        let s = self.pipeline.session();
        let samples = self.pipeline.index().samples();

        let state = match s.last_served {
            None => SeekState::Idle,
            Some(last) if last.checked_add(1) == Some(index) => SeekState::Adjacent,
            Some(_) => SeekState::Random,
        };
        if s.is_cached(index) {
            return (state, SeekAction::ServeCached);
        }

        let sync = samples.resync_point(index);
        let reachable = s.next_pull <= index;
        let action = match state {
            SeekState::Idle if reachable && sync <= s.next_push => SeekAction::Continue,
            SeekState::Adjacent if reachable => SeekAction::Continue,
            _ => SeekAction::Resync { sync },
        };
        (state, action)
    }

    /// Request frame `index`. The frame arrives later through `on_frame_ready`,
    /// or immediately when it is cached.
    ///
    /// Indices outside `[0, num_frames)` are rejected.
    pub fn seek(&mut self, index: u32) -> Result<()> {
        let num_frames = self.num_frames();
        if index >= num_frames {
            return Err(Error::OutOfRangeSeek { index, num_frames });
        }

        let (state, action) = self.plan(index);
        debug!(index, ?state, ?action, generation = self.session().generation, "seek");
        self.pipeline.set_target(index);

        match action {
            SeekAction::ServeCached => {
                if let Some(bitmap) = self.pipeline.take_cached(index) {
                    (self.on_frame_ready)(bitmap, index);
                }
            }
            SeekAction::Continue => {
                if !self.pipeline.submit_next()? {
                    // nothing left to submit and the frame never arrived
                    self.resync_to(index)?;
                }
            }
            SeekAction::Resync { sync } => {
                self.pipeline.resync(sync)?;
                self.pipeline.submit_next()?;
            }
        }
        Ok(())
    }

    /// Engine notification: ready for more input.
    pub fn on_input_ready(&mut self) -> Result<()> {
        self.pipeline.on_input_ready()
    }

    /// Engine notification: a decoded image tagged with its submission.
    pub fn on_output(&mut self, image: E::Image, tag: SequenceTag) {
        if let Some((index, bitmap)) = self.pipeline.on_output(image, tag) {
            (self.on_frame_ready)(bitmap, index);
        }
    }

    /// Release cached frames and reset the engine.
    pub fn close(mut self) {
        self.pipeline.shutdown();
    }

    fn resync_to(&mut self, index: u32) -> Result<()> {
        let sync = self.pipeline.index().samples().resync_point(index);
        self.pipeline.resync(sync)?;
        self.pipeline.submit_next()?;
        Ok(())
    }
}
