use crate::known_boxes::KnownBox;

/// Failure reported by an external decoding engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("configuration rejected: {0}")]
    Rejected(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A structural assumption about the container does not hold.
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    #[error("malformed container: missing {0}")]
    MissingBox(KnownBox),
    #[error("malformed container: truncated box ({0})")]
    Truncated(#[from] std::io::Error),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("frame {index} out of range (container has {num_frames} frames)")]
    OutOfRangeSeek { index: u32, num_frames: u32 },
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }

    /// Errors that abort `open` and leave no index behind.
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedContainer(_) | Error::MissingBox(_) | Error::Truncated(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
