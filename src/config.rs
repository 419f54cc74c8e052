use serde::{Deserialize, Serialize};

/// Tunables for a frame reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Frames to keep decoding past the current target. They are cached so that
    /// sequential playback is served without waiting on the engine.
    pub decode_ahead: u32,

    /// Forwarded to the engine as a latency/throughput hint.
    pub optimize_for_latency: bool,
}

impl ReaderConfig {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn with_decode_ahead(mut self, frames: u32) -> Self {
        self.decode_ahead = frames;
        self
    }

    pub fn with_low_latency(mut self, enabled: bool) -> Self {
        self.optimize_for_latency = enabled;
        self
    }
}
