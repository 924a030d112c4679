//! The media-player capability the sync engine drives.
//!
//! Decoding and rendering live behind [`MediaPlayer`]; the engine only needs
//! transport control, position/duration and a coarse status.

use crate::error::Result;
use crate::types::VideoStream;
use std::path::Path;

/// Media status reported by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaStatus {
    /// Nothing loaded
    Unloaded,
    Loading,
    Ready,
    Buffering,
    Stalled,
    Ended,
    /// Media could not be loaded; never becomes ready
    Invalid,
    /// Backend cannot tell
    Unknown,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Unloaded => "unloaded",
            MediaStatus::Loading => "loading",
            MediaStatus::Ready => "ready",
            MediaStatus::Buffering => "buffering",
            MediaStatus::Stalled => "stalled",
            MediaStatus::Ended => "ended",
            MediaStatus::Invalid => "invalid",
            MediaStatus::Unknown => "unknown",
        }
    }

    /// Whether a play request must wait for this stream.
    ///
    /// `Unknown` only blocks when the player actually holds media.
    pub fn blocks_play(&self, has_media: bool) -> bool {
        match self {
            MediaStatus::Loading | MediaStatus::Buffering | MediaStatus::Stalled => true,
            MediaStatus::Unknown => has_media,
            _ => false,
        }
    }
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independently decoding media player.
pub trait MediaPlayer: Send {
    /// Open media; failures leave the player without media.
    fn load(&mut self, path: &Path) -> Result<()>;
    fn unload(&mut self);

    fn play(&mut self);
    fn pause(&mut self);
    /// Stop and rewind.
    fn stop(&mut self);
    /// Seek to a position; players clamp to their own duration.
    fn seek(&mut self, position_ms: u64);

    fn position_ms(&self) -> u64;
    /// 0 while unknown
    fn duration_ms(&self) -> u64;
    fn status(&self) -> MediaStatus;
    fn is_playing(&self) -> bool;
    fn has_media(&self) -> bool;

    /// Output gain, 0-100.
    fn set_gain(&mut self, gain: u8);

    /// Frame rate from container metadata, when the backend knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

/// Creates players for streams.
pub trait MediaBackend: Send {
    fn create(&self, stream: &VideoStream) -> Box<dyn MediaPlayer>;
}
