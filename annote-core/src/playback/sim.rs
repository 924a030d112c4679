//! Clock-driven stand-in for a real decoder.
//!
//! A [`SimulatedPlayer`] advances its position from an injected [`Clock`] and
//! reports the probed duration of its stream. It is the backend of the
//! terminal front end and of the test-suite. Players share their state with
//! the [`SimulatedBackend`] that created them, so callers can inject buffering,
//! drift or a metadata frame rate through [`SimulatedBackend::player`].

use super::player::{MediaBackend, MediaPlayer, MediaStatus};
use crate::error::{Error, Result};
use crate::schedule::Clock;
use crate::types::VideoStream;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct SimState {
    stream_id: String,
    probe_duration_ms: u64,
    loaded: bool,
    invalid: bool,
    ready_at_ms: u64,
    playing: bool,
    base_ms: u64,
    started_at_ms: u64,
    gain: u8,
    rate: f64,
    status_override: Option<MediaStatus>,
    reported_fps: Option<f64>,
}

impl SimState {
    fn frozen(&self) -> bool {
        matches!(
            self.status_override,
            Some(MediaStatus::Loading | MediaStatus::Buffering | MediaStatus::Stalled)
        )
    }

    fn position(&self, now: u64) -> u64 {
        if !self.playing || self.frozen() {
            return self.base_ms;
        }
        let elapsed = now.saturating_sub(self.started_at_ms) as f64 * self.rate;
        let pos = self.base_ms + elapsed.max(0.0) as u64;
        if self.probe_duration_ms > 0 {
            pos.min(self.probe_duration_ms)
        } else {
            pos
        }
    }

    fn at_end(&self, now: u64) -> bool {
        self.probe_duration_ms > 0 && self.position(now) >= self.probe_duration_ms
    }

    /// Fold the running position into `base_ms` and restart the reference.
    fn rebase(&mut self, now: u64) {
        self.base_ms = self.position(now);
        self.started_at_ms = now.max(self.ready_at_ms);
    }
}

/// A simulated player; clones share state.
#[derive(Clone)]
pub struct SimulatedPlayer {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimulatedPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPlayer")
            .field("state", &*self.lock())
            .finish()
    }
}

impl SimulatedPlayer {
    pub fn new(clock: Arc<dyn Clock>, stream: &VideoStream) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(SimState {
                stream_id: stream.stream_id.clone(),
                probe_duration_ms: stream.duration_ms,
                loaded: false,
                invalid: false,
                ready_at_ms: 0,
                playing: false,
                base_ms: 0,
                started_at_ms: 0,
                gain: 0,
                rate: 1.0,
                status_override: None,
                reported_fps: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Force a status (e.g. `Buffering`); `None` returns to the natural one.
    /// Position does not advance while loading, buffering or stalled.
    pub fn set_status(&self, status: Option<MediaStatus>) {
        let now = self.now();
        let mut state = self.lock();
        state.rebase(now);
        state.status_override = status;
    }

    /// Playback speed relative to the clock.
    pub fn set_rate(&self, rate: f64) {
        let now = self.now();
        let mut state = self.lock();
        state.rebase(now);
        state.rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
    }

    /// Frame rate the player reports from container metadata.
    pub fn set_reported_fps(&self, fps: Option<f64>) {
        self.lock().reported_fps = fps;
    }

    /// Complete a pending load now.
    pub fn finish_loading(&self) {
        let now = self.now();
        let mut state = self.lock();
        state.ready_at_ms = now;
        if state.playing {
            state.started_at_ms = now;
        }
    }

    pub fn gain(&self) -> u8 {
        self.lock().gain
    }

    fn start_loading(&self, delay_ms: u64) {
        let now = self.now();
        let mut state = self.lock();
        state.ready_at_ms = now + delay_ms;
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn load(&mut self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if !path.is_file() {
            state.loaded = false;
            state.invalid = true;
            return Err(Error::StreamUnavailable {
                stream_id: state.stream_id.clone(),
                reason: format!("{} not found", path.display()),
            });
        }
        state.loaded = true;
        state.invalid = false;
        state.base_ms = 0;
        state.playing = false;
        Ok(())
    }

    fn unload(&mut self) {
        let mut state = self.lock();
        state.loaded = false;
        state.invalid = false;
        state.playing = false;
        state.base_ms = 0;
    }

    fn play(&mut self) {
        let now = self.now();
        let mut state = self.lock();
        if !state.loaded || state.playing || state.at_end(now) {
            return;
        }
        state.playing = true;
        state.started_at_ms = now.max(state.ready_at_ms);
    }

    fn pause(&mut self) {
        let now = self.now();
        let mut state = self.lock();
        state.rebase(now);
        state.playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.playing = false;
        state.base_ms = 0;
    }

    fn seek(&mut self, position_ms: u64) {
        let now = self.now();
        let mut state = self.lock();
        if !state.loaded {
            return;
        }
        state.base_ms = if state.probe_duration_ms > 0 {
            position_ms.min(state.probe_duration_ms)
        } else {
            position_ms
        };
        state.started_at_ms = now.max(state.ready_at_ms);
    }

    fn position_ms(&self) -> u64 {
        let now = self.now();
        self.lock().position(now)
    }

    fn duration_ms(&self) -> u64 {
        let state = self.lock();
        if state.loaded {
            state.probe_duration_ms
        } else {
            0
        }
    }

    fn status(&self) -> MediaStatus {
        let now = self.now();
        let state = self.lock();
        if !state.loaded {
            return if state.invalid {
                MediaStatus::Invalid
            } else {
                MediaStatus::Unloaded
            };
        }
        if let Some(status) = state.status_override {
            return status;
        }
        if now < state.ready_at_ms {
            MediaStatus::Loading
        } else if state.at_end(now) {
            MediaStatus::Ended
        } else {
            MediaStatus::Ready
        }
    }

    fn is_playing(&self) -> bool {
        let now = self.now();
        let state = self.lock();
        state.loaded && state.playing && !state.at_end(now)
    }

    fn has_media(&self) -> bool {
        self.lock().loaded
    }

    fn set_gain(&mut self, gain: u8) {
        self.lock().gain = gain.min(100);
    }

    fn frame_rate(&self) -> Option<f64> {
        self.lock().reported_fps
    }
}

/// Creates [`SimulatedPlayer`]s and keeps a handle to each, by stream id.
#[derive(Clone)]
pub struct SimulatedBackend {
    clock: Arc<dyn Clock>,
    load_delay_ms: u64,
    players: Arc<Mutex<HashMap<String, SimulatedPlayer>>>,
}

impl SimulatedBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            load_delay_ms: 0,
            players: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Time players spend in `Loading` after `load`.
    pub fn with_load_delay(mut self, delay_ms: u64) -> Self {
        self.load_delay_ms = delay_ms;
        self
    }

    /// Handle to the most recent player created for `stream_id`.
    pub fn player(&self, stream_id: &str) -> Option<SimulatedPlayer> {
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_id)
            .cloned()
    }
}

impl MediaBackend for SimulatedBackend {
    fn create(&self, stream: &VideoStream) -> Box<dyn MediaPlayer> {
        let player = SimulatedPlayer::new(Arc::clone(&self.clock), stream);
        player.start_loading(self.load_delay_ms);
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.stream_id.clone(), player.clone());
        Box::new(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualClock;

    fn loaded_player(clock: &ManualClock, duration_ms: u64) -> (tempfile::TempDir, SimulatedPlayer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video-1.mp4");
        std::fs::write(&path, b"").unwrap();
        let stream = VideoStream::local("video-1", "video-1.mp4").with_probe(duration_ms, 30.0);
        let mut player = SimulatedPlayer::new(Arc::new(clock.clone()), &stream);
        player.load(&path).unwrap();
        (dir, player)
    }

    #[test]
    fn test_position_follows_clock() {
        let clock = ManualClock::new();
        let (_dir, mut player) = loaded_player(&clock, 5_000);
        assert_eq!(player.status(), MediaStatus::Ready);

        player.play();
        clock.advance(1_200);
        assert_eq!(player.position_ms(), 1_200);

        player.pause();
        clock.advance(1_000);
        assert_eq!(player.position_ms(), 1_200);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_runs_to_end_and_clamps_seek() {
        let clock = ManualClock::new();
        let (_dir, mut player) = loaded_player(&clock, 2_000);
        player.play();
        clock.advance(5_000);
        assert_eq!(player.position_ms(), 2_000);
        assert_eq!(player.status(), MediaStatus::Ended);
        assert!(!player.is_playing());

        player.seek(9_000);
        assert_eq!(player.position_ms(), 2_000);
        player.stop();
        assert_eq!(player.position_ms(), 0);
        assert_eq!(player.status(), MediaStatus::Ready);
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let clock = ManualClock::new();
        let stream = VideoStream::local("video-2", "video-2.mp4");
        let mut player = SimulatedPlayer::new(Arc::new(clock), &stream);
        let err = player.load(Path::new("/nonexistent/video-2.mp4")).unwrap_err();
        assert!(matches!(err, Error::StreamUnavailable { .. }));
        assert_eq!(player.status(), MediaStatus::Invalid);
        assert!(!player.has_media());
    }

    #[test]
    fn test_buffering_freezes_position() {
        let clock = ManualClock::new();
        let (_dir, mut player) = loaded_player(&clock, 10_000);
        player.play();
        clock.advance(500);
        player.set_status(Some(MediaStatus::Buffering));
        clock.advance(500);
        assert_eq!(player.position_ms(), 500);
        player.set_status(None);
        clock.advance(250);
        assert_eq!(player.position_ms(), 750);
    }
}
