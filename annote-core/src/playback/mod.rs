//! Multi-stream playback synchronization.
//!
//! [`PlaybackSyncEngine`] keeps N independently decoding players locked to
//! the *time source* stream:
//!
//! - play requests wait (briefly) for active streams that are still loading or
//!   buffering, up to a hard deadline
//! - while playing, a reconciliation tick re-seeks followers that drifted too
//!   far and stops everything at the master's end
//! - streams shorter than the master are masked once the master passes their
//!   own end
//!
//! The engine never spawns anything: the front end calls [`PlaybackSyncEngine::poll`]
//! from its loop and drains [`PlaybackEvent`]s from a subscription.

mod player;
mod sim;

pub use player::{MediaBackend, MediaPlayer, MediaStatus};
pub use sim::{SimulatedBackend, SimulatedPlayer};

use crate::config::PlaybackConfig;
use crate::error::Error;
use crate::events::{EventBus, PlaybackEvent, Warning};
use crate::schedule::{Clock, ScheduledTask};
use crate::types::{normalize_camid, VideoStream, DEFAULT_FPS};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Gain of the audio source; every other stream is muted.
const AUDIBLE_GAIN: u8 = 100;

/// What the capture workflow needs from playback.
pub trait Transport {
    /// Playing, or waiting on the buffering gate to play.
    fn is_playing(&self) -> bool;
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
    fn play_all(&mut self);
    fn pause_all(&mut self);
    fn seek_all(&mut self, position_ms: u64);
    fn time_source(&self) -> Option<String>;
    fn audio_source(&self) -> Option<String>;
    fn active_views(&self) -> Vec<String>;
    fn fps_for(&self, stream_id: &str) -> f64;
    /// Within the end tolerance of a known duration.
    fn is_at_end(&self) -> bool;

    /// Resume a remembered play intent, never from end-of-media.
    fn resume_if_allowed(&mut self, was_playing: bool) -> bool {
        if !was_playing || self.is_at_end() {
            return false;
        }
        self.play_all();
        true
    }
}

/// Outcome of [`PlaybackSyncEngine::set_active_views`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSelection {
    Applied,
    /// Nothing usable was requested; the previous (or first) view was kept
    FellBack,
}

/// Read-only view of one stream for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub stream_id: String,
    pub filename: String,
    pub status: MediaStatus,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub fps: f64,
    pub exhausted: bool,
    pub active: bool,
    pub is_time_source: bool,
    pub is_audio_source: bool,
}

struct StreamSlot {
    stream: VideoStream,
    player: Box<dyn MediaPlayer>,
    status: MediaStatus,
    exhausted: bool,
}

impl StreamSlot {
    fn id(&self) -> &str {
        &self.stream.stream_id
    }

    /// Player-reported duration, falling back to the probed one.
    fn duration_ms(&self) -> u64 {
        match self.player.duration_ms() {
            0 => self.stream.duration_ms,
            d => d,
        }
    }
}

struct PlayGate {
    deadline_ms: u64,
    poll: ScheduledTask,
}

/// Keeps a set of players aligned to one time source.
pub struct PlaybackSyncEngine {
    config: PlaybackConfig,
    clock: Arc<dyn Clock>,
    backend: Box<dyn MediaBackend>,
    streams: Vec<StreamSlot>,
    time_source: Option<String>,
    audio_source: Option<String>,
    active_views: Vec<String>,
    reconcile: ScheduledTask,
    gate: Option<PlayGate>,
    last_position: u64,
    last_duration: u64,
    last_playing: bool,
    events: EventBus<PlaybackEvent>,
}

impl PlaybackSyncEngine {
    pub fn new(
        config: PlaybackConfig,
        clock: Arc<dyn Clock>,
        backend: Box<dyn MediaBackend>,
    ) -> Self {
        let reconcile = ScheduledTask::new(config.reconcile_interval_ms);
        Self {
            config,
            clock,
            backend,
            streams: Vec::new(),
            time_source: None,
            audio_source: None,
            active_views: Vec::new(),
            reconcile,
            gate: None,
            last_position: 0,
            last_duration: 0,
            last_playing: false,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    // ============================================
    // Session lifecycle
    // ============================================

    /// Replace all streams with players for `videos` under `session_dir`.
    ///
    /// Missing media is tolerated: the stream stays listed as `Invalid` and a
    /// warning is returned. Roles and views default to the first stream.
    pub fn load_streams(&mut self, session_dir: &Path, videos: &[VideoStream]) -> Vec<Warning> {
        self.unload();

        let mut warnings = Vec::new();
        for video in videos {
            let mut player = self.backend.create(video);
            let path = session_dir.join(&video.filename);
            if let Err(e) = player.load(&path) {
                tracing::warn!(stream_id = %video.stream_id, error = %e, "stream unavailable");
                let reason = match e {
                    Error::StreamUnavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                warnings.push(Warning::StreamUnavailable {
                    stream_id: video.stream_id.clone(),
                    reason,
                });
            }
            player.set_gain(0);
            let status = player.status();
            self.streams.push(StreamSlot {
                stream: video.clone(),
                player,
                status,
                exhausted: false,
            });
        }

        let first = self.streams.first().map(|s| s.id().to_string());
        self.time_source = first.clone();
        self.audio_source = first.clone();
        self.active_views = first.into_iter().collect();
        self.apply_gains();

        self.last_position = self.position_ms();
        self.last_duration = self.duration_ms();
        self.events
            .emit(PlaybackEvent::DurationChanged(self.last_duration));
        self.update_masking();

        tracing::info!(
            dir = %session_dir.display(),
            streams = self.streams.len(),
            unavailable = warnings.len(),
            "Streams loaded"
        );
        warnings
    }

    /// Stop and drop every player.
    pub fn unload(&mut self) {
        self.gate = None;
        self.reconcile.stop();
        for slot in &mut self.streams {
            slot.player.stop();
            slot.player.unload();
        }
        self.streams.clear();
        self.time_source = None;
        self.audio_source = None;
        self.active_views.clear();
        self.last_position = 0;
        self.last_duration = 0;
        self.emit_play_state();
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        self.streams
            .iter()
            .map(|slot| StreamSnapshot {
                stream_id: slot.id().to_string(),
                filename: slot.stream.filename.clone(),
                status: slot.status,
                position_ms: slot.player.position_ms(),
                duration_ms: slot.duration_ms(),
                fps: self.fps_for(slot.id()),
                exhausted: slot.exhausted,
                active: self.active_views.iter().any(|v| v == slot.id()),
                is_time_source: self.time_source.as_deref() == Some(slot.id()),
                is_audio_source: self.audio_source.as_deref() == Some(slot.id()),
            })
            .collect()
    }

    pub fn is_exhausted(&self, stream_id: &str) -> bool {
        self.slot(stream_id).is_some_and(|s| s.exhausted)
    }

    pub fn duration_for(&self, stream_id: &str) -> u64 {
        self.slot(stream_id).map_or(0, StreamSlot::duration_ms)
    }

    fn find(&self, stream_id: &str) -> Option<usize> {
        let wanted = normalize_camid(stream_id);
        self.streams
            .iter()
            .position(|s| normalize_camid(s.id()) == wanted)
    }

    fn slot(&self, stream_id: &str) -> Option<&StreamSlot> {
        self.find(stream_id).map(|i| &self.streams[i])
    }

    fn master(&self) -> Option<&StreamSlot> {
        self.time_source.as_deref().and_then(|id| self.slot(id))
    }

    // ============================================
    // Roles and views
    // ============================================

    /// Make `stream_id` the clock. Unknown ids are ignored.
    pub fn set_time_source(&mut self, stream_id: &str) -> bool {
        let Some(index) = self.find(stream_id) else {
            tracing::debug!(stream_id, "ignoring unknown time source");
            return false;
        };
        self.time_source = Some(self.streams[index].id().to_string());

        self.last_duration = self.duration_ms();
        self.events
            .emit(PlaybackEvent::DurationChanged(self.last_duration));
        self.last_position = self.position_ms();
        self.update_masking();
        true
    }

    /// Make `stream_id` the only audible stream. Unknown ids are ignored.
    pub fn set_audio_source(&mut self, stream_id: &str) -> bool {
        let Some(index) = self.find(stream_id) else {
            tracing::debug!(stream_id, "ignoring unknown audio source");
            return false;
        };
        self.audio_source = Some(self.streams[index].id().to_string());
        self.apply_gains();
        true
    }

    fn apply_gains(&mut self) {
        let audio = self.audio_source.clone();
        for slot in &mut self.streams {
            let gain = if audio.as_deref() == Some(slot.id()) {
                AUDIBLE_GAIN
            } else {
                0
            };
            slot.player.set_gain(gain);
        }
    }

    /// Select the rendered streams; the set is never left empty.
    pub fn set_active_views<S: AsRef<str>>(&mut self, stream_ids: &[S]) -> ViewSelection {
        let mut chosen: Vec<String> = Vec::new();
        for id in stream_ids {
            if let Some(index) = self.find(id.as_ref()) {
                let id = self.streams[index].id().to_string();
                if !chosen.contains(&id) {
                    chosen.push(id);
                }
            }
        }

        let outcome = if chosen.is_empty() {
            chosen = if self.active_views.is_empty() {
                self.streams
                    .first()
                    .map(|s| s.id().to_string())
                    .into_iter()
                    .collect()
            } else {
                self.active_views.clone()
            };
            ViewSelection::FellBack
        } else {
            ViewSelection::Applied
        };

        self.active_views = chosen;
        self.update_masking();
        outcome
    }

    pub fn time_source(&self) -> Option<&str> {
        self.time_source.as_deref()
    }

    pub fn audio_source(&self) -> Option<&str> {
        self.audio_source.as_deref()
    }

    pub fn active_views(&self) -> &[String] {
        &self.active_views
    }

    // ============================================
    // Transport
    // ============================================

    /// Play every stream, deferring while active streams are not ready.
    pub fn play_all(&mut self) {
        if self.streams.is_empty() || self.gate.is_some() {
            return;
        }
        if !self.needs_gate() {
            self.start_playback();
            return;
        }

        let now = self.clock.now_ms();
        let mut poll = ScheduledTask::new(self.config.gate_poll_interval_ms);
        poll.start(now);
        self.gate = Some(PlayGate {
            deadline_ms: now + self.config.gate_deadline_ms,
            poll,
        });
        tracing::debug!(
            deadline_ms = self.config.gate_deadline_ms,
            "play deferred until streams are ready"
        );
        self.emit_play_state();
    }

    pub fn pause_all(&mut self) {
        self.gate = None;
        for slot in &mut self.streams {
            slot.player.pause();
        }
        self.reconcile.stop();
        self.emit_play_state();
    }

    pub fn stop_all(&mut self) {
        self.gate = None;
        for slot in &mut self.streams {
            slot.player.stop();
        }
        self.reconcile.stop();
        self.emit_play_state();
    }

    /// Seek every stream to the same position.
    ///
    /// Playback is paused around the seek and re-requested through the gate
    /// only if it was playing before.
    pub fn seek_all(&mut self, position_ms: u64) {
        if self.streams.is_empty() {
            return;
        }
        let was_playing = self.is_playing();
        if was_playing {
            self.pause_all();
        }

        for slot in &mut self.streams {
            slot.player.seek(position_ms);
        }
        self.last_position = self.position_ms();
        self.events
            .emit(PlaybackEvent::PositionChanged(self.last_position));
        self.update_masking();

        if was_playing {
            self.play_all();
        }
    }

    /// Master playing, or a play request waiting on the gate.
    pub fn is_playing(&self) -> bool {
        self.gate.is_some() || self.master().is_some_and(|m| m.player.is_playing())
    }

    pub fn is_play_pending(&self) -> bool {
        self.gate.is_some()
    }

    pub fn position_ms(&self) -> u64 {
        self.master().map_or(0, |m| m.player.position_ms())
    }

    pub fn duration_ms(&self) -> u64 {
        self.master().map_or(0, StreamSlot::duration_ms)
    }

    /// Probed or metadata frame rate, else the default.
    pub fn fps_for(&self, stream_id: &str) -> f64 {
        let Some(slot) = self.slot(stream_id) else {
            return DEFAULT_FPS;
        };
        if slot.stream.fps.is_finite() && slot.stream.fps > 0.0 {
            return slot.stream.fps;
        }
        slot.player
            .frame_rate()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(DEFAULT_FPS)
    }

    pub fn is_at_end(&self) -> bool {
        let duration = self.duration_ms();
        duration > 0 && self.position_ms() + self.config.end_tolerance_ms >= duration
    }

    fn needs_gate(&self) -> bool {
        let blocking = |slot: &StreamSlot| slot.player.status().blocks_play(slot.player.has_media());
        if self.active_views.is_empty() {
            self.streams.iter().any(blocking)
        } else {
            self.active_views
                .iter()
                .filter_map(|id| self.slot(id))
                .any(blocking)
        }
    }

    fn start_playback(&mut self) {
        self.gate = None;
        for slot in &mut self.streams {
            slot.player.play();
        }
        self.reconcile.start(self.clock.now_ms());
        self.emit_play_state();
    }

    fn emit_play_state(&mut self) {
        let playing = self.is_playing();
        if playing != self.last_playing {
            self.last_playing = playing;
            self.events.emit(PlaybackEvent::PlayStateChanged(playing));
        }
    }

    // ============================================
    // Polling
    // ============================================

    /// Observe the players and run due timers.
    pub fn poll(&mut self) {
        if self.streams.is_empty() {
            return;
        }
        let now = self.clock.now_ms();

        let master_id = self.time_source.clone();
        let mut status_changed = false;
        let mut master_ended = false;
        for slot in &mut self.streams {
            let status = slot.player.status();
            if status != slot.status {
                tracing::debug!(
                    stream_id = %slot.stream.stream_id,
                    from = %slot.status,
                    to = %status,
                    "media status changed"
                );
                slot.status = status;
                status_changed = true;
                if status == MediaStatus::Ended
                    && master_id.as_deref() == Some(slot.stream.stream_id.as_str())
                {
                    master_ended = true;
                }
                self.events.emit(PlaybackEvent::StatusChanged {
                    stream_id: slot.stream.stream_id.clone(),
                    status,
                });
            }

            if let Some(fps) = slot.player.frame_rate() {
                if fps.is_finite() && fps > 0.0 && (slot.stream.fps - fps).abs() > 0.001 {
                    tracing::debug!(stream_id = %slot.stream.stream_id, fps, "frame rate updated");
                    slot.stream.fps = fps;
                    self.events.emit(PlaybackEvent::FpsUpdated {
                        stream_id: slot.stream.stream_id.clone(),
                        fps,
                    });
                }
            }
        }

        if master_ended && self.reconcile.is_running() {
            self.finish_at_end();
        }

        self.poll_gate(now, status_changed);

        if self.reconcile.due(now) {
            self.reconcile_tick();
        }

        let duration = self.duration_ms();
        if duration != self.last_duration {
            self.last_duration = duration;
            self.events.emit(PlaybackEvent::DurationChanged(duration));
        }

        let position = self.position_ms();
        if position != self.last_position {
            self.last_position = position;
            self.events.emit(PlaybackEvent::PositionChanged(position));
            self.update_masking();
        }

        self.emit_play_state();
    }

    fn poll_gate(&mut self, now: u64, early: bool) {
        let Some(gate) = self.gate.as_mut() else {
            return;
        };
        let tick = gate.poll.due(now);
        let deadline_passed = now >= gate.deadline_ms;
        if !(tick || early || deadline_passed) {
            return;
        }

        if !self.needs_gate() {
            self.start_playback();
        } else if deadline_passed {
            tracing::warn!("streams still not ready at the gate deadline, starting playback");
            self.start_playback();
        }
    }

    fn finish_at_end(&mut self) {
        tracing::info!(position_ms = self.position_ms(), "time source reached its end");
        self.stop_all();
        self.events.emit(PlaybackEvent::Ended);
    }

    fn reconcile_tick(&mut self) {
        let Some(master_index) = self.time_source.as_deref().and_then(|id| self.find(id)) else {
            return;
        };
        let master = &self.streams[master_index];
        if !master.player.is_playing() {
            return;
        }

        let target = master.player.position_ms();
        let master_duration = master.duration_ms();
        if master_duration > 0 && target >= master_duration {
            self.finish_at_end();
            return;
        }

        let threshold = self.config.drift_threshold_ms;
        for (index, slot) in self.streams.iter_mut().enumerate() {
            if index == master_index || !slot.player.has_media() {
                continue;
            }
            let own = slot.duration_ms();
            if own > 0 && target > own {
                // masked; nothing to show
                continue;
            }
            let drift = slot.player.position_ms().abs_diff(target);
            if drift > threshold {
                tracing::debug!(
                    stream_id = %slot.stream.stream_id,
                    drift_ms = drift,
                    target_ms = target,
                    "re-syncing drifted stream"
                );
                slot.player.seek(target);
                if !slot.player.is_playing() {
                    slot.player.play();
                }
            }
        }

        self.update_masking();
    }

    /// Recompute which active streams the master has run past.
    fn update_masking(&mut self) {
        let master_position = self.position_ms();
        for slot in &mut self.streams {
            if !self.active_views.iter().any(|v| v == slot.id()) {
                continue;
            }
            let own = slot.duration_ms();
            let exhausted = own > 0 && master_position > own;
            if exhausted != slot.exhausted {
                slot.exhausted = exhausted;
                self.events.emit(PlaybackEvent::StreamMasked {
                    stream_id: slot.stream.stream_id.clone(),
                    exhausted,
                });
            }
        }
    }
}

impl Transport for PlaybackSyncEngine {
    fn is_playing(&self) -> bool {
        PlaybackSyncEngine::is_playing(self)
    }

    fn position_ms(&self) -> u64 {
        PlaybackSyncEngine::position_ms(self)
    }

    fn duration_ms(&self) -> u64 {
        PlaybackSyncEngine::duration_ms(self)
    }

    fn play_all(&mut self) {
        PlaybackSyncEngine::play_all(self)
    }

    fn pause_all(&mut self) {
        PlaybackSyncEngine::pause_all(self)
    }

    fn seek_all(&mut self, position_ms: u64) {
        PlaybackSyncEngine::seek_all(self, position_ms)
    }

    fn time_source(&self) -> Option<String> {
        self.time_source.clone()
    }

    fn audio_source(&self) -> Option<String> {
        self.audio_source.clone()
    }

    fn active_views(&self) -> Vec<String> {
        self.active_views.clone()
    }

    fn fps_for(&self, stream_id: &str) -> f64 {
        PlaybackSyncEngine::fps_for(self, stream_id)
    }

    fn is_at_end(&self) -> bool {
        PlaybackSyncEngine::is_at_end(self)
    }
}
