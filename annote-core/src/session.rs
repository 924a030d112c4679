//! One open annotation session.
//!
//! [`AnnotationSession`] owns the playback engine, the capture state machine,
//! the timeline controller and the record store of a session folder, and
//! routes the timeline's notifications between them:
//!
//! - edge previews seek every stream to the dragged edge
//! - a drag gesture pauses once and resumes at its end only if playback was
//!   running when it began
//! - commits and deletions mutate the store and autosave
//!
//! Autosave is best-effort: a failed write is logged and surfaced as a
//! [`Warning::PersistenceFailure`], the in-memory state is kept.

use crate::capture::{AssessmentPrompt, CaptureStateMachine};
use crate::color::{ColorAssigner, Rgb};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{drain, CaptureEvent, Edge, PlaybackEvent, TimelineEvent, Warning};
use crate::persist::{self, RootConfig};
use crate::playback::{MediaBackend, PlaybackSyncEngine, Transport, ViewSelection};
use crate::schedule::Clock;
use crate::store::{AnnotationStore, RecordEdit};
use crate::timeline::{TimelineEditController, TimelineGeometry};
use crate::types::{AnnotationRecord, Category, SessionData, VideoStream, DEFAULT_FPS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Coordinator for one loaded session.
pub struct AnnotationSession {
    root: PathBuf,
    label: String,
    videos: Vec<VideoStream>,
    root_config: RootConfig,
    assigner: ColorAssigner,
    store: AnnotationStore,
    clock: Arc<dyn Clock>,
    engine: PlaybackSyncEngine,
    capture: CaptureStateMachine,
    timeline: TimelineEditController,
    playback_rx: UnboundedReceiver<PlaybackEvent>,
    timeline_rx: UnboundedReceiver<TimelineEvent>,
    warnings: Vec<Warning>,
    /// Play state remembered at the start of a timeline drag
    drag_intent: Option<bool>,
    /// Play state remembered at the start of a scrub
    scrub_intent: Option<bool>,
    mismatch_checked: Option<String>,
}

impl AnnotationSession {
    /// Open `<root>/<label>` and load its streams.
    ///
    /// Missing media and an unreadable root config are not errors: they turn
    /// into warnings (see [`Self::take_warnings`]) and a blank category list.
    pub fn open(
        root: &Path,
        label: &str,
        config: &Config,
        clock: Arc<dyn Clock>,
        backend: Box<dyn MediaBackend>,
    ) -> Result<Self> {
        config.playback.validate()?;
        let mut data = persist::load_session(root, label)?;
        let root_config = RootConfig::load_or_default(root);

        let mut engine =
            PlaybackSyncEngine::new(config.playback.clone(), Arc::clone(&clock), backend);
        let playback_rx = engine.subscribe();

        let mut timeline = TimelineEditController::new(
            TimelineGeometry::compact(config.timeline.handle_width),
            config.timeline.lane_order,
            config.timeline.drag_debounce_ms,
        );
        let timeline_rx = timeline.subscribe();

        let mut session = Self {
            root: root.to_path_buf(),
            label: data.label.clone(),
            videos: data.videos.clone(),
            root_config,
            assigner: ColorAssigner::new(),
            store: AnnotationStore::from_records(std::mem::take(&mut data.annotations)),
            clock,
            engine,
            capture: CaptureStateMachine::new(label),
            timeline,
            playback_rx,
            timeline_rx,
            warnings: Vec::new(),
            drag_intent: None,
            scrub_intent: None,
            mismatch_checked: None,
        };

        let dir = session.session_dir();
        let load_warnings = session.engine.load_streams(&dir, &session.videos);
        session.warnings.extend(load_warnings);
        session.restore_roles(&data);
        session.timeline.set_duration(session.engine.duration_ms());
        session.timeline.set_records(session.store.records());
        session.ensure_colors();
        session.check_category_mismatch();

        tracing::info!(
            label = %session.label,
            streams = session.videos.len(),
            records = session.store.len(),
            "Session opened"
        );
        Ok(session)
    }

    fn restore_roles(&mut self, data: &SessionData) {
        if let Some(id) = data.time_source_id.as_deref() {
            self.engine.set_time_source(id);
        }
        if let Some(id) = data.audio_source_id.as_deref() {
            self.engine.set_audio_source(id);
        }
        if !data.active_view_ids.is_empty() {
            self.engine.set_active_views(&data.active_view_ids);
        }
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self) -> PathBuf {
        persist::session_dir(&self.root, &self.label)
    }

    pub fn videos(&self) -> &[VideoStream] {
        &self.videos
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        self.store.records()
    }

    pub fn categories(&self) -> &[Category] {
        &self.root_config.skills
    }

    pub fn root_config(&self) -> &RootConfig {
        &self.root_config
    }

    pub fn engine(&self) -> &PlaybackSyncEngine {
        &self.engine
    }

    pub fn capture(&self) -> &CaptureStateMachine {
        &self.capture
    }

    pub fn timeline(&self) -> &TimelineEditController {
        &self.timeline
    }

    /// Color of a category as persisted in the root config.
    pub fn category_color(&self, number: i64) -> Rgb {
        self.assigner.lookup(number, &self.root_config.skill_color_map)
    }

    /// Warnings raised since the last call.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Playback notifications (position, end, masking, status).
    ///
    /// Events are delivered while [`Self::poll`] and the transport calls run.
    pub fn subscribe_playback(&mut self) -> UnboundedReceiver<PlaybackEvent> {
        self.engine.subscribe()
    }

    /// Capture notifications (selection, step label, emitted records).
    pub fn subscribe_capture(&mut self) -> UnboundedReceiver<CaptureEvent> {
        self.capture.subscribe()
    }

    fn warn(&mut self, warning: Warning) {
        tracing::warn!(warning = %warning, "session warning");
        self.warnings.push(warning);
    }

    // ============================================
    // Categories
    // ============================================

    /// Make sure every configured and every recorded category has a
    /// persistent color; saves the root config when the map grew.
    fn ensure_colors(&mut self) {
        let before = self.root_config.skill_color_map.len();
        let numbers: Vec<i64> = self
            .root_config
            .skills
            .iter()
            .map(|c| c.number)
            .chain(self.store.records().iter().map(|r| r.category_id))
            .collect();
        for number in numbers {
            self.assigner
                .color_for(Some(number), &mut self.root_config.skill_color_map);
        }
        if self.root_config.skill_color_map.len() != before {
            self.save_root_config();
        }
    }

    fn save_root_config(&mut self) {
        if let Err(e) = self.root_config.save() {
            self.warn(Warning::PersistenceFailure(e.to_string()));
        }
    }

    /// Add or rename a category in the root config.
    pub fn upsert_category(&mut self, category: Category) {
        self.root_config.upsert_category(category);
        self.save_root_config();
        self.ensure_colors();
        self.mismatch_checked = None;
        self.check_category_mismatch();
    }

    /// Warn once per session label about records whose categories do not
    /// match the configured list.
    fn check_category_mismatch(&mut self) {
        if self.mismatch_checked.as_deref() == Some(self.label.as_str()) {
            return;
        }
        self.mismatch_checked = Some(self.label.clone());
        if let Some(mismatch) = self.store.category_mismatch(&self.root_config.skills) {
            self.warn(Warning::CategoryMismatch(mismatch.to_string()));
        }
    }

    // ============================================
    // Transport
    // ============================================

    /// Start playback unless the time source is already at its end.
    pub fn play(&mut self) -> bool {
        if self.engine.is_at_end() {
            return false;
        }
        self.engine.play_all();
        true
    }

    pub fn pause(&mut self) {
        self.engine.pause_all();
    }

    pub fn toggle_play(&mut self) -> bool {
        if self.engine.is_playing() {
            self.pause();
            false
        } else {
            self.play()
        }
    }

    /// Rewind to zero, keeping the play state.
    pub fn restart(&mut self) {
        let was_playing = self.engine.is_playing();
        self.engine.pause_all();
        self.engine.seek_all(0);
        if was_playing {
            self.engine.play_all();
        }
    }

    pub fn seek(&mut self, position_ms: u64) {
        let target = self.clamp_position(position_ms);
        self.engine.seek_all(target);
    }

    pub fn seek_relative(&mut self, delta_ms: i64) {
        let current = self.engine.position_ms();
        let target = if delta_ms < 0 {
            current.saturating_sub(delta_ms.unsigned_abs())
        } else {
            current.saturating_add(delta_ms as u64)
        };
        self.seek(target);
    }

    fn clamp_position(&self, position_ms: u64) -> u64 {
        let duration = self.engine.duration_ms();
        if duration > 0 {
            position_ms.min(duration)
        } else {
            position_ms
        }
    }

    /// Begin a scrub gesture: pause once, remembering the play state.
    pub fn scrub_begin(&mut self) {
        if self.scrub_intent.is_some() {
            return;
        }
        let was_playing = self.engine.is_playing();
        self.scrub_intent = Some(was_playing);
        if was_playing {
            self.engine.pause_all();
        }
    }

    pub fn scrub_to(&mut self, position_ms: u64) {
        self.seek(position_ms);
    }

    /// End a scrub at `position_ms`; playback resumes only if it was running
    /// when the scrub began.
    pub fn scrub_end(&mut self, position_ms: u64) {
        self.seek(position_ms);
        if let Some(was_playing) = self.scrub_intent.take() {
            self.engine.resume_if_allowed(was_playing);
        }
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrub_intent.is_some()
    }

    // ============================================
    // Stream roles
    // ============================================

    /// Switch the clock stream; refused once a step start is confirmed.
    pub fn set_time_source(&mut self, stream_id: &str) -> Result<bool> {
        if self.capture.is_start_confirmed() {
            return Err(Error::SourceLocked);
        }
        let changed = self.engine.set_time_source(stream_id);
        if changed {
            self.timeline.set_duration(self.engine.duration_ms());
        }
        Ok(changed)
    }

    pub fn set_audio_source(&mut self, stream_id: &str) -> bool {
        self.engine.set_audio_source(stream_id)
    }

    pub fn set_active_views<S: AsRef<str>>(&mut self, stream_ids: &[S]) -> ViewSelection {
        let outcome = self.engine.set_active_views(stream_ids);
        if outcome == ViewSelection::FellBack {
            self.warn(Warning::EmptyViewSelection);
        }
        outcome
    }

    /// Add or remove one stream from the rendered set.
    pub fn toggle_view(&mut self, stream_id: &str) -> ViewSelection {
        let mut views = self.engine.active_views().to_vec();
        if let Some(pos) = views.iter().position(|v| v == stream_id) {
            views.remove(pos);
        } else {
            views.push(stream_id.to_string());
        }
        self.set_active_views(&views)
    }

    // ============================================
    // Step capture
    // ============================================

    fn sync_edit_guard(&mut self) {
        self.timeline.set_allow_edit(!self.capture.is_capturing());
    }

    /// Select a configured category by number; `None` clears the selection.
    pub fn select_category(&mut self, number: Option<i64>) -> Result<()> {
        let category = match number {
            Some(n) => Some(
                self.root_config
                    .category(n)
                    .cloned()
                    .ok_or(Error::UnknownCategory(n))?,
            ),
            None => None,
        };
        self.capture.select_category(category)
    }

    pub fn start_step(&mut self) -> Result<()> {
        let before = self.root_config.skill_color_map.len();
        self.capture.start(
            &mut self.engine,
            self.timeline.is_editing(),
            &self.assigner,
            &mut self.root_config.skill_color_map,
        )?;
        if self.root_config.skill_color_map.len() != before {
            self.save_root_config();
        }
        self.sync_edit_guard();
        Ok(())
    }

    pub fn confirm_start(&mut self) -> Result<u64> {
        self.capture.confirm_start(&mut self.engine)
    }

    pub fn end_step(&mut self) -> Result<()> {
        self.capture.end(&mut self.engine)
    }

    /// Finish the step, store the record and autosave. Returns the new
    /// record's index, or `None` when the prompt was declined.
    pub fn finish_step(&mut self, prompt: &mut dyn AssessmentPrompt) -> Result<Option<usize>> {
        let Some(record) = self.capture.finish(&mut self.engine, prompt)? else {
            return Ok(None);
        };
        let index = self.store.push(record);
        self.sync_edit_guard();
        self.records_changed();
        Ok(Some(index))
    }

    pub fn cancel_step(&mut self) {
        self.capture.cancel();
        self.sync_edit_guard();
    }

    // ============================================
    // Record edits
    // ============================================

    fn records_changed(&mut self) {
        self.timeline.set_records(self.store.records());
        self.autosave();
    }

    fn fps_for_record(&self, index: usize) -> f64 {
        self.store
            .get(index)
            .map_or(DEFAULT_FPS, |r| {
                self.engine.fps_for(&r.time_source_id)
            })
    }

    /// Apply a table edit to a record; the record is unchanged on error.
    pub fn edit_record(&mut self, index: usize, edit: RecordEdit) -> Result<()> {
        let fps = self.fps_for_record(index);
        self.store
            .apply_edit(index, edit, &self.root_config.skills, fps)?;
        self.records_changed();
        Ok(())
    }

    pub fn select_record(&mut self, index: Option<usize>) {
        self.timeline.select(index);
        self.dispatch_timeline();
    }

    pub fn request_edit(&mut self, index: usize) -> Result<()> {
        let now = self.clock.now_ms();
        let result = self.timeline.request_edit(index, now);
        self.dispatch_timeline();
        result
    }

    pub fn request_delete(&mut self, index: usize) -> Result<()> {
        let result = self.timeline.request_delete(index);
        self.dispatch_timeline();
        result
    }

    pub fn commit_edit(&mut self) {
        self.timeline.commit();
        self.dispatch_timeline();
    }

    pub fn cancel_edit(&mut self) {
        self.timeline.cancel();
        self.dispatch_timeline();
    }

    pub fn nudge_edge(&mut self, edge: Edge, delta_ms: i64) {
        let now = self.clock.now_ms();
        self.timeline.nudge(edge, delta_ms, now);
        self.dispatch_timeline();
    }

    /// Resize the timeline canvas (in front-end units).
    pub fn set_timeline_width(&mut self, width: i32) {
        self.timeline.set_width(width);
    }

    pub fn timeline_press(&mut self, x: i32, y: i32) {
        let now = self.clock.now_ms();
        self.timeline.press(x, y, now);
        self.dispatch_timeline();
    }

    pub fn timeline_drag(&mut self, x: i32) {
        let now = self.clock.now_ms();
        self.timeline.drag_to(x, now);
        self.dispatch_timeline();
    }

    pub fn timeline_release(&mut self) {
        self.timeline.release();
        self.dispatch_timeline();
    }

    fn dispatch_timeline(&mut self) {
        for event in drain(&mut self.timeline_rx) {
            match event {
                TimelineEvent::Preview {
                    start_ms,
                    end_ms,
                    edge,
                    ..
                } => {
                    let target = match edge {
                        Edge::Left => start_ms,
                        Edge::Right => end_ms,
                    };
                    self.seek(target);
                }
                TimelineEvent::DragStarted => {
                    if self.drag_intent.is_none() {
                        let was_playing = self.engine.is_playing();
                        self.drag_intent = Some(was_playing);
                        if was_playing {
                            self.engine.pause_all();
                        }
                    }
                }
                TimelineEvent::DragEnded => {
                    if let Some(was_playing) = self.drag_intent.take() {
                        self.engine.resume_if_allowed(was_playing);
                    }
                }
                TimelineEvent::Committed {
                    index,
                    start_ms,
                    end_ms,
                } => {
                    let fps = self.fps_for_record(index);
                    match self.store.apply_span(index, start_ms, end_ms, fps) {
                        Ok(_) => self.records_changed(),
                        Err(e) => {
                            tracing::warn!(index, error = %e, "edit commit rejected");
                            self.timeline.set_records(self.store.records());
                        }
                    }
                }
                TimelineEvent::Cancelled { .. } => {
                    self.timeline.set_records(self.store.records());
                }
                TimelineEvent::DeleteRequested(index) => {
                    if self.capture.is_capturing() {
                        tracing::debug!(index, "delete refused during capture");
                        continue;
                    }
                    match self.store.remove(index) {
                        Ok(removed) => {
                            tracing::info!(
                                index,
                                category = removed.category_id,
                                "record deleted"
                            );
                            match self.timeline.selected() {
                                Some(s) if s == index => self.timeline.select(None),
                                Some(s) if s > index => self.timeline.select(Some(s - 1)),
                                _ => {}
                            }
                            self.records_changed();
                        }
                        Err(e) => tracing::warn!(index, error = %e, "delete failed"),
                    }
                }
                TimelineEvent::Selected(_) => {}
            }
        }
    }

    // ============================================
    // Loop integration
    // ============================================

    /// Drive timers and observe players; call from the front-end loop.
    pub fn poll(&mut self) {
        self.engine.poll();
        for event in drain(&mut self.playback_rx) {
            if let PlaybackEvent::DurationChanged(duration) = event {
                self.timeline.set_duration(duration);
            }
        }

        let now = self.clock.now_ms();
        self.timeline.poll(now);
        self.dispatch_timeline();
    }

    fn snapshot(&self) -> SessionData {
        SessionData {
            label: self.label.clone(),
            videos: self.videos.clone(),
            annotations: self.store.records().to_vec(),
            active_view_ids: self.engine.active_views().to_vec(),
            time_source_id: self.engine.time_source().map(str::to_string),
            audio_source_id: self.engine.audio_source().map(str::to_string),
        }
    }

    /// Write the session folder now.
    pub fn save(&self) -> Result<()> {
        persist::save_session(&self.root, &self.snapshot())
    }

    fn autosave(&mut self) {
        if let Err(e) = self.save() {
            self.warn(Warning::PersistenceFailure(e.to_string()));
        }
    }

    /// Cancel pending work, save and release every stream.
    pub fn close(&mut self) {
        self.capture.cancel();
        self.sync_edit_guard();
        self.timeline.cancel();
        self.dispatch_timeline();
        self.drag_intent = None;
        self.scrub_intent = None;
        self.autosave();
        self.engine.unload();
        tracing::info!(label = %self.label, "Session closed");
    }
}
