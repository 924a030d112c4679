//! Step capture workflow.
//!
//! ```text
//! Idle ─select─▶ CategorySelected ─start─▶ AwaitingStart ─confirm_start─▶ AwaitingEnd
//!                       ▲                                                   │
//!                       └──────── cancel ◀── AwaitingConfirmEnd ◀──end──────┘
//!                                            │
//!                                            └─finish─▶ record emitted, Idle
//! ```
//!
//! Guard violations are returned as errors and leave the machine untouched.

use crate::color::{ColorAssigner, ColorMap, Rgb};
use crate::error::{Error, Result};
use crate::events::{CaptureEvent, EventBus};
use crate::frames::{format_ms, ms_to_seconds, recompute_from_times};
use crate::playback::Transport;
use crate::types::{camera_ids_from_views, AnnotationRecord, Category, DEFAULT_CONFIDENCE};
use tokio::sync::mpsc::UnboundedReceiver;

/// Where the capture workflow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    CategorySelected,
    AwaitingStart,
    AwaitingEnd,
    AwaitingConfirmEnd,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::CategorySelected => "category selected",
            CaptureState::AwaitingStart => "awaiting start",
            CaptureState::AwaitingEnd => "awaiting end",
            CaptureState::AwaitingConfirmEnd => "awaiting finish",
        }
    }
}

/// Self-assessment collected when a step is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// 1-10; out-of-range values are clamped
    pub confidence: u8,
    pub notes: String,
}

impl Default for Assessment {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            notes: String::new(),
        }
    }
}

/// Asks the user for confidence and notes. `None` means the user declined.
pub trait AssessmentPrompt {
    fn assess(&mut self, category: &Category) -> Option<Assessment>;
}

impl<F> AssessmentPrompt for F
where
    F: FnMut(&Category) -> Option<Assessment>,
{
    fn assess(&mut self, category: &Category) -> Option<Assessment> {
        self(category)
    }
}

/// Workflow state between `start` and `finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCapture {
    pub category: Category,
    /// Views visible when the step was started
    pub camera_ids: Vec<String>,
    pub start_ms: Option<u64>,
    pub time_source_id: Option<String>,
    pub audio_source_id: Option<String>,
    pub color: Rgb,
}

/// The in-progress interval, for drawing on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOverlay {
    pub start_ms: u64,
    pub end_ms: u64,
    pub color: Rgb,
}

/// Turns start/end intents into [`AnnotationRecord`]s.
#[derive(Debug)]
pub struct CaptureStateMachine {
    label: String,
    state: CaptureState,
    selected: Option<Category>,
    pending: Option<PendingCapture>,
    was_playing: bool,
    events: EventBus<CaptureEvent>,
}

impl CaptureStateMachine {
    /// New machine for the session `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: CaptureState::Idle,
            selected: None,
            pending: None,
            was_playing: false,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<CaptureEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn selected(&self) -> Option<&Category> {
        self.selected.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingCapture> {
        self.pending.as_ref()
    }

    /// A step is between `start` and `finish`.
    pub fn is_capturing(&self) -> bool {
        self.pending.is_some()
    }

    /// The time source is locked by a confirmed start.
    pub fn is_start_confirmed(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.start_ms.is_some())
    }

    /// Switch to another session, dropping any pending step.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.cancel();
        self.selected = None;
        self.state = CaptureState::Idle;
        self.label = label.into();
        self.emit_step_label();
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            action,
            state: self.state.as_str(),
        }
    }

    /// Record the selected category; `None` clears it.
    pub fn select_category(&mut self, category: Option<Category>) -> Result<()> {
        if !matches!(
            self.state,
            CaptureState::Idle | CaptureState::CategorySelected
        ) {
            return Err(self.invalid("select a category"));
        }
        self.state = if category.is_some() {
            CaptureState::CategorySelected
        } else {
            CaptureState::Idle
        };
        let number = category.as_ref().map(|c| c.number);
        self.selected = category;
        self.events.emit(CaptureEvent::CategorySelected(number));
        Ok(())
    }

    /// Begin a step for the selected category.
    ///
    /// Pauses playback, remembering whether it was playing, and snapshots the
    /// active views. `editing` reports a timeline edit in progress.
    pub fn start(
        &mut self,
        transport: &mut dyn Transport,
        editing: bool,
        assigner: &ColorAssigner,
        colors: &mut ColorMap,
    ) -> Result<()> {
        match self.state {
            CaptureState::Idle => return Err(Error::NoCategorySelected),
            CaptureState::CategorySelected => {}
            _ => return Err(self.invalid("start a step")),
        }
        let Some(category) = self.selected.clone() else {
            return Err(Error::NoCategorySelected);
        };
        if editing {
            return Err(Error::EditInProgress);
        }

        self.was_playing = transport.is_playing();
        transport.pause_all();

        let color = assigner.color_for(Some(category.number), colors);
        self.pending = Some(PendingCapture {
            camera_ids: camera_ids_from_views(&transport.active_views()),
            category,
            start_ms: None,
            time_source_id: None,
            audio_source_id: None,
            color,
        });
        self.state = CaptureState::AwaitingStart;
        tracing::debug!(was_playing = self.was_playing, "step started");
        self.emit_step_label();
        Ok(())
    }

    /// Take the current master position as the step start and lock the
    /// time and audio sources. Returns the start position.
    pub fn confirm_start(&mut self, transport: &mut dyn Transport) -> Result<u64> {
        if self.state != CaptureState::AwaitingStart {
            return Err(self.invalid("confirm the start"));
        }
        let (Some(time_source), Some(audio_source)) =
            (transport.time_source(), transport.audio_source())
        else {
            return Err(Error::MissingSources);
        };
        let Some(pending) = self.pending.as_mut() else {
            return Err(self.invalid("confirm the start"));
        };

        let start_ms = transport.position_ms();
        pending.start_ms = Some(start_ms);
        pending.time_source_id = Some(time_source);
        pending.audio_source_id = Some(audio_source);
        let color = pending.color;

        self.state = CaptureState::AwaitingEnd;
        tracing::debug!(start_ms, "step start confirmed");
        self.events
            .emit(CaptureEvent::StartConfirmed { start_ms, color });
        self.emit_step_label();

        transport.resume_if_allowed(self.was_playing);
        Ok(start_ms)
    }

    /// Stop at the step end so it can be fine-tuned before finishing.
    pub fn end(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.state != CaptureState::AwaitingEnd {
            return Err(self.invalid("end the step"));
        }
        transport.pause_all();
        self.state = CaptureState::AwaitingConfirmEnd;
        self.emit_step_label();
        Ok(())
    }

    /// Emit the record for the current master position as the end.
    ///
    /// Returns `Ok(None)` without any change when the prompt is declined.
    pub fn finish(
        &mut self,
        transport: &mut dyn Transport,
        prompt: &mut dyn AssessmentPrompt,
    ) -> Result<Option<AnnotationRecord>> {
        if self.state != CaptureState::AwaitingConfirmEnd {
            return Err(self.invalid("finish the step"));
        }
        let Some(pending) = self.pending.as_ref() else {
            return Err(self.invalid("finish the step"));
        };
        let (Some(start_ms), Some(time_source), Some(audio_source)) = (
            pending.start_ms,
            pending.time_source_id.clone(),
            pending.audio_source_id.clone(),
        ) else {
            return Err(self.invalid("finish the step"));
        };

        let end_ms = transport.position_ms();
        if end_ms < start_ms {
            return Err(Error::InvalidRange {
                start: ms_to_seconds(start_ms),
                end: ms_to_seconds(end_ms),
            });
        }

        let Some(assessment) = prompt.assess(&pending.category) else {
            tracing::debug!("step finish declined");
            return Ok(None);
        };

        let fps = transport.fps_for(&time_source);
        let draft = AnnotationRecord {
            label: self.label.clone(),
            camera_ids: pending.camera_ids.clone(),
            category_id: pending.category.number,
            category_name: pending.category.name.clone(),
            start_frame: 0,
            end_frame: 0,
            total_frames: 0,
            start_time_s: ms_to_seconds(start_ms),
            end_time_s: ms_to_seconds(end_ms),
            total_time_s: 0.0,
            time_source_id: time_source,
            audio_source_id: audio_source,
            confidence: assessment.confidence.clamp(1, 10),
            notes: assessment.notes,
        };
        let record = recompute_from_times(&draft, fps)?;

        self.pending = None;
        self.selected = None;
        self.state = CaptureState::Idle;
        tracing::info!(
            category = record.category_id,
            start_ms,
            end_ms,
            fps,
            "step recorded"
        );
        self.events.emit(CaptureEvent::RecordEmitted(record.clone()));
        self.events
            .emit(CaptureEvent::StepLabel("Current step: None (record saved)".to_string()));

        transport.resume_if_allowed(self.was_playing);
        self.was_playing = false;
        Ok(Some(record))
    }

    /// Drop the pending step without emitting anything.
    pub fn cancel(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.selected = Some(pending.category);
        self.state = CaptureState::CategorySelected;
        self.was_playing = false;
        tracing::debug!("step cancelled");
        self.events.emit(CaptureEvent::Cancelled);
        self.emit_step_label();
    }

    /// Range to draw for the pending step at master position `master_ms`.
    pub fn pending_overlay(&self, master_ms: u64) -> Option<PendingOverlay> {
        let pending = self.pending.as_ref()?;
        let start_ms = pending.start_ms?;
        Some(PendingOverlay {
            start_ms: start_ms.min(master_ms),
            end_ms: start_ms.max(master_ms),
            color: pending.color,
        })
    }

    /// Workflow hint for the current state.
    pub fn step_label(&self) -> String {
        let Some(pending) = self.pending.as_ref() else {
            return "Current step: None".to_string();
        };
        let step = format!(
            "Current step: {} - {}",
            pending.category.number, pending.category.name
        );
        match (self.state, pending.start_ms) {
            (CaptureState::AwaitingEnd, Some(start)) => format!(
                "{step} | Start at {}. Play to the end of the step, then End.",
                format_ms(start)
            ),
            (CaptureState::AwaitingConfirmEnd, _) => {
                format!("{step} | Adjust the end if needed, then Finish to save.")
            }
            _ => format!("{step} (seek to the start, then Confirm Start)"),
        }
    }

    fn emit_step_label(&mut self) {
        let label = self.step_label();
        self.events.emit(CaptureEvent::StepLabel(label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;

    #[derive(Default)]
    struct FakeTransport {
        playing: bool,
        position_ms: u64,
        duration_ms: u64,
        time_source: Option<String>,
        audio_source: Option<String>,
        views: Vec<String>,
        fps: f64,
        plays: usize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                duration_ms: 60_000,
                time_source: Some("video-1".to_string()),
                audio_source: Some("video-2".to_string()),
                views: vec!["video-2".to_string(), "Video-1".to_string()],
                fps: 30.0,
                ..Default::default()
            }
        }
    }

    impl Transport for FakeTransport {
        fn is_playing(&self) -> bool {
            self.playing
        }
        fn position_ms(&self) -> u64 {
            self.position_ms
        }
        fn duration_ms(&self) -> u64 {
            self.duration_ms
        }
        fn play_all(&mut self) {
            self.playing = true;
            self.plays += 1;
        }
        fn pause_all(&mut self) {
            self.playing = false;
        }
        fn seek_all(&mut self, position_ms: u64) {
            self.position_ms = position_ms;
        }
        fn time_source(&self) -> Option<String> {
            self.time_source.clone()
        }
        fn audio_source(&self) -> Option<String> {
            self.audio_source.clone()
        }
        fn active_views(&self) -> Vec<String> {
            self.views.clone()
        }
        fn fps_for(&self, _stream_id: &str) -> f64 {
            self.fps
        }
        fn is_at_end(&self) -> bool {
            self.duration_ms > 0 && self.position_ms + 2 >= self.duration_ms
        }
    }

    fn accept(confidence: u8) -> impl FnMut(&Category) -> Option<Assessment> {
        move |_| {
            Some(Assessment {
                confidence,
                notes: "clean".to_string(),
            })
        }
    }

    /// Machine in `AwaitingConfirmEnd` for a step started at `start_ms`.
    fn run_to_confirm_end(
        machine: &mut CaptureStateMachine,
        transport: &mut FakeTransport,
        start_ms: u64,
        end_ms: u64,
    ) {
        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        machine
            .select_category(Some(Category::new(3, "Suture")))
            .unwrap();
        machine
            .start(transport, false, &assigner, &mut colors)
            .unwrap();
        transport.seek_all(start_ms);
        machine.confirm_start(transport).unwrap();
        transport.seek_all(end_ms);
        machine.end(transport).unwrap();
    }

    #[test]
    fn test_capture_scenario_produces_frames() {
        let mut machine = CaptureStateMachine::new("session-a");
        let mut transport = FakeTransport::new();
        run_to_confirm_end(&mut machine, &mut transport, 2_000, 5_000);

        let record = machine
            .finish(&mut transport, &mut accept(8))
            .unwrap()
            .unwrap();
        assert_eq!(record.start_frame, 60);
        assert_eq!(record.end_frame, 150);
        assert_eq!(record.total_frames, 90);
        assert!((record.total_time_s - 3.0).abs() < 1e-9);
        assert_eq!(record.label, "session-a");
        assert_eq!(record.category_id, 3);
        assert_eq!(record.category_name, "Suture");
        assert_eq!(record.camera_ids, vec!["video-2", "video-1"]);
        assert_eq!(record.time_source_id, "video-1");
        assert_eq!(record.audio_source_id, "video-2");
        assert_eq!(record.confidence, 8);
        assert_eq!(machine.state(), CaptureState::Idle);
        assert!(machine.pending().is_none());
    }

    #[test]
    fn test_finish_rejects_inverted_range() {
        let mut machine = CaptureStateMachine::new("session-a");
        let mut transport = FakeTransport::new();
        run_to_confirm_end(&mut machine, &mut transport, 5_000, 2_000);

        let err = machine
            .finish(&mut transport, &mut accept(5))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
        assert_eq!(machine.state(), CaptureState::AwaitingConfirmEnd);
        assert!(machine.pending().is_some());

        transport.seek_all(6_000);
        assert!(machine
            .finish(&mut transport, &mut accept(5))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_declined_prompt_changes_nothing() {
        let mut machine = CaptureStateMachine::new("session-a");
        let mut events = machine.subscribe();
        let mut transport = FakeTransport::new();
        run_to_confirm_end(&mut machine, &mut transport, 1_000, 2_000);
        drain(&mut events);

        let mut decline = |_: &Category| -> Option<Assessment> { None };
        assert_eq!(machine.finish(&mut transport, &mut decline).unwrap(), None);
        assert_eq!(machine.state(), CaptureState::AwaitingConfirmEnd);
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_start_guards() {
        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        let mut transport = FakeTransport::new();
        let mut machine = CaptureStateMachine::new("session-a");

        let err = machine
            .start(&mut transport, false, &assigner, &mut colors)
            .unwrap_err();
        assert!(matches!(err, Error::NoCategorySelected));

        machine
            .select_category(Some(Category::new(1, "Incision")))
            .unwrap();
        let err = machine
            .start(&mut transport, true, &assigner, &mut colors)
            .unwrap_err();
        assert!(matches!(err, Error::EditInProgress));
        assert_eq!(machine.state(), CaptureState::CategorySelected);
        assert!(colors.is_empty());
    }

    #[test]
    fn test_wrong_state_calls_are_rejected() {
        let mut transport = FakeTransport::new();
        let mut machine = CaptureStateMachine::new("session-a");

        assert!(matches!(
            machine.confirm_start(&mut transport),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            machine.end(&mut transport),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            machine.finish(&mut transport, &mut accept(5)),
            Err(Error::InvalidTransition { .. })
        ));

        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        machine
            .select_category(Some(Category::new(1, "Incision")))
            .unwrap();
        machine
            .start(&mut transport, false, &assigner, &mut colors)
            .unwrap();
        let err = machine
            .select_category(Some(Category::new(2, "Knot")))
            .unwrap_err();
        assert!(err.is_guard());
        assert_eq!(machine.state(), CaptureState::AwaitingStart);
        assert_eq!(machine.selected().map(|c| c.number), Some(1));
    }

    #[test]
    fn test_confirm_requires_sources() {
        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        let mut transport = FakeTransport::new();
        transport.audio_source = None;
        let mut machine = CaptureStateMachine::new("session-a");
        machine
            .select_category(Some(Category::new(1, "Incision")))
            .unwrap();
        machine
            .start(&mut transport, false, &assigner, &mut colors)
            .unwrap();

        assert!(matches!(
            machine.confirm_start(&mut transport),
            Err(Error::MissingSources)
        ));
        assert_eq!(machine.state(), CaptureState::AwaitingStart);
        assert!(!machine.is_start_confirmed());
    }

    #[test]
    fn test_play_intent_is_restored() {
        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        let mut transport = FakeTransport::new();
        transport.playing = true;
        let mut machine = CaptureStateMachine::new("session-a");
        machine
            .select_category(Some(Category::new(1, "Incision")))
            .unwrap();

        machine
            .start(&mut transport, false, &assigner, &mut colors)
            .unwrap();
        assert!(!transport.playing);
        assert_eq!(colors.get(&1), Some(&0));

        machine.confirm_start(&mut transport).unwrap();
        assert!(transport.playing);
        assert!(machine.is_start_confirmed());

        machine.end(&mut transport).unwrap();
        assert!(!transport.playing);

        // never resume from the end of the media
        transport.seek_all(59_999);
        machine.finish(&mut transport, &mut accept(5)).unwrap();
        assert!(!transport.playing);
        assert_eq!(transport.plays, 1);
    }

    #[test]
    fn test_fps_read_at_finish() {
        let mut machine = CaptureStateMachine::new("session-a");
        let mut transport = FakeTransport::new();
        run_to_confirm_end(&mut machine, &mut transport, 2_000, 4_000);
        transport.fps = 25.0;

        let record = machine
            .finish(&mut transport, &mut accept(5))
            .unwrap()
            .unwrap();
        assert_eq!(record.start_frame, 50);
        assert_eq!(record.end_frame, 100);
    }

    #[test]
    fn test_cancel_keeps_selection() {
        let mut machine = CaptureStateMachine::new("session-a");
        let mut events = machine.subscribe();
        let mut transport = FakeTransport::new();
        run_to_confirm_end(&mut machine, &mut transport, 1_000, 3_000);

        machine.cancel();
        assert_eq!(machine.state(), CaptureState::CategorySelected);
        assert_eq!(machine.selected().map(|c| c.number), Some(3));
        let events = drain(&mut events);
        assert!(events.contains(&CaptureEvent::Cancelled));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CaptureEvent::RecordEmitted(_))));

        machine.set_label("session-b");
        assert_eq!(machine.state(), CaptureState::Idle);
        assert!(machine.selected().is_none());
    }

    #[test]
    fn test_pending_overlay_and_labels() {
        let assigner = ColorAssigner::new();
        let mut colors = ColorMap::new();
        let mut transport = FakeTransport::new();
        let mut machine = CaptureStateMachine::new("session-a");
        assert_eq!(machine.step_label(), "Current step: None");

        machine
            .select_category(Some(Category::new(4, "Knot")))
            .unwrap();
        machine
            .start(&mut transport, false, &assigner, &mut colors)
            .unwrap();
        assert!(machine.pending_overlay(0).is_none());
        assert!(machine.step_label().starts_with("Current step: 4 - Knot"));

        transport.seek_all(61_000);
        machine.confirm_start(&mut transport).unwrap();
        assert!(machine.step_label().contains("Start at 01:01"));

        let overlay = machine.pending_overlay(65_000).unwrap();
        assert_eq!((overlay.start_ms, overlay.end_ms), (61_000, 65_000));
        assert_eq!(overlay.color, assigner.lookup(4, &colors));
    }
}
