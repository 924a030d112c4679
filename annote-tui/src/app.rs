//! Application state for the TUI.

use annote_core::capture::{Assessment, CaptureState};
use annote_core::events::{drain, CaptureEvent, Edge, PlaybackEvent, UnboundedReceiver};
use annote_core::{AnnotationSession, Category, Warning, DEFAULT_CONFIDENCE};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use ratatui::widgets::{ListState, TableState};

/// Arrow-key seek step.
const SEEK_STEP_MS: i64 = 5_000;
/// Edge nudge step while editing; shift uses the fast step.
const NUDGE_STEP_MS: i64 = 100;
const NUDGE_FAST_STEP_MS: i64 = 1_000;
/// How many warnings stay visible.
const MAX_WARNINGS: usize = 3;

/// Current input mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Normal,
    /// Collecting confidence and notes for the step being finished
    Assess { confidence: u8, notes: String },
}

/// One line of feedback in the status bar.
#[derive(Debug, Clone)]
pub struct Status {
    pub text: String,
    pub is_error: bool,
}

/// What the left mouse button is currently holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MouseTarget {
    Timeline,
    Scrub,
}

/// Main application state.
pub struct App {
    pub session: AnnotationSession,
    pub mode: Mode,
    /// Highlighted entry of the category list
    pub category_state: ListState,
    /// Selected row of the record table
    pub record_state: TableState,
    /// Highlighted entry of the stream panel
    pub stream_cursor: usize,
    /// Edge moved by the arrow keys while editing
    pub active_edge: Edge,
    pub status: Option<Status>,
    /// Most recent warnings, oldest first
    pub warnings: Vec<String>,
    /// Timeline lane area from the last render
    pub timeline_area: Rect,
    /// Scrub bar area from the last render
    pub scrub_area: Rect,
    mouse_target: Option<MouseTarget>,
    playback_events: UnboundedReceiver<PlaybackEvent>,
    capture_events: UnboundedReceiver<CaptureEvent>,
    pub should_quit: bool,
}

impl App {
    pub fn new(mut session: AnnotationSession) -> Self {
        let playback_events = session.subscribe_playback();
        let capture_events = session.subscribe_capture();
        let mut category_state = ListState::default();
        if !session.categories().is_empty() {
            category_state.select(Some(0));
        }
        let mut app = Self {
            session,
            mode: Mode::Normal,
            category_state,
            record_state: TableState::default(),
            stream_cursor: 0,
            active_edge: Edge::Left,
            status: None,
            warnings: Vec::new(),
            timeline_area: Rect::default(),
            scrub_area: Rect::default(),
            mouse_target: None,
            playback_events,
            capture_events,
            should_quit: false,
        };
        app.collect_warnings();
        app
    }

    /// Drive timers and pick up anything the session reported.
    pub fn tick(&mut self) {
        self.session.poll();
        self.collect_warnings();
        self.handle_session_events();

        // block clicks select records too
        if let Some(index) = self.session.timeline().selected() {
            self.record_state.select(Some(index));
        }
        let len = self.session.records().len();
        if self.record_state.selected().is_some_and(|i| i >= len) {
            self.record_state.select(len.checked_sub(1));
        }
    }

    /// Stop playback and flush the annotation table.
    pub fn close(&mut self) {
        self.session.close();
    }

    fn handle_session_events(&mut self) {
        for event in drain(&mut self.playback_events) {
            match event {
                PlaybackEvent::Ended => self.info("Reached the end; press r to restart"),
                PlaybackEvent::StreamMasked {
                    stream_id,
                    exhausted: true,
                } => self.info(format!("{stream_id} has no more footage")),
                _ => {}
            }
        }
        for event in drain(&mut self.capture_events) {
            match event {
                CaptureEvent::RecordEmitted(record) => {
                    let index = self.session.records().len().saturating_sub(1);
                    self.record_state.select(Some(index));
                    self.info(format!(
                        "Saved record {}: {}",
                        index + 1,
                        record.category_name
                    ));
                }
                CaptureEvent::Cancelled => self.info("Step cancelled"),
                _ => {}
            }
        }
    }

    fn collect_warnings(&mut self) {
        for warning in self.session.take_warnings() {
            tracing::warn!(%warning, "session warning");
            self.push_warning(&warning);
        }
    }

    fn push_warning(&mut self, warning: &Warning) {
        self.warnings.push(warning.to_string());
        if self.warnings.len() > MAX_WARNINGS {
            let excess = self.warnings.len() - MAX_WARNINGS;
            self.warnings.drain(..excess);
        }
    }

    fn info(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            is_error: false,
        });
    }

    fn error(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            is_error: true,
        });
    }

    /// Category under the list cursor.
    pub fn highlighted_category(&self) -> Option<&Category> {
        self.category_state
            .selected()
            .and_then(|i| self.session.categories().get(i))
    }

    // ============================================
    // Keyboard
    // ============================================

    /// Handle keyboard input.
    pub fn handle_key(&mut self, key: KeyEvent) {
        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Assess { .. } => self.handle_assess_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        let editing = self.session.timeline().is_editing();
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }

            // Transport
            KeyCode::Char(' ') => {
                if !self.session.toggle_play() && !self.session.engine().is_playing() {
                    self.info("At the end; press r to restart");
                }
            }
            KeyCode::Char('r') => self.session.restart(),
            KeyCode::Left | KeyCode::Right => {
                let sign = if key.code == KeyCode::Left { -1 } else { 1 };
                if editing {
                    let step = if key.modifiers.contains(KeyModifiers::SHIFT) {
                        NUDGE_FAST_STEP_MS
                    } else {
                        NUDGE_STEP_MS
                    };
                    self.session.nudge_edge(self.active_edge, sign * step);
                } else {
                    self.session.seek_relative(sign * SEEK_STEP_MS);
                }
            }

            // Categories
            KeyCode::Up => self.move_category(-1),
            KeyCode::Down => self.move_category(1),
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                if index < self.session.categories().len() {
                    self.category_state.select(Some(index));
                    self.select_highlighted();
                }
            }

            // Capture
            KeyCode::Char('s') => self.start_step(),
            KeyCode::Char('c') => match self.session.confirm_start() {
                Ok(start_ms) => self.info(format!(
                    "Start confirmed at {}",
                    annote_core::frames::format_ms_precise(start_ms)
                )),
                Err(e) => self.error(e.to_string()),
            },
            KeyCode::Char('e') => {
                if let Err(e) = self.session.end_step() {
                    self.error(e.to_string());
                }
            }
            KeyCode::Char('f') => {
                if self.session.capture().state() == CaptureState::AwaitingConfirmEnd {
                    self.mode = Mode::Assess {
                        confidence: DEFAULT_CONFIDENCE,
                        notes: String::new(),
                    };
                } else {
                    self.error("Press e to end the step before finishing");
                }
            }
            KeyCode::Char('x') => {
                if self.session.capture().is_capturing() {
                    self.session.cancel_step();
                }
            }

            // Streams
            KeyCode::Char('[') => self.move_stream(-1),
            KeyCode::Char(']') => self.move_stream(1),
            KeyCode::Char('t') => self.cycle_time_source(),
            KeyCode::Char('a') => self.cycle_audio_source(),
            KeyCode::Char('v') => self.toggle_view(),

            // Records
            KeyCode::Char('j') => self.move_record(1),
            KeyCode::Char('k') => self.move_record(-1),
            KeyCode::Char('E') => {
                if let Some(index) = self.record_state.selected() {
                    self.active_edge = Edge::Left;
                    if let Err(e) = self.session.request_edit(index) {
                        self.error(e.to_string());
                    }
                }
            }
            KeyCode::Tab if editing => {
                self.active_edge = match self.active_edge {
                    Edge::Left => Edge::Right,
                    Edge::Right => Edge::Left,
                };
            }
            KeyCode::Enter if editing => {
                self.session.commit_edit();
                self.info("Edit saved");
            }
            KeyCode::Esc if editing => {
                self.session.cancel_edit();
                self.info("Edit cancelled");
            }
            KeyCode::Char('d') => {
                if let Some(index) = self.record_state.selected() {
                    match self.session.request_delete(index) {
                        Ok(()) => self.info(format!("Delete requested for record {}", index + 1)),
                        Err(e) => self.error(e.to_string()),
                    }
                }
            }
            KeyCode::Char('w') => match self.session.save() {
                Ok(()) => self.info("Saved"),
                Err(e) => self.error(format!("Save failed: {e}")),
            },
            _ => {}
        }
    }

    fn handle_assess_key(&mut self, key: KeyEvent) {
        let Mode::Assess { confidence, notes } = &mut self.mode else {
            return;
        };
        match key.code {
            KeyCode::Up | KeyCode::Right => *confidence = (*confidence + 1).min(10),
            KeyCode::Down | KeyCode::Left => *confidence = confidence.saturating_sub(1).max(1),
            KeyCode::Backspace => {
                notes.pop();
            }
            KeyCode::Char(c) => notes.push(c),
            KeyCode::Esc => {
                self.mode = Mode::Normal;
                self.info("Finish postponed; press f to try again");
            }
            KeyCode::Enter => {
                let assessment = Assessment {
                    confidence: *confidence,
                    notes: notes.trim().to_string(),
                };
                self.mode = Mode::Normal;
                self.finish_step(assessment);
            }
            _ => {}
        }
    }

    fn finish_step(&mut self, assessment: Assessment) {
        let mut prompt = move |_: &Category| -> Option<Assessment> { Some(assessment.clone()) };
        // the saved record is reported through the capture events
        if let Err(e) = self.session.finish_step(&mut prompt) {
            self.error(e.to_string());
        }
    }

    fn start_step(&mut self) {
        if matches!(
            self.session.capture().state(),
            CaptureState::Idle | CaptureState::CategorySelected
        ) {
            self.select_highlighted();
        }
        if let Err(e) = self.session.start_step() {
            self.error(e.to_string());
        }
    }

    fn select_highlighted(&mut self) {
        let number = self.highlighted_category().map(|c| c.number);
        if let Err(e) = self.session.select_category(number) {
            self.error(e.to_string());
        }
    }

    fn move_category(&mut self, delta: isize) {
        let len = self.session.categories().len();
        if let Some(index) = step_index(self.category_state.selected(), delta, len) {
            self.category_state.select(Some(index));
            if !self.session.capture().is_capturing() {
                self.select_highlighted();
            }
        }
    }

    fn move_record(&mut self, delta: isize) {
        let len = self.session.records().len();
        if let Some(index) = step_index(self.record_state.selected(), delta, len) {
            self.record_state.select(Some(index));
            self.session.select_record(Some(index));
        }
    }

    fn move_stream(&mut self, delta: isize) {
        let len = self.session.engine().stream_ids().len();
        if let Some(index) = step_index(Some(self.stream_cursor), delta, len) {
            self.stream_cursor = index;
        }
    }

    fn cycle_time_source(&mut self) {
        let ids = self.session.engine().stream_ids();
        let Some(next) = next_after(&ids, self.session.engine().time_source()) else {
            return;
        };
        match self.session.set_time_source(&next) {
            Ok(true) => self.info(format!("Time source: {next}")),
            Ok(false) => self.error(format!("{next} cannot be the time source")),
            Err(e) => self.error(e.to_string()),
        }
    }

    fn cycle_audio_source(&mut self) {
        let ids = self.session.engine().stream_ids();
        let Some(next) = next_after(&ids, self.session.engine().audio_source()) else {
            return;
        };
        if self.session.set_audio_source(&next) {
            self.info(format!("Audio source: {next}"));
        }
    }

    fn toggle_view(&mut self) {
        let ids = self.session.engine().stream_ids();
        // an empty selection falls back and is reported as a warning
        if let Some(id) = ids.get(self.stream_cursor) {
            self.session.toggle_view(id);
        }
    }

    // ============================================
    // Mouse
    // ============================================

    /// Handle mouse input on the timeline and the scrub bar.
    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some((x, y)) = local_position(self.timeline_area, mouse.column, mouse.row) {
                    self.mouse_target = Some(MouseTarget::Timeline);
                    self.session.timeline_press(x, y);
                } else if let Some((x, _)) =
                    local_position(self.scrub_area, mouse.column, mouse.row)
                {
                    self.mouse_target = Some(MouseTarget::Scrub);
                    self.session.scrub_begin();
                    let ms = self.scrub_ms(x);
                    self.session.scrub_to(ms);
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => match self.mouse_target {
                Some(MouseTarget::Timeline) => {
                    let x = i32::from(mouse.column) - i32::from(self.timeline_area.x);
                    self.session.timeline_drag(x);
                }
                Some(MouseTarget::Scrub) => {
                    let x = i32::from(mouse.column) - i32::from(self.scrub_area.x);
                    let ms = self.scrub_ms(x);
                    self.session.scrub_to(ms);
                }
                None => {}
            },
            MouseEventKind::Up(MouseButton::Left) => match self.mouse_target.take() {
                Some(MouseTarget::Timeline) => self.session.timeline_release(),
                Some(MouseTarget::Scrub) => {
                    let x = i32::from(mouse.column) - i32::from(self.scrub_area.x);
                    let ms = self.scrub_ms(x);
                    self.session.scrub_end(ms);
                }
                None => {}
            },
            _ => {}
        }
    }

    /// Map a scrub bar column to a master position.
    fn scrub_ms(&self, x: i32) -> u64 {
        let duration = self.session.engine().duration_ms();
        self.session
            .timeline()
            .geometry()
            .x_to_ms(x, duration, i32::from(self.scrub_area.width))
    }
}

/// Position relative to `area`, if the cell lies inside it.
fn local_position(area: Rect, column: u16, row: u16) -> Option<(i32, i32)> {
    let inside = column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height);
    inside.then(|| {
        (
            i32::from(column - area.x),
            i32::from(row - area.y),
        )
    })
}

/// Move a cursor by `delta` within `0..len`, starting at the first entry.
fn step_index(current: Option<usize>, delta: isize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let next = match current {
        Some(i) => (i as isize + delta).clamp(0, len as isize - 1) as usize,
        None => 0,
    };
    Some(next)
}

/// The id after `current` in `ids`, wrapping around.
fn next_after(ids: &[String], current: Option<&str>) -> Option<String> {
    let position = current.and_then(|c| ids.iter().position(|id| id == c));
    let next = match position {
        Some(i) => (i + 1) % ids.len(),
        None => 0,
    };
    ids.get(next).cloned()
}
