//! Timeline rendering geometry and interactive interval editing.
//!
//! The controller owns the lane layout of the current records and an
//! optional edit session on one of them. During an edit only the live
//! `(edit_start_ms, edit_end_ms)` pair changes; the record itself is mutated
//! by whoever consumes the [`TimelineEvent::Committed`] event.
//!
//! A drag gesture begins with the first preview ([`TimelineEvent::DragStarted`])
//! and ends after a quiet period without drag steps, or on commit/cancel
//! ([`TimelineEvent::DragEnded`]).

use crate::error::{Error, Result};
use crate::events::{Edge, EventBus, TimelineEvent};
use crate::layout::{self, Interval, LaneOrder, Rect};
use crate::schedule::Debounce;
use crate::types::AnnotationRecord;
use tokio::sync::mpsc::UnboundedReceiver;

/// Pixel (or cell) metrics of the timeline canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineGeometry {
    pub pad_x: i32,
    pub pad_y: i32,
    pub lane_height: i32,
    pub lane_gap: i32,
    pub block_height: i32,
    pub handle_width: i32,
}

impl Default for TimelineGeometry {
    fn default() -> Self {
        Self {
            pad_x: 10,
            pad_y: 10,
            lane_height: 22,
            lane_gap: 6,
            block_height: 18,
            handle_width: 8,
        }
    }
}

impl TimelineGeometry {
    /// One row per lane, no padding; for character-cell front ends.
    pub fn compact(handle_width: i32) -> Self {
        Self {
            pad_x: 0,
            pad_y: 0,
            lane_height: 1,
            lane_gap: 0,
            block_height: 1,
            handle_width: handle_width.max(1),
        }
    }

    fn usable_width(&self, width: i32) -> i32 {
        (width - 2 * self.pad_x).max(1)
    }

    pub fn ms_to_x(&self, ms: u64, duration_ms: u64, width: i32) -> i32 {
        if duration_ms == 0 {
            return self.pad_x;
        }
        let ms = ms.min(duration_ms);
        let w = f64::from(self.usable_width(width));
        self.pad_x + ((ms as f64 / duration_ms as f64) * w).round() as i32
    }

    /// Inverse of [`Self::ms_to_x`], clamped to `[0, duration_ms]`.
    pub fn x_to_ms(&self, x: i32, duration_ms: u64, width: i32) -> u64 {
        if duration_ms == 0 {
            return 0;
        }
        let rel = f64::from(x - self.pad_x) / f64::from(self.usable_width(width));
        let ms = (rel * duration_ms as f64).round();
        if ms <= 0.0 {
            0
        } else {
            (ms as u64).min(duration_ms)
        }
    }

    pub fn lane_top(&self, lane: usize) -> i32 {
        self.pad_y + lane as i32 * (self.lane_height + self.lane_gap)
    }

    /// Height needed for `lanes` lanes (at least one).
    pub fn content_height(&self, lanes: usize) -> i32 {
        let lanes = lanes.max(1) as i32;
        self.pad_y * 2 + lanes * self.lane_height + (lanes - 1) * self.lane_gap
    }

    /// Block rectangle; never narrower than one unit.
    pub fn block_rect(
        &self,
        start_ms: u64,
        end_ms: u64,
        lane: usize,
        duration_ms: u64,
        width: i32,
    ) -> Rect {
        let (start_ms, end_ms) = if end_ms < start_ms {
            (end_ms, start_ms)
        } else {
            (start_ms, end_ms)
        };
        let x1 = self.ms_to_x(start_ms, duration_ms, width);
        let x2 = self.ms_to_x(end_ms, duration_ms, width).max(x1 + 1);
        let y = self.lane_top(lane) + (self.lane_height - self.block_height) / 2;
        Rect::new(x1, y, x2 - x1, self.block_height)
    }

    /// Left and right resize handles at the block edges.
    pub fn handle_rects(&self, block: Rect) -> (Rect, Rect) {
        let left = Rect::new(block.left(), block.y, self.handle_width, block.height);
        let right = Rect::new(
            block.right() - self.handle_width,
            block.y,
            self.handle_width,
            block.height,
        );
        (left, right)
    }
}

/// A laid-out record on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub index: usize,
    pub lane: usize,
    /// Bounds drawn, including live edit values
    pub start_ms: u64,
    pub end_ms: u64,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy)]
struct EditSession {
    index: usize,
    start_ms: u64,
    end_ms: u64,
}

/// Lane layout plus the edit/drag interaction on top of it.
#[derive(Debug)]
pub struct TimelineEditController {
    geometry: TimelineGeometry,
    lane_order: LaneOrder,
    width: i32,
    duration_ms: u64,
    intervals: Vec<Interval>,
    lanes: Vec<Vec<Interval>>,
    selected: Option<usize>,
    editing: Option<EditSession>,
    dragging: Option<Edge>,
    allow_edit: bool,
    gesture_active: bool,
    drag_end: Debounce,
    events: EventBus<TimelineEvent>,
}

impl TimelineEditController {
    pub fn new(geometry: TimelineGeometry, lane_order: LaneOrder, drag_debounce_ms: u64) -> Self {
        Self {
            geometry,
            lane_order,
            width: 600,
            duration_ms: 0,
            intervals: Vec::new(),
            lanes: Vec::new(),
            selected: None,
            editing: None,
            dragging: None,
            allow_edit: true,
            gesture_active: false,
            drag_end: Debounce::new(drag_debounce_ms),
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<TimelineEvent> {
        self.events.subscribe()
    }

    pub fn geometry(&self) -> &TimelineGeometry {
        &self.geometry
    }

    pub fn set_geometry(&mut self, geometry: TimelineGeometry) {
        self.geometry = geometry;
    }

    pub fn set_width(&mut self, width: i32) {
        self.width = width.max(1);
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn set_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Replace the records and recompute lanes.
    ///
    /// An edit or selection whose record no longer exists is dropped silently.
    pub fn set_records(&mut self, records: &[AnnotationRecord]) {
        self.intervals = layout::annotations_to_intervals(records);
        self.lanes = layout::stack(&self.intervals, self.lane_order);

        let count = self.intervals.len();
        if self.selected.is_some_and(|i| i >= count) {
            self.selected = None;
        }
        if self.editing.is_some_and(|e| e.index >= count) {
            self.editing = None;
            self.dragging = None;
        }
    }

    pub fn lanes(&self) -> &[Vec<Interval>] {
        &self.lanes
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn content_height(&self) -> i32 {
        self.geometry.content_height(self.lanes.len())
    }

    /// Enable or disable edit/delete requests (disabled while capturing).
    pub fn set_allow_edit(&mut self, allow: bool) {
        self.allow_edit = allow;
    }

    pub fn allow_edit(&self) -> bool {
        self.allow_edit
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn editing_index(&self) -> Option<usize> {
        self.editing.map(|e| e.index)
    }

    /// Live bounds of the edited record.
    pub fn edit_bounds(&self) -> Option<(u64, u64)> {
        self.editing.map(|e| (e.start_ms, e.end_ms))
    }

    pub fn dragging(&self) -> Option<Edge> {
        self.dragging
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_gesture_active(&self) -> bool {
        self.gesture_active
    }

    /// Blocks to draw, with the edited record at its live bounds.
    pub fn blocks(&self) -> Vec<Block> {
        let mut out = Vec::with_capacity(self.intervals.len());
        for (lane, intervals) in self.lanes.iter().enumerate() {
            for interval in intervals {
                let (mut start_ms, mut end_ms) = match self.editing {
                    Some(e) if e.index == interval.index => (e.start_ms, e.end_ms),
                    _ => (interval.start_ms, interval.end_ms),
                };
                if self.duration_ms > 0 {
                    start_ms = start_ms.min(self.duration_ms);
                    end_ms = end_ms.min(self.duration_ms);
                }
                if end_ms < start_ms {
                    std::mem::swap(&mut start_ms, &mut end_ms);
                }
                let rect =
                    self.geometry
                        .block_rect(start_ms, end_ms, lane, self.duration_ms, self.width);
                out.push(Block {
                    index: interval.index,
                    lane,
                    start_ms,
                    end_ms,
                    rect,
                });
            }
        }
        out
    }

    fn block_for(&self, index: usize) -> Option<Block> {
        self.blocks().into_iter().find(|b| b.index == index)
    }

    /// Record whose block contains the point.
    pub fn hit_block(&self, x: i32, y: i32) -> Option<usize> {
        self.blocks()
            .into_iter()
            .find(|b| b.rect.contains(x, y))
            .map(|b| b.index)
    }

    /// Resize handle of the edited block under the point.
    pub fn hit_handle(&self, x: i32, y: i32) -> Option<Edge> {
        let block = self.block_for(self.editing?.index)?;
        let (left, right) = self.geometry.handle_rects(block.rect);
        if left.contains(x, y) {
            Some(Edge::Left)
        } else if right.contains(x, y) {
            Some(Edge::Right)
        } else {
            None
        }
    }

    /// Select a record (or clear the selection).
    pub fn select(&mut self, index: Option<usize>) {
        self.selected = index.filter(|&i| i < self.intervals.len());
        if let Some(i) = self.selected {
            self.events.emit(TimelineEvent::Selected(i));
        }
    }

    /// Enter edit mode on a record.
    ///
    /// An edit already open on another record is committed first. The first
    /// preview targets the right edge.
    pub fn request_edit(&mut self, index: usize, now_ms: u64) -> Result<()> {
        if !self.allow_edit {
            return Err(Error::CaptureInProgress);
        }
        let Some(interval) = self.intervals.get(index).copied() else {
            return Err(Error::RecordNotFound(index));
        };
        if self.editing.is_some_and(|e| e.index != index) {
            self.commit();
        }

        let interval = interval.normalized();
        self.editing = Some(EditSession {
            index,
            start_ms: interval.start_ms,
            end_ms: interval.end_ms,
        });
        self.dragging = None;
        self.selected = Some(index);
        tracing::debug!(index, "entered edit mode");
        self.preview(Edge::Right, now_ms);
        Ok(())
    }

    /// Ask for a record to be deleted.
    ///
    /// An edit on that record is cancelled. An edit on any other record is
    /// committed first, while its index still names the same record.
    pub fn request_delete(&mut self, index: usize) -> Result<()> {
        if !self.allow_edit {
            return Err(Error::CaptureInProgress);
        }
        if index >= self.intervals.len() {
            return Err(Error::RecordNotFound(index));
        }
        match self.editing_index() {
            Some(editing) if editing == index => self.cancel(),
            Some(_) => {
                self.commit();
            }
            None => {}
        }
        self.events.emit(TimelineEvent::DeleteRequested(index));
        Ok(())
    }

    /// Pointer press at `(x, y)`.
    ///
    /// While editing: a handle starts a drag, the edited block itself is
    /// ignored, anywhere else commits. Otherwise the press selects.
    pub fn press(&mut self, x: i32, y: i32, now_ms: u64) {
        if let Some(edit) = self.editing {
            if let Some(edge) = self.hit_handle(x, y) {
                self.dragging = Some(edge);
                self.preview(edge, now_ms);
                return;
            }
            if self
                .block_for(edit.index)
                .is_some_and(|b| b.rect.contains(x, y))
            {
                return;
            }
            self.commit();
            return;
        }

        let hit = self.hit_block(x, y);
        self.select(hit);
    }

    /// Pointer moved to `x` while pressed.
    pub fn drag_to(&mut self, x: i32, now_ms: u64) {
        let Some(edge) = self.dragging else {
            return;
        };
        let ms = self.geometry.x_to_ms(x, self.duration_ms, self.width);
        self.move_edge(edge, ms, now_ms);
    }

    pub fn release(&mut self) {
        self.dragging = None;
    }

    /// Move one edge of the edited record to `ms`, clamped so the range
    /// never inverts and stays within the timeline.
    pub fn move_edge(&mut self, edge: Edge, ms: u64, now_ms: u64) {
        let Some(edit) = self.editing.as_mut() else {
            return;
        };
        let ms = if self.duration_ms > 0 {
            ms.min(self.duration_ms)
        } else {
            ms
        };
        match edge {
            Edge::Left => edit.start_ms = ms.min(edit.end_ms),
            Edge::Right => edit.end_ms = ms.max(edit.start_ms),
        }
        self.preview(edge, now_ms);
    }

    /// Shift one edge by a signed amount; for keyboard editing.
    pub fn nudge(&mut self, edge: Edge, delta_ms: i64, now_ms: u64) {
        let Some(edit) = self.editing else {
            return;
        };
        let current = match edge {
            Edge::Left => edit.start_ms,
            Edge::Right => edit.end_ms,
        };
        let target = if delta_ms < 0 {
            current.saturating_sub(delta_ms.unsigned_abs())
        } else {
            current.saturating_add(delta_ms as u64)
        };
        self.move_edge(edge, target, now_ms);
    }

    fn preview(&mut self, edge: Edge, now_ms: u64) {
        let Some(edit) = self.editing else {
            return;
        };
        if !self.gesture_active {
            self.gesture_active = true;
            self.events.emit(TimelineEvent::DragStarted);
        }
        self.drag_end.touch(now_ms);
        self.events.emit(TimelineEvent::Preview {
            index: edit.index,
            start_ms: edit.start_ms,
            end_ms: edit.end_ms,
            edge,
        });
    }

    fn end_gesture(&mut self) {
        self.drag_end.cancel();
        if self.gesture_active {
            self.gesture_active = false;
            self.events.emit(TimelineEvent::DragEnded);
        }
    }

    /// Apply the live bounds and leave edit mode.
    pub fn commit(&mut self) -> Option<(usize, u64, u64)> {
        let edit = self.editing.take()?;
        self.dragging = None;
        self.end_gesture();
        tracing::debug!(
            index = edit.index,
            start_ms = edit.start_ms,
            end_ms = edit.end_ms,
            "edit committed"
        );
        self.events.emit(TimelineEvent::Committed {
            index: edit.index,
            start_ms: edit.start_ms,
            end_ms: edit.end_ms,
        });
        Some((edit.index, edit.start_ms, edit.end_ms))
    }

    /// Discard the live bounds and leave edit mode.
    pub fn cancel(&mut self) {
        let Some(edit) = self.editing.take() else {
            return;
        };
        self.dragging = None;
        self.end_gesture();
        self.events
            .emit(TimelineEvent::Cancelled { index: edit.index });
    }

    /// Fire the gesture end once no drag step arrived for the debounce period.
    pub fn poll(&mut self, now_ms: u64) {
        if self.drag_end.fire(now_ms) && self.gesture_active {
            self.gesture_active = false;
            self.events.emit(TimelineEvent::DragEnded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::frames::tests::record;

    fn controller(records: &[AnnotationRecord]) -> TimelineEditController {
        let mut c = TimelineEditController::new(
            TimelineGeometry::default(),
            LaneOrder::ShorterFirst,
            160,
        );
        // 1000 px usable for a 10 s timeline: 1 px per 10 ms
        c.set_width(1_020);
        c.set_duration(10_000);
        c.set_records(records);
        c
    }

    #[test]
    fn test_ms_x_conversion() {
        let g = TimelineGeometry::default();
        assert_eq!(g.ms_to_x(0, 10_000, 1_020), 10);
        assert_eq!(g.ms_to_x(5_000, 10_000, 1_020), 510);
        assert_eq!(g.ms_to_x(20_000, 10_000, 1_020), 1_010);
        assert_eq!(g.ms_to_x(5_000, 0, 1_020), 10);

        assert_eq!(g.x_to_ms(510, 10_000, 1_020), 5_000);
        assert_eq!(g.x_to_ms(-40, 10_000, 1_020), 0);
        assert_eq!(g.x_to_ms(5_000, 10_000, 1_020), 10_000);
    }

    #[test]
    fn test_block_and_handle_geometry() {
        let g = TimelineGeometry::default();
        let rect = g.block_rect(2_000, 3_000, 1, 10_000, 1_020);
        assert_eq!(rect, Rect::new(210, 40, 100, 18));
        let (left, right) = g.handle_rects(rect);
        assert_eq!(left.x, 210);
        assert_eq!(right.x, 302);

        // zero-length intervals stay visible
        let dot = g.block_rect(2_000, 2_000, 0, 10_000, 1_020);
        assert_eq!(dot.width, 1);
        assert_eq!(g.content_height(0), 42);
        assert_eq!(g.content_height(3), 98);
    }

    #[test]
    fn test_click_selects_block() {
        let mut c = controller(&[record(1.0, 2.0), record(1.5, 3.0)]);
        let mut events = c.subscribe();

        c.press(150, 20, 0);
        assert_eq!(c.selected(), Some(0));
        c.press(250, 48, 0);
        assert_eq!(c.selected(), Some(1));
        c.press(900, 20, 0);
        assert_eq!(c.selected(), None);
        assert_eq!(
            drain(&mut events),
            vec![TimelineEvent::Selected(0), TimelineEvent::Selected(1)]
        );
    }

    #[test]
    fn test_edit_drag_preview_and_commit() {
        let mut c = controller(&[record(2.0, 4.0)]);
        let mut events = c.subscribe();

        c.request_edit(0, 0).unwrap();
        assert_eq!(
            drain(&mut events),
            vec![
                TimelineEvent::DragStarted,
                TimelineEvent::Preview {
                    index: 0,
                    start_ms: 2_000,
                    end_ms: 4_000,
                    edge: Edge::Right
                }
            ]
        );

        // grab the left handle and drag it past the right edge
        c.press(212, 20, 10);
        assert_eq!(c.dragging(), Some(Edge::Left));
        c.drag_to(700, 20);
        assert_eq!(c.edit_bounds(), Some((4_000, 4_000)));
        c.drag_to(160, 30);
        assert_eq!(c.edit_bounds(), Some((1_500, 4_000)));
        c.release();

        let previews = drain(&mut events);
        assert!(previews
            .iter()
            .all(|e| matches!(e, TimelineEvent::Preview { edge: Edge::Left, .. })));

        // the record bounds are untouched until commit
        assert_eq!(c.lanes()[0][0].start_ms, 2_000);

        // pressing inside the block keeps editing, outside commits
        c.press(300, 20, 40);
        assert!(c.is_editing());
        c.press(900, 60, 50);
        assert!(!c.is_editing());
        assert_eq!(
            drain(&mut events),
            vec![
                TimelineEvent::DragEnded,
                TimelineEvent::Committed {
                    index: 0,
                    start_ms: 1_500,
                    end_ms: 4_000
                }
            ]
        );
    }

    #[test]
    fn test_right_edge_clamps_to_duration_and_start() {
        let mut c = controller(&[record(2.0, 4.0)]);
        c.request_edit(0, 0).unwrap();
        c.move_edge(Edge::Right, 50_000, 0);
        assert_eq!(c.edit_bounds(), Some((2_000, 10_000)));
        c.move_edge(Edge::Right, 500, 0);
        assert_eq!(c.edit_bounds(), Some((2_000, 2_000)));
        c.nudge(Edge::Left, -5_000, 0);
        assert_eq!(c.edit_bounds(), Some((0, 2_000)));
    }

    #[test]
    fn test_cancel_restores_snapshot() {
        let mut c = controller(&[record(2.0, 4.0)]);
        let mut events = c.subscribe();
        c.request_edit(0, 0).unwrap();
        c.move_edge(Edge::Left, 1_000, 0);
        c.cancel();
        assert!(!c.is_editing());
        assert_eq!(c.blocks()[0].start_ms, 2_000);
        let events = drain(&mut events);
        assert_eq!(
            &events[events.len() - 2..],
            &[TimelineEvent::DragEnded, TimelineEvent::Cancelled { index: 0 }]
        );
    }

    #[test]
    fn test_debounce_ends_gesture_once() {
        let mut c = controller(&[record(2.0, 4.0)]);
        let mut events = c.subscribe();
        c.request_edit(0, 0).unwrap();
        c.move_edge(Edge::Right, 5_000, 100);
        drain(&mut events);

        c.poll(200);
        assert!(c.is_gesture_active());
        c.poll(260);
        assert!(!c.is_gesture_active());
        c.poll(1_000);
        assert_eq!(drain(&mut events), vec![TimelineEvent::DragEnded]);

        // a new drag step opens a new gesture
        c.move_edge(Edge::Right, 6_000, 1_100);
        assert_eq!(drain(&mut events)[0], TimelineEvent::DragStarted);
    }

    #[test]
    fn test_edit_and_delete_refused_while_capturing() {
        let mut c = controller(&[record(2.0, 4.0)]);
        c.set_allow_edit(false);
        assert!(matches!(c.request_edit(0, 0), Err(Error::CaptureInProgress)));
        assert!(matches!(c.request_delete(0), Err(Error::CaptureInProgress)));

        c.set_allow_edit(true);
        assert!(matches!(c.request_edit(3, 0), Err(Error::RecordNotFound(3))));

        let mut events = c.subscribe();
        c.request_edit(0, 0).unwrap();
        c.request_delete(0).unwrap();
        assert!(!c.is_editing());
        assert!(drain(&mut events).contains(&TimelineEvent::DeleteRequested(0)));
    }

    #[test]
    fn test_delete_commits_edit_on_other_record() {
        let mut c = controller(&[record(1.0, 2.0), record(3.0, 4.0), record(8.0, 9.0)]);
        let mut events = c.subscribe();
        c.request_edit(1, 0).unwrap();
        c.move_edge(Edge::Right, 4_500, 0);
        drain(&mut events);

        c.request_delete(0).unwrap();
        assert!(!c.is_editing());
        let events = drain(&mut events);
        assert_eq!(
            events,
            vec![
                TimelineEvent::DragEnded,
                TimelineEvent::Committed {
                    index: 1,
                    start_ms: 3_000,
                    end_ms: 4_500,
                },
                TimelineEvent::DeleteRequested(0),
            ]
        );
    }

    #[test]
    fn test_live_bounds_drive_blocks() {
        let mut c = controller(&[record(2.0, 4.0)]);
        c.request_edit(0, 0).unwrap();
        c.move_edge(Edge::Right, 6_000, 0);
        let block = c.blocks()[0];
        assert_eq!((block.start_ms, block.end_ms), (2_000, 6_000));
        assert_eq!(block.rect.width, 400);

        c.set_records(&[]);
        assert!(!c.is_editing());
    }
}
