//! Lane stacking for possibly-overlapping intervals.
//!
//! Intervals are placed greedily into the first lane whose last interval ends
//! at or before their start, so touching intervals share a lane and genuine
//! overlaps never do. The result depends only on the input values, never on
//! their order.

use crate::types::AnnotationRecord;
use serde::Deserialize;
use std::cmp::Ordering;

/// Ordering among intervals that start at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneOrder {
    /// Shorter intervals take the lower lane
    #[default]
    ShorterFirst,
    /// Longer intervals take the lower lane
    LongerFirst,
}

/// A half-open `[start_ms, end_ms)` interval tagged with its record index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Interval {
    pub fn new(index: usize, start_ms: u64, end_ms: u64) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
        }
    }

    /// Same interval with `start <= end`.
    pub fn normalized(self) -> Self {
        if self.end_ms < self.start_ms {
            Self::new(self.index, self.end_ms, self.start_ms)
        } else {
            self
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// True when the two intervals share more than an endpoint.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }
}

/// Where one interval landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneAssignment {
    pub interval: Interval,
    pub lane: usize,
}

/// Axis-aligned rectangle in front-end units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

fn compare(a: &Interval, b: &Interval, order: LaneOrder) -> Ordering {
    let by_duration = match order {
        LaneOrder::ShorterFirst => a.duration_ms().cmp(&b.duration_ms()),
        LaneOrder::LongerFirst => b.duration_ms().cmp(&a.duration_ms()),
    };
    a.start_ms
        .cmp(&b.start_ms)
        .then(by_duration)
        .then(a.index.cmp(&b.index))
}

/// Stack intervals into non-overlapping lanes.
///
/// Crossed intervals are swapped first. Each lane lists its intervals in
/// placement order.
pub fn stack(intervals: &[Interval], order: LaneOrder) -> Vec<Vec<Interval>> {
    let mut sorted: Vec<Interval> = intervals.iter().map(|i| i.normalized()).collect();
    sorted.sort_by(|a, b| compare(a, b, order));

    let mut lanes: Vec<Vec<Interval>> = Vec::new();
    for interval in sorted {
        let free = lanes.iter_mut().find(|lane| {
            lane.last()
                .map_or(true, |last| last.end_ms <= interval.start_ms)
        });
        match free {
            Some(lane) => lane.push(interval),
            None => lanes.push(vec![interval]),
        }
    }
    lanes
}

/// Flatten lanes into one assignment per interval, ordered by record index.
pub fn assignments(lanes: &[Vec<Interval>]) -> Vec<LaneAssignment> {
    let mut out: Vec<LaneAssignment> = lanes
        .iter()
        .enumerate()
        .flat_map(|(lane, intervals)| {
            intervals
                .iter()
                .map(move |&interval| LaneAssignment { interval, lane })
        })
        .collect();
    out.sort_by_key(|a| a.interval.index);
    out
}

/// Intervals for records, indexed by their position in the slice.
pub fn annotations_to_intervals(records: &[AnnotationRecord]) -> Vec<Interval> {
    records
        .iter()
        .enumerate()
        .map(|(index, rec)| Interval::new(index, rec.start_ms(), rec.end_ms()))
        .collect()
}
