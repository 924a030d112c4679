//! Typed notifications between the core components and the front end.
//!
//! Each producer owns an [`EventBus`] for its event type. Subscribers hold the
//! receiving half of an unbounded channel and drain it with `try_recv` from the
//! front end's loop, so no async runtime is needed.

use crate::color::Rgb;
use crate::playback::MediaStatus;
use crate::types::AnnotationRecord;
use tokio::sync::mpsc::{self, UnboundedSender};

pub use tokio::sync::mpsc::UnboundedReceiver;

/// Fan-out of events to every live subscriber.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Vec<UnboundedSender<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to all subscribers, pruning closed ones.
    pub fn emit(&mut self, event: E) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Drain everything currently queued on a receiver.
pub fn drain<E>(rx: &mut UnboundedReceiver<E>) -> Vec<E> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

// ============================================
// Playback
// ============================================

/// Notifications published by the playback sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Master (time source) position moved
    PositionChanged(u64),
    /// Master duration changed, including on time-source switch
    DurationChanged(u64),
    /// Master reached its end; all streams were stopped
    Ended,
    /// A stream ran past (or came back within) its own duration
    StreamMasked { stream_id: String, exhausted: bool },
    StatusChanged {
        stream_id: String,
        status: MediaStatus,
    },
    /// Backend reported a frame rate replacing the probed one
    FpsUpdated { stream_id: String, fps: f64 },
    PlayStateChanged(bool),
}

// ============================================
// Capture
// ============================================

/// Notifications published by the capture state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    CategorySelected(Option<i64>),
    /// Workflow hint for the current state
    StepLabel(String),
    /// Start confirmed at this master position
    StartConfirmed { start_ms: u64, color: Rgb },
    RecordEmitted(AnnotationRecord),
    Cancelled,
}

// ============================================
// Timeline
// ============================================

/// Which side of a block is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
}

/// Notifications published by the timeline edit controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// Live bounds during a drag; the record itself is untouched
    Preview {
        index: usize,
        start_ms: u64,
        end_ms: u64,
        edge: Edge,
    },
    /// First preview of a drag gesture
    DragStarted,
    /// Quiet period elapsed after the last drag step
    DragEnded,
    Committed {
        index: usize,
        start_ms: u64,
        end_ms: u64,
    },
    Cancelled { index: usize },
    Selected(usize),
    DeleteRequested(usize),
}

// ============================================
// Warnings
// ============================================

/// Informational conditions surfaced to the user; never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    StreamUnavailable { stream_id: String, reason: String },
    PersistenceFailure(String),
    CategoryMismatch(String),
    /// The view selection was empty or unknown and fell back
    EmptyViewSelection,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::StreamUnavailable { stream_id, reason } => {
                write!(f, "{stream_id} unavailable: {reason}")
            }
            Warning::PersistenceFailure(msg) => write!(f, "autosave failed: {msg}"),
            Warning::CategoryMismatch(msg) => f.write_str(msg),
            Warning::EmptyViewSelection => f.write_str("select at least one view"),
        }
    }
}
