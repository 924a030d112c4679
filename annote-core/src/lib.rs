//! # annote-core
//!
//! Core library for annote - step annotation over synchronized multi-view video.
//!
//! This library provides:
//! - Domain types for streams, categories and annotation records
//! - A playback sync engine keeping N players locked to one time source
//! - The step capture state machine and the timeline edit controller
//! - Lane layout and deterministic category colors
//! - Session folder persistence, configuration and logging
//!
//! ## Architecture
//!
//! Components are leaf-first and talk through typed events:
//! - **Leaves:** [`color`] and [`layout`] are pure functions of their input
//! - **Engines:** [`playback`], [`capture`] and [`timeline`] own their state
//!   and publish notifications on an [`events::EventBus`]
//! - **Coordinator:** [`AnnotationSession`] owns one session and routes events
//!   between the engines, the [`store`] and [`persist`]
//!
//! Nothing spawns threads: the front end calls [`AnnotationSession::poll`]
//! from its own loop and timers run against an injected [`schedule::Clock`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use annote_core::playback::SimulatedBackend;
//! use annote_core::schedule::MonotonicClock;
//! use annote_core::{AnnotationSession, Config};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let clock = Arc::new(MonotonicClock::new());
//! let backend = SimulatedBackend::new(clock.clone());
//! let mut session = AnnotationSession::open(
//!     Path::new("/data/annotations"),
//!     "session-01",
//!     &config,
//!     clock,
//!     Box::new(backend),
//! )
//! .expect("failed to open session");
//! session.play();
//! ```

// Re-export commonly used items at the crate root
pub use color::{ColorAssigner, Rgb};
pub use config::Config;
pub use error::{Error, Result};
pub use events::Warning;
pub use session::AnnotationSession;
pub use store::{AnnotationStore, RecordEdit};
pub use types::*;

// Public modules
pub mod capture;
pub mod color;
pub mod config;
pub mod error;
pub mod events;
pub mod frames;
pub mod layout;
pub mod logging;
pub mod persist;
pub mod playback;
pub mod schedule;
pub mod session;
pub mod store;
pub mod timeline;
pub mod types;
