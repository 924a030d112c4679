//! Integration tests for annote sessions
//!
//! These tests drive [`AnnotationSession`] end to end against the simulated
//! media backend and a manual clock, with session folders in temp dirs.
//! `tests/fixtures/legacy/` holds an annotation table written by an older
//! version of the tool.

use annote_core::capture::Assessment;
use annote_core::persist::{self, RootConfig};
use annote_core::playback::SimulatedBackend;
use annote_core::schedule::ManualClock;
use annote_core::{AnnotationSession, Category, Config, VideoStream, Warning};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Write a session folder with empty media files and probed durations.
fn write_session(root: &Path, label: &str, durations: &[u64]) {
    let dir = persist::session_dir(root, label);
    std::fs::create_dir_all(&dir).unwrap();
    let videos: Vec<VideoStream> = durations
        .iter()
        .enumerate()
        .map(|(i, duration)| {
            let id = format!("video-{}", i + 1);
            std::fs::write(dir.join(format!("{id}.mp4")), b"").unwrap();
            VideoStream::local(id.clone(), format!("{id}.mp4")).with_probe(*duration, 30.0)
        })
        .collect();
    persist::save_session_meta(&dir, label, &videos).unwrap();
}

fn write_categories(root: &Path) {
    let mut cfg = RootConfig::new(root);
    cfg.upsert_category(Category::new(1, "Incision"));
    cfg.upsert_category(Category::new(2, "Suture"));
    cfg.save().unwrap();
}

fn open(root: &Path, label: &str, clock: &ManualClock, load_delay_ms: u64) -> AnnotationSession {
    let backend = SimulatedBackend::new(Arc::new(clock.clone())).with_load_delay(load_delay_ms);
    AnnotationSession::open(
        root,
        label,
        &Config::default(),
        Arc::new(clock.clone()),
        Box::new(backend),
    )
    .expect("session should open")
}

fn capture(session: &mut AnnotationSession, category: i64, start_ms: u64, end_ms: u64) {
    session.select_category(Some(category)).unwrap();
    session.start_step().unwrap();
    session.seek(start_ms);
    session.confirm_start().unwrap();
    session.end_step().unwrap();
    session.seek(end_ms);
    let mut prompt = |_: &Category| -> Option<Assessment> { Some(Assessment::default()) };
    session
        .finish_step(&mut prompt)
        .unwrap()
        .expect("prompt accepted");
}

// ============================================
// Loading
// ============================================

#[test]
fn test_legacy_table_loads_and_warns_about_categories() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("legacy");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::copy(fixture_path("legacy/label.tsv"), dir.join("label.tsv")).unwrap();
    std::fs::write(dir.join("video-1.mp4"), b"").unwrap();
    std::fs::write(dir.join("video-2.mp4"), b"").unwrap();
    write_categories(root.path());

    let clock = ManualClock::new();
    let mut session = open(root.path(), "legacy", &clock, 0);

    // the row with a non-numeric step number is skipped
    let records = session.records();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].notes, "first\nsecond");
    assert_eq!(
        records[0].camera_ids,
        vec!["video-1".to_string(), "video-2".to_string()]
    );
    // short row: missing totals are derived, confidence defaults
    assert!((records[2].total_time_s - 2.0).abs() < 1e-9);
    assert_eq!(records[2].confidence, 5);

    let warnings = session.take_warnings();
    let mismatch: Vec<&Warning> = warnings
        .iter()
        .filter(|w| matches!(w, Warning::CategoryMismatch(_)))
        .collect();
    assert_eq!(mismatch.len(), 1);
    assert!(mismatch[0].to_string().contains("9: Drain"));

    // recorded-only categories still get a persistent color
    let saved = RootConfig::load(root.path()).unwrap();
    assert!(saved.skill_color_map.contains_key(&9));
    assert_eq!(saved.skills.len(), 2);
}

#[test]
fn test_missing_media_is_a_warning() {
    let root = TempDir::new().unwrap();
    write_session(root.path(), "s1", &[10_000, 8_000]);
    std::fs::remove_file(root.path().join("s1/video-2.mp4")).unwrap();

    let clock = ManualClock::new();
    let mut session = open(root.path(), "s1", &clock, 0);
    let warnings = session.take_warnings();
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::StreamUnavailable { stream_id, .. } if stream_id == "video-2")));

    assert!(session.play());
    clock.advance(1_000);
    session.poll();
    assert!(session.engine().is_playing());
    assert_eq!(session.engine().position_ms(), 1_000);
}

// ============================================
// Playback
// ============================================

#[test]
fn test_three_stream_masking() {
    let root = TempDir::new().unwrap();
    write_session(root.path(), "s1", &[10_000, 8_000, 12_000]);
    let clock = ManualClock::new();
    let mut session = open(root.path(), "s1", &clock, 0);
    session.set_active_views(&["video-1", "video-2", "video-3"]);

    session.seek(9_000);
    assert!(!session.engine().is_exhausted("video-1"));
    assert!(session.engine().is_exhausted("video-2"));
    assert!(!session.engine().is_exhausted("video-3"));

    session.seek(7_000);
    assert!(!session.engine().is_exhausted("video-2"));
}

#[test]
fn test_play_waits_for_loading_streams() {
    let root = TempDir::new().unwrap();
    write_session(root.path(), "s1", &[10_000]);
    let clock = ManualClock::new();
    let mut session = open(root.path(), "s1", &clock, 500);

    assert!(session.play());
    assert!(session.engine().is_play_pending());
    for _ in 0..12 {
        clock.advance(50);
        session.poll();
    }
    assert!(!session.engine().is_play_pending());
    assert!(session.engine().is_playing());
}

// ============================================
// Capture and persistence
// ============================================

#[test]
fn test_records_survive_reopen_with_same_lanes() {
    let root = TempDir::new().unwrap();
    write_session(root.path(), "s1", &[20_000]);
    write_categories(root.path());
    let clock = ManualClock::new();

    let mut session = open(root.path(), "s1", &clock, 0);
    capture(&mut session, 1, 1_000, 6_000);
    capture(&mut session, 2, 4_000, 9_000);
    capture(&mut session, 1, 6_000, 7_000);
    assert_eq!(session.timeline().lane_count(), 2);
    let records = session.records().to_vec();
    let color = session.category_color(2);
    session.close();

    let reopened = open(root.path(), "s1", &clock, 0);
    assert_eq!(reopened.records(), records.as_slice());
    assert_eq!(reopened.timeline().lanes(), session.timeline().lanes());
    assert_eq!(reopened.category_color(2), color);
}

#[test]
fn test_autosave_failure_keeps_record_in_memory() {
    let root = TempDir::new().unwrap();
    write_session(root.path(), "s1", &[10_000]);
    write_categories(root.path());
    let clock = ManualClock::new();
    let mut session = open(root.path(), "s1", &clock, 0);
    session.take_warnings();

    // replace the session folder with a plain file
    std::fs::remove_dir_all(root.path().join("s1")).unwrap();
    std::fs::write(root.path().join("s1"), b"").unwrap();

    capture(&mut session, 1, 1_000, 2_000);
    assert_eq!(session.records().len(), 1);
    assert!(session
        .take_warnings()
        .iter()
        .any(|w| matches!(w, Warning::PersistenceFailure(_))));
}

#[test]
fn test_config_file_tunes_session() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[timeline]\nlane_order = \"longer_first\"\n\n[playback]\ndrift_threshold_ms = 50\n",
    )
    .unwrap();
    let config = Config::load_from(&config_path).unwrap();
    assert_eq!(config.playback.drift_threshold_ms, 50);

    let root = temp.path().join("data");
    write_session(&root, "s1", &[10_000]);
    let clock = ManualClock::new();
    let backend = SimulatedBackend::new(Arc::new(clock.clone()));
    let session = AnnotationSession::open(
        &root,
        "s1",
        &config,
        Arc::new(clock.clone()),
        Box::new(backend),
    )
    .unwrap();
    assert_eq!(session.engine().config().drift_threshold_ms, 50);
}
