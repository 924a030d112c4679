//! Time/frame conversion and the record recompute rule.
//!
//! Every edit of a record goes through [`recompute_from_times`] or
//! [`recompute_from_frames`], so the frame fields and the time fields can never
//! drift apart.

use crate::error::{Error, Result};
use crate::types::{effective_fps, AnnotationRecord};

/// `mm:ss` for a millisecond position.
pub fn format_ms(ms: u64) -> String {
    let total_s = ms / 1000;
    format!("{:02}:{:02}", total_s / 60, total_s % 60)
}

/// `mm:ss.mmm` for a millisecond position.
pub fn format_ms_precise(ms: u64) -> String {
    let total_s = ms / 1000;
    format!("{:02}:{:02}.{:03}", total_s / 60, total_s % 60, ms % 1000)
}

pub fn seconds_to_frames(seconds: f64, fps: f64) -> i64 {
    (seconds * effective_fps(fps)).round() as i64
}

pub fn frames_to_seconds(frames: i64, fps: f64) -> f64 {
    frames as f64 / effective_fps(fps)
}

pub fn ms_to_seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Recompute frames and totals from `start_time_s` / `end_time_s`.
///
/// Negative times clamp to zero. Fails with [`Error::InvalidRange`] when the
/// end lies before the start; the caller decides whether swapping is allowed.
pub fn recompute_from_times(rec: &AnnotationRecord, fps: f64) -> Result<AnnotationRecord> {
    let start = rec.start_time_s.max(0.0);
    let end = rec.end_time_s.max(0.0);
    if end < start {
        return Err(Error::InvalidRange { start, end });
    }

    let start_frame = seconds_to_frames(start, fps);
    let end_frame = seconds_to_frames(end, fps);

    Ok(AnnotationRecord {
        start_time_s: start,
        end_time_s: end,
        total_time_s: end - start,
        start_frame,
        end_frame,
        total_frames: (end_frame - start_frame).max(0),
        ..rec.clone()
    })
}

/// Recompute times and totals from `start_frame` / `end_frame`.
pub fn recompute_from_frames(rec: &AnnotationRecord, fps: f64) -> Result<AnnotationRecord> {
    let start_frame = rec.start_frame.max(0);
    let end_frame = rec.end_frame.max(0);
    if end_frame < start_frame {
        return Err(Error::InvalidRange {
            start: start_frame as f64,
            end: end_frame as f64,
        });
    }

    let start = frames_to_seconds(start_frame, fps);
    let end = frames_to_seconds(end_frame, fps);

    Ok(AnnotationRecord {
        start_frame,
        end_frame,
        total_frames: end_frame - start_frame,
        start_time_s: start,
        end_time_s: end,
        total_time_s: end - start,
        ..rec.clone()
    })
}

/// Clamp both sides without failing; used when loading foreign tables whose
/// totals may be stale.
pub fn recompute_totals(rec: &AnnotationRecord) -> AnnotationRecord {
    let start = rec.start_time_s.max(0.0);
    let end = rec.end_time_s.max(0.0).max(start);
    let start_frame = rec.start_frame.max(0);
    let end_frame = rec.end_frame.max(0).max(start_frame);

    AnnotationRecord {
        start_time_s: start,
        end_time_s: end,
        total_time_s: end - start,
        start_frame,
        end_frame,
        total_frames: end_frame - start_frame,
        ..rec.clone()
    }
}

/// Drag-commit path: swaps a crossed range instead of failing.
pub fn apply_span_ms(
    rec: &AnnotationRecord,
    start_ms: u64,
    end_ms: u64,
    fps: f64,
) -> Result<AnnotationRecord> {
    let (start_ms, end_ms) = if end_ms < start_ms {
        (end_ms, start_ms)
    } else {
        (start_ms, end_ms)
    };
    let candidate = AnnotationRecord {
        start_time_s: ms_to_seconds(start_ms),
        end_time_s: ms_to_seconds(end_ms),
        ..rec.clone()
    };
    recompute_from_times(&candidate, fps)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(start_s: f64, end_s: f64) -> AnnotationRecord {
        AnnotationRecord {
            label: "session-a".to_string(),
            camera_ids: vec!["video-1".to_string()],
            category_id: 1,
            category_name: "Incision".to_string(),
            start_frame: 0,
            end_frame: 0,
            total_frames: 0,
            start_time_s: start_s,
            end_time_s: end_s,
            total_time_s: 0.0,
            time_source_id: "video-1".to_string(),
            audio_source_id: "video-1".to_string(),
            confidence: 5,
            notes: String::new(),
        }
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "00:00");
        assert_eq!(format_ms(61_999), "01:01");
        assert_eq!(format_ms(3_600_000), "60:00");
        assert_eq!(format_ms_precise(2_005), "00:02.005");
    }

    #[test]
    fn test_recompute_from_times() {
        let rec = recompute_from_times(&record(2.0, 5.0), 30.0).unwrap();
        assert_eq!(rec.start_frame, 60);
        assert_eq!(rec.end_frame, 150);
        assert_eq!(rec.total_frames, 90);
        assert!((rec.total_time_s - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recompute_clamps_negative_and_defaults_fps() {
        let rec = recompute_from_times(&record(-1.0, 1.0), 0.0).unwrap();
        assert_eq!(rec.start_time_s, 0.0);
        assert_eq!(rec.start_frame, 0);
        assert_eq!(rec.end_frame, 30);
    }

    #[test]
    fn test_recompute_rejects_inverted_range() {
        let err = recompute_from_times(&record(4.0, 3.0), 30.0).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));

        let mut rec = record(0.0, 0.0);
        rec.start_frame = 10;
        rec.end_frame = 5;
        assert!(recompute_from_frames(&rec, 30.0).is_err());
    }

    #[test]
    fn test_time_frame_round_trip_within_one_frame() {
        for fps in [23.976, 25.0, 29.97, 30.0, 59.94, 60.0] {
            for (start_ms, end_ms) in [(0u64, 0u64), (17, 33), (1_001, 4_567), (59_999, 123_457)] {
                let rec = apply_span_ms(&record(0.0, 0.0), start_ms, end_ms, fps).unwrap();
                let back = recompute_from_frames(&rec, fps).unwrap();
                assert!((back.total_frames - rec.total_frames).abs() <= 1);
                let again = recompute_from_times(&back, fps).unwrap();
                assert!((again.total_frames - rec.total_frames).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_apply_span_swaps_crossed_range() {
        let rec = apply_span_ms(&record(4.0, 5.0), 4_000, 3_000, 30.0).unwrap();
        assert_eq!(rec.start_time_s, 3.0);
        assert_eq!(rec.end_time_s, 4.0);
        assert_eq!(rec.start_frame, 90);
        assert_eq!(rec.end_frame, 120);
    }

    #[test]
    fn test_recompute_totals_never_negative() {
        let mut rec = record(5.0, 2.0);
        rec.start_frame = 150;
        rec.end_frame = 60;
        let fixed = recompute_totals(&rec);
        assert_eq!(fixed.total_time_s, 0.0);
        assert_eq!(fixed.total_frames, 0);
    }
}
