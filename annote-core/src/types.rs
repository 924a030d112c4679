//! Core domain types for annote
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One recorded event: a label plus the video streams filmed from different viewpoints |
//! | **Stream** | One video of a session, identified by a stable id such as `video-1` |
//! | **Category** | A numbered step/skill that annotations are classified by |
//! | **Record** | One annotated interval of a category, aligned to the time source clock |
//! | **Time source** | The stream whose clock defines global position, duration and end |
//! | **Audio source** | The only stream with non-zero gain |
//! | **Active views** | The subset of streams currently rendered |

use serde::{Deserialize, Serialize};

/// Frame rate assumed when a stream's rate is unknown.
pub const DEFAULT_FPS: f64 = 30.0;

/// Confidence assigned when none was given.
pub const DEFAULT_CONFIDENCE: u8 = 5;

// ============================================
// Streams
// ============================================

/// Where a stream's media originally came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Local,
    Url,
}

/// One video of a session, as materialized by media ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    /// Stable logical id (`video-1`, `video-2`, ...)
    #[serde(rename = "video_id")]
    pub stream_id: String,
    /// File name inside the session folder
    pub filename: String,
    #[serde(default)]
    pub source_type: SourceType,
    /// Original path or URL (informational)
    #[serde(default)]
    pub source: String,
    /// Probed duration; 0 when unknown
    #[serde(default)]
    pub duration_ms: u64,
    /// Probed frame rate
    #[serde(default = "default_fps")]
    pub fps: f64,
}

fn default_fps() -> f64 {
    DEFAULT_FPS
}

impl VideoStream {
    /// Local stream with unknown duration and default fps.
    pub fn local(stream_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            filename: filename.into(),
            source_type: SourceType::Local,
            source: String::new(),
            duration_ms: 0,
            fps: DEFAULT_FPS,
        }
    }

    /// Set probed duration and fps.
    pub fn with_probe(mut self, duration_ms: u64, fps: f64) -> Self {
        self.duration_ms = duration_ms;
        self.fps = fps;
        self
    }

    /// Frame rate to use for frame math, falling back to [`DEFAULT_FPS`].
    pub fn effective_fps(&self) -> f64 {
        effective_fps(self.fps)
    }
}

/// Replace unusable frame rates with [`DEFAULT_FPS`].
pub fn effective_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

/// Normalize a stream id for comparison (trimmed, lowercase).
pub fn normalize_camid(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Normalize, drop empties and de-duplicate while keeping first-seen order.
pub fn camera_ids_from_views<S: AsRef<str>>(views: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(views.len());
    for view in views {
        let id = normalize_camid(view.as_ref());
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// `["video-1", "video-2"]` -> `"video-1,video-2"`
pub fn encode_camera_ids<S: AsRef<str>>(ids: &[S]) -> String {
    camera_ids_from_views(ids).join(",")
}

/// Inverse of [`encode_camera_ids`]; tolerant of spaces and empty parts.
pub fn decode_camera_ids(camid: &str) -> Vec<String> {
    let parts: Vec<&str> = camid.split(',').collect();
    camera_ids_from_views(&parts)
}

// ============================================
// Categories
// ============================================

/// A numbered annotation category ("skill" / "step").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub number: i64,
    pub name: String,
}

impl Category {
    pub fn new(number: i64, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.number, self.name)
    }
}

// ============================================
// Annotation records
// ============================================

/// A single annotated step interval.
///
/// Times are seconds on the time source clock; frames derive from the time
/// source fps. Values are replaced wholesale on edit (see [`crate::frames`]),
/// never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Session label the record belongs to
    pub label: String,
    /// Streams visible when the record was captured
    pub camera_ids: Vec<String>,
    pub category_id: i64,
    /// Category name at creation time
    pub category_name: String,

    pub start_frame: i64,
    pub end_frame: i64,
    pub total_frames: i64,

    pub start_time_s: f64,
    pub end_time_s: f64,
    pub total_time_s: f64,

    pub time_source_id: String,
    pub audio_source_id: String,

    /// Self-assessed confidence, 1-10
    pub confidence: u8,
    pub notes: String,
}

impl AnnotationRecord {
    /// Start in whole milliseconds.
    pub fn start_ms(&self) -> u64 {
        seconds_to_ms(self.start_time_s)
    }

    /// End in whole milliseconds.
    pub fn end_ms(&self) -> u64 {
        seconds_to_ms(self.end_time_s)
    }

    /// Comma-joined camera ids as stored in the annotation table.
    pub fn camid(&self) -> String {
        encode_camera_ids(&self.camera_ids)
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}

// ============================================
// Session state
// ============================================

/// A loaded session: streams, records and the user's role selections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub label: String,
    pub videos: Vec<VideoStream>,
    pub annotations: Vec<AnnotationRecord>,
    pub active_view_ids: Vec<String>,
    pub time_source_id: Option<String>,
    pub audio_source_id: Option<String>,
}

impl SessionData {
    pub fn new(label: impl Into<String>, videos: Vec<VideoStream>) -> Self {
        let mut data = Self {
            label: label.into(),
            videos,
            ..Default::default()
        };
        data.ensure_default_sources();
        data
    }

    pub fn video_ids(&self) -> Vec<String> {
        self.videos.iter().map(|v| v.stream_id.clone()).collect()
    }

    /// Find a stream by id, ignoring case and surrounding spaces.
    pub fn get_video(&self, stream_id: &str) -> Option<&VideoStream> {
        let wanted = normalize_camid(stream_id);
        self.videos
            .iter()
            .find(|v| normalize_camid(&v.stream_id) == wanted)
    }

    /// Point roles and views at existing streams, defaulting to the first.
    pub fn ensure_default_sources(&mut self) {
        let ids = self.video_ids();
        let Some(first) = ids.first().cloned() else {
            self.time_source_id = None;
            self.audio_source_id = None;
            self.active_view_ids.clear();
            return;
        };

        self.active_view_ids.retain(|v| ids.contains(v));
        if self.active_view_ids.is_empty() {
            self.active_view_ids = vec![first.clone()];
        }

        if !self
            .time_source_id
            .as_ref()
            .is_some_and(|id| ids.contains(id))
        {
            self.time_source_id = Some(first.clone());
        }

        if !self
            .audio_source_id
            .as_ref()
            .is_some_and(|id| ids.contains(id))
        {
            self.audio_source_id = Some(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_ids_dedup_and_order() {
        let ids = camera_ids_from_views(&["Video-2", " video-1 ", "video-2", ""]);
        assert_eq!(ids, vec!["video-2".to_string(), "video-1".to_string()]);
        assert_eq!(encode_camera_ids(&ids), "video-2,video-1");
        assert_eq!(decode_camera_ids("video-2, video-1,,VIDEO-2"), ids);
        assert!(decode_camera_ids("").is_empty());
    }

    #[test]
    fn test_effective_fps() {
        assert_eq!(effective_fps(25.0), 25.0);
        assert_eq!(effective_fps(0.0), DEFAULT_FPS);
        assert_eq!(effective_fps(-3.0), DEFAULT_FPS);
        assert_eq!(effective_fps(f64::NAN), DEFAULT_FPS);
    }

    #[test]
    fn test_ensure_default_sources() {
        let mut data = SessionData::new(
            "s1",
            vec![
                VideoStream::local("video-1", "video-1.mp4"),
                VideoStream::local("video-2", "video-2.mp4"),
            ],
        );
        assert_eq!(data.active_view_ids, vec!["video-1".to_string()]);
        assert_eq!(data.time_source_id.as_deref(), Some("video-1"));
        assert_eq!(data.audio_source_id.as_deref(), Some("video-1"));

        data.time_source_id = Some("video-9".to_string());
        data.audio_source_id = Some("video-2".to_string());
        data.active_view_ids = vec!["video-7".to_string()];
        data.ensure_default_sources();
        assert_eq!(data.time_source_id.as_deref(), Some("video-1"));
        assert_eq!(data.audio_source_id.as_deref(), Some("video-2"));
        assert_eq!(data.active_view_ids, vec!["video-1".to_string()]);

        let mut empty = SessionData::new("s2", Vec::new());
        empty.ensure_default_sources();
        assert!(empty.time_source_id.is_none());
        assert!(empty.active_view_ids.is_empty());
    }

    #[test]
    fn test_video_stream_json_uses_video_id() {
        let v = VideoStream::local("video-1", "video-1.mp4").with_probe(12_000, 25.0);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["video_id"], "video-1");
        assert_eq!(json["source_type"], "local");

        let parsed: VideoStream =
            serde_json::from_str(r#"{"video_id":"video-3","filename":"video-3.mov"}"#).unwrap();
        assert_eq!(parsed.fps, DEFAULT_FPS);
        assert_eq!(parsed.duration_ms, 0);
    }
}
