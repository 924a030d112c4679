//! On-disk layout of an annotation data root.
//!
//! ```text
//! <root>/config.json            categories + color map (RootConfig)
//! <root>/<label>/session.json   label + stream list
//! <root>/<label>/label.tsv      annotation table
//! <root>/<label>/video-N.ext    media, one file per stream
//! ```
//!
//! Every write goes to a temporary file in the target directory which is then
//! renamed over the destination, so a crash never leaves a half-written file.

use crate::color::ColorMap;
use crate::error::{Error, Result};
use crate::frames::recompute_totals;
use crate::types::{
    decode_camera_ids, AnnotationRecord, Category, SessionData, VideoStream, DEFAULT_CONFIDENCE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ROOT_CONFIG_FILENAME: &str = "config.json";
pub const SESSION_META_FILENAME: &str = "session.json";
pub const TSV_FILENAME: &str = "label.tsv";

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "mkv", "avi", "m4v"];

/// Column order of `label.tsv`.
pub const TSV_HEADER: [&str; 14] = [
    "label",
    "camid",
    "step_no",
    "step_name",
    "start_frame",
    "end_frame",
    "total_frames",
    "start_time",
    "end_time",
    "total_time",
    "time_source",
    "audio_source",
    "confidence",
    "notes",
];

// ============================================
// Atomic writes
// ============================================

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::Persistence(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".tmp_").tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    write_atomic(path, &text)
}

// ============================================
// Root configuration
// ============================================

/// Categories and their persistent colors, shared by all sessions of a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default, alias = "root_dir")]
    pub data_root: PathBuf,

    #[serde(default)]
    pub skills: Vec<Category>,

    /// category number -> palette index
    #[serde(default)]
    pub skill_color_map: ColorMap,

    #[serde(default = "default_palette_version")]
    pub palette_version: u32,
}

fn default_palette_version() -> u32 {
    1
}

impl RootConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            skills: Vec::new(),
            skill_color_map: ColorMap::new(),
            palette_version: default_palette_version(),
        }
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(ROOT_CONFIG_FILENAME)
    }

    /// Load `<root>/config.json`.
    ///
    /// Returns `None` when the file is missing or unreadable; the caller
    /// starts from a blank configuration.
    pub fn load(root: &Path) -> Option<Self> {
        let path = Self::path(root);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read root config");
                return None;
            }
        };

        match serde_json::from_str::<RootConfig>(&text) {
            Ok(mut cfg) => {
                cfg.data_root = root.to_path_buf();
                cfg.skills.sort_by_key(|c| c.number);
                cfg.skills.dedup_by_key(|c| c.number);
                Some(cfg)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid root config, ignoring");
                None
            }
        }
    }

    /// Load the root config or start a blank one for `root`.
    pub fn load_or_default(root: &Path) -> Self {
        Self::load(root).unwrap_or_else(|| Self::new(root))
    }

    pub fn save(&self) -> Result<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(Error::Persistence("data root is not set".to_string()));
        }
        write_json(&Self::path(&self.data_root), self)
    }

    pub fn category(&self, number: i64) -> Option<&Category> {
        self.skills.iter().find(|c| c.number == number)
    }

    /// Insert or rename a category, keeping the list ordered by number.
    pub fn upsert_category(&mut self, category: Category) {
        match self.skills.iter_mut().find(|c| c.number == category.number) {
            Some(existing) => existing.name = category.name,
            None => {
                self.skills.push(category);
                self.skills.sort_by_key(|c| c.number);
            }
        }
    }
}

// ============================================
// Sessions
// ============================================

#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    label: String,
    #[serde(default)]
    videos: Vec<VideoStream>,
    #[serde(default = "default_meta_version")]
    meta_version: u32,
}

fn default_meta_version() -> u32 {
    1
}

/// A session folder found under a data root.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub label: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
}

pub fn session_dir(root: &Path, label: &str) -> PathBuf {
    root.join(label)
}

fn is_video_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_lowercase().starts_with("video-"));
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()));
    name_ok && ext_ok && path.is_file()
}

/// `video-*` media files in a session folder, sorted by name.
fn discover_video_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/video-*",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };

    let entries = glob::glob_with(&pattern, options)
        .map_err(|e| Error::Persistence(format!("invalid session path: {}", e)))?;

    let mut files: Vec<PathBuf> = entries.flatten().filter(|p| is_video_file(p)).collect();
    files.sort();
    Ok(files)
}

/// Session folders under `root`, ordered by label.
///
/// A folder counts as a session when it holds `session.json`, `label.tsv` or
/// at least one `video-*` media file. Hidden folders are skipped.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionEntry>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let label = entry.file_name().to_string_lossy().to_string();
        if label.starts_with('.') || !path.is_dir() {
            continue;
        }

        let is_session = path.join(SESSION_META_FILENAME).exists()
            || path.join(TSV_FILENAME).exists()
            || !discover_video_files(&path)?.is_empty();
        if !is_session {
            continue;
        }

        let modified_at = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::from)
            .unwrap_or_else(Utc::now);

        sessions.push(SessionEntry {
            label,
            path,
            modified_at,
        });
    }

    sessions.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(sessions)
}

/// Streams of a session: from `session.json` when present, otherwise
/// inferred from the `video-*` files (stream id = file stem).
pub fn load_videos(dir: &Path) -> Result<Vec<VideoStream>> {
    let meta_path = dir.join(SESSION_META_FILENAME);
    if meta_path.exists() {
        match std::fs::read_to_string(&meta_path)
            .map_err(Error::from)
            .and_then(|text| serde_json::from_str::<SessionMeta>(&text).map_err(Error::from))
        {
            Ok(meta) => return Ok(meta.videos),
            Err(e) => {
                tracing::warn!(
                    path = %meta_path.display(),
                    error = %e,
                    "Unreadable session metadata, inferring videos from files"
                );
            }
        }
    }

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let videos = discover_video_files(dir)?
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_string_lossy().to_string();
            let filename = path.file_name()?.to_string_lossy().to_string();
            Some(VideoStream::local(stem, filename))
        })
        .collect();
    Ok(videos)
}

pub fn save_session_meta(dir: &Path, label: &str, videos: &[VideoStream]) -> Result<()> {
    let meta = SessionMeta {
        label: label.to_string(),
        videos: videos.to_vec(),
        meta_version: default_meta_version(),
    };
    write_json(&dir.join(SESSION_META_FILENAME), &meta)
}

/// Load streams and annotations of `<root>/<label>`.
pub fn load_session(root: &Path, label: &str) -> Result<SessionData> {
    let dir = session_dir(root, label);
    let mut data = SessionData::new(label, load_videos(&dir)?);
    data.annotations = load_annotations(&dir)?;
    data.ensure_default_sources();

    tracing::info!(
        label,
        videos = data.videos.len(),
        annotations = data.annotations.len(),
        "Loaded session"
    );
    Ok(data)
}

/// Write `session.json` and `label.tsv` of a session.
pub fn save_session(root: &Path, data: &SessionData) -> Result<()> {
    if data.label.trim().is_empty() {
        return Err(Error::Persistence("session label is empty".to_string()));
    }
    let dir = session_dir(root, &data.label);
    save_session_meta(&dir, &data.label, &data.videos)?;
    save_annotations(&dir, &data.annotations)?;
    tracing::debug!(label = %data.label, records = data.annotations.len(), "Saved session");
    Ok(())
}

/// Check that `<root>/<label>` exists and has at least one stream.
pub fn validate_importable(root: &Path, label: &str) -> Result<Vec<VideoStream>> {
    if !root.is_dir() {
        return Err(Error::Persistence(format!(
            "data root {} does not exist",
            root.display()
        )));
    }
    let dir = session_dir(root, label);
    if !dir.is_dir() {
        return Err(Error::Persistence(format!(
            "session folder {} does not exist",
            dir.display()
        )));
    }
    let videos = load_videos(&dir)?;
    if videos.is_empty() {
        return Err(Error::Persistence(
            "no videos found (expected files named like video-1.mp4)".to_string(),
        ));
    }
    Ok(videos)
}

// ============================================
// Annotation table
// ============================================

fn escape_field(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn unescape_field(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Serialize records as `label.tsv` contents, header included.
pub fn annotations_to_tsv(records: &[AnnotationRecord]) -> String {
    let mut out = TSV_HEADER.join("\t");
    out.push('\n');
    for rec in records {
        let row = [
            escape_field(&rec.label),
            rec.camid(),
            rec.category_id.to_string(),
            escape_field(&rec.category_name),
            rec.start_frame.to_string(),
            rec.end_frame.to_string(),
            rec.total_frames.to_string(),
            format!("{:.3}", rec.start_time_s),
            format!("{:.3}", rec.end_time_s),
            format!("{:.3}", rec.total_time_s),
            rec.time_source_id.clone(),
            rec.audio_source_id.clone(),
            rec.confidence.to_string(),
            escape_field(&rec.notes),
        ];
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

fn parse_or<T: std::str::FromStr>(field: &str, default: T) -> std::result::Result<T, T::Err> {
    let field = field.trim();
    if field.is_empty() {
        Ok(default)
    } else {
        field.parse()
    }
}

fn parse_row(line: &str) -> std::result::Result<AnnotationRecord, String> {
    let mut parts: Vec<&str> = line.split('\t').collect();
    parts.resize(TSV_HEADER.len(), "");

    let int = |i: usize| parse_or::<i64>(parts[i], 0).map_err(|e| format!("{}: {}", TSV_HEADER[i], e));
    let float =
        |i: usize| parse_or::<f64>(parts[i], 0.0).map_err(|e| format!("{}: {}", TSV_HEADER[i], e));

    let confidence = parse_or::<i64>(parts[12], i64::from(DEFAULT_CONFIDENCE))
        .map_err(|e| format!("confidence: {}", e))?;

    let rec = AnnotationRecord {
        label: unescape_field(parts[0]),
        camera_ids: decode_camera_ids(parts[1]),
        category_id: int(2)?,
        category_name: unescape_field(parts[3]),
        start_frame: int(4)?,
        end_frame: int(5)?,
        total_frames: int(6)?,
        start_time_s: float(7)?,
        end_time_s: float(8)?,
        total_time_s: float(9)?,
        time_source_id: parts[10].trim().to_string(),
        audio_source_id: parts[11].trim().to_string(),
        confidence: confidence.clamp(1, 10) as u8,
        notes: unescape_field(parts[13]),
    };
    Ok(recompute_totals(&rec))
}

/// Parse `label.tsv` contents. The header line is optional, missing trailing
/// columns take defaults and malformed rows are skipped.
pub fn annotations_from_tsv(text: &str) -> Vec<AnnotationRecord> {
    let mut lines = text.lines().enumerate().peekable();
    if lines
        .peek()
        .is_some_and(|(_, first)| first.trim_start().starts_with("label\t"))
    {
        lines.next();
    }

    let mut records = Vec::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line) {
            Ok(rec) => records.push(rec),
            Err(reason) => {
                tracing::warn!(line = line_no + 1, reason = %reason, "Skipping malformed annotation row");
            }
        }
    }
    records
}

pub fn load_annotations(dir: &Path) -> Result<Vec<AnnotationRecord>> {
    let path = dir.join(TSV_FILENAME);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(annotations_from_tsv(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Write `label.tsv`, returning its path.
pub fn save_annotations(dir: &Path, records: &[AnnotationRecord]) -> Result<PathBuf> {
    let path = dir.join(TSV_FILENAME);
    write_atomic(&path, &annotations_to_tsv(records))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::recompute_from_times;
    use crate::frames::tests::record;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_tsv_round_trip_preserves_notes() {
        let mut rec = recompute_from_times(&record(2.0, 5.0), 30.0).unwrap();
        rec.camera_ids = vec!["video-1".to_string(), "video-2".to_string()];
        rec.notes = "tab\there\nsecond line \\n literal".to_string();
        rec.confidence = 8;

        let text = annotations_to_tsv(&[rec.clone()]);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\t2.000\t5.000\t3.000\t"));

        let parsed = annotations_from_tsv(&text);
        assert_eq!(parsed, vec![rec]);
    }

    #[test]
    fn test_tsv_tolerates_short_and_malformed_rows() {
        let text = "label\tcamid\tstep_no\n\
                    s1\tvideo-1\t3\tSuture\t30\t60\t30\t1.000\t2.000\t1.000\n\
                    s1\tvideo-1\tnot-a-number\n\
                    \n";
        let parsed = annotations_from_tsv(text);
        assert_eq!(parsed.len(), 1);
        let rec = &parsed[0];
        assert_eq!(rec.category_id, 3);
        assert_eq!(rec.confidence, DEFAULT_CONFIDENCE);
        assert!(rec.time_source_id.is_empty());
        assert!(rec.notes.is_empty());
    }

    #[test]
    fn test_tsv_without_header() {
        let text = "s1\tvideo-2\t1\tIncision\t0\t30\t30\t0.000\t1.000\t1.000\tvideo-2\tvideo-2\t7\tok\n";
        let parsed = annotations_from_tsv(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].camera_ids, vec!["video-2".to_string()]);
        assert_eq!(parsed[0].confidence, 7);
    }

    #[test]
    fn test_root_config_round_trip_and_invalid() {
        let dir = TempDir::new().unwrap();
        assert!(RootConfig::load(dir.path()).is_none());

        let mut cfg = RootConfig::new(dir.path());
        cfg.upsert_category(Category::new(2, "Suture"));
        cfg.upsert_category(Category::new(1, "Incision"));
        cfg.upsert_category(Category::new(2, "Closure"));
        cfg.skill_color_map.insert(1, 0);
        cfg.skill_color_map.insert(2, 1);
        cfg.save().unwrap();

        let text = std::fs::read_to_string(RootConfig::path(dir.path())).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["skill_color_map"]["2"], 1);
        assert_eq!(json["palette_version"], 1);

        let loaded = RootConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.category(2).unwrap().name, "Closure");

        std::fs::write(RootConfig::path(dir.path()), "{ not json").unwrap();
        assert!(RootConfig::load(dir.path()).is_none());
    }

    #[test]
    fn test_videos_inferred_without_metadata() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("s1");
        touch(&dir.join("video-2.MOV"));
        touch(&dir.join("video-1.mp4"));
        touch(&dir.join("notes.txt"));
        touch(&dir.join("video-3.txt"));

        let videos = load_videos(&dir).unwrap();
        let ids: Vec<&str> = videos.iter().map(|v| v.stream_id.as_str()).collect();
        assert_eq!(ids, vec!["video-1", "video-2"]);
        assert_eq!(videos[1].filename, "video-2.MOV");
    }

    #[test]
    fn test_session_save_load_and_listing() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("only-videos").join("video-1.mkv"));
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::create_dir_all(root.path().join(".hidden")).unwrap();

        let mut data = SessionData::new(
            "s1",
            vec![VideoStream::local("video-1", "video-1.mp4").with_probe(10_000, 25.0)],
        );
        data.annotations
            .push(recompute_from_times(&record(1.0, 2.0), 25.0).unwrap());
        save_session(root.path(), &data).unwrap();

        let labels: Vec<String> = list_sessions(root.path())
            .unwrap()
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, vec!["only-videos".to_string(), "s1".to_string()]);

        let loaded = load_session(root.path(), "s1").unwrap();
        assert_eq!(loaded.videos, data.videos);
        assert_eq!(loaded.annotations, data.annotations);
        assert_eq!(loaded.time_source_id.as_deref(), Some("video-1"));

        // no stray temp files
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("s1"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_validate_importable() {
        let root = TempDir::new().unwrap();
        assert!(validate_importable(root.path(), "missing").is_err());
        std::fs::create_dir_all(root.path().join("s1")).unwrap();
        assert!(matches!(
            validate_importable(root.path(), "s1"),
            Err(Error::Persistence(_))
        ));
        touch(&root.path().join("s1").join("video-1.mp4"));
        assert_eq!(validate_importable(root.path(), "s1").unwrap().len(), 1);
    }
}
