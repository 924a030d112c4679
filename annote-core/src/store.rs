//! The ordered record list of a session and the edits allowed on it.
//!
//! Records are replaced wholesale through the recompute rules in
//! [`crate::frames`]; a rejected edit leaves the record untouched.

use crate::error::{Error, Result};
use crate::frames::{apply_span_ms, recompute_from_frames, recompute_from_times};
use crate::types::{AnnotationRecord, Category};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single-field edit from the record table.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEdit {
    /// Re-assign to another configured category
    Category(i64),
    StartTime(f64),
    EndTime(f64),
    StartFrame(i64),
    EndFrame(i64),
    Confidence(i64),
    Notes(String),
}

/// Categories referenced by records that disagree with the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchWarning {
    /// `(number, name in the records)` for numbers not configured
    pub missing: Vec<(i64, String)>,
    /// `(number, name in the records, configured name)`
    pub renamed: Vec<(i64, String, String)>,
}

impl MismatchWarning {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.renamed.is_empty()
    }
}

impl fmt::Display for MismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Some categories used in this session do not match the configured list.")?;
        if !self.missing.is_empty() {
            let missing: Vec<String> = self
                .missing
                .iter()
                .map(|(n, name)| {
                    if name.is_empty() {
                        format!("{n}")
                    } else {
                        format!("{n}: {name}")
                    }
                })
                .collect();
            write!(f, " Missing: {}.", missing.join(", "))?;
        }
        if !self.renamed.is_empty() {
            let renamed: Vec<String> = self
                .renamed
                .iter()
                .map(|(n, session, config)| format!("{n}: '{session}' vs '{config}'"))
                .collect();
            write!(f, " Renamed: {}.", renamed.join(", "))?;
        }
        Ok(())
    }
}

/// Ordered annotation records of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationStore {
    records: Vec<AnnotationRecord>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<AnnotationRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AnnotationRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AnnotationRecord> {
        self.records.get(index)
    }

    /// Append a record, returning its index.
    pub fn push(&mut self, record: AnnotationRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Result<AnnotationRecord> {
        if index >= self.records.len() {
            return Err(Error::RecordNotFound(index));
        }
        Ok(self.records.remove(index))
    }

    /// Apply a table edit. Time and frame edits recompute strictly and fail
    /// with [`Error::InvalidRange`] rather than swapping.
    pub fn apply_edit(
        &mut self,
        index: usize,
        edit: RecordEdit,
        categories: &[Category],
        fps: f64,
    ) -> Result<&AnnotationRecord> {
        let current = self
            .records
            .get(index)
            .ok_or(Error::RecordNotFound(index))?;

        let updated = match edit {
            RecordEdit::Category(number) => {
                if number <= 0 {
                    return Err(Error::InvalidField {
                        field: "category",
                        message: "must be a positive integer".to_string(),
                    });
                }
                let category = categories
                    .iter()
                    .find(|c| c.number == number)
                    .ok_or(Error::UnknownCategory(number))?;
                AnnotationRecord {
                    category_id: category.number,
                    category_name: category.name.clone(),
                    ..current.clone()
                }
            }
            RecordEdit::StartTime(seconds) => {
                check_finite("start_time", seconds)?;
                recompute_from_times(
                    &AnnotationRecord {
                        start_time_s: seconds,
                        ..current.clone()
                    },
                    fps,
                )?
            }
            RecordEdit::EndTime(seconds) => {
                check_finite("end_time", seconds)?;
                recompute_from_times(
                    &AnnotationRecord {
                        end_time_s: seconds,
                        ..current.clone()
                    },
                    fps,
                )?
            }
            RecordEdit::StartFrame(frame) => recompute_from_frames(
                &AnnotationRecord {
                    start_frame: frame,
                    ..current.clone()
                },
                fps,
            )?,
            RecordEdit::EndFrame(frame) => recompute_from_frames(
                &AnnotationRecord {
                    end_frame: frame,
                    ..current.clone()
                },
                fps,
            )?,
            RecordEdit::Confidence(value) => {
                if !(1..=10).contains(&value) {
                    return Err(Error::InvalidField {
                        field: "confidence",
                        message: "must be between 1 and 10".to_string(),
                    });
                }
                AnnotationRecord {
                    confidence: value as u8,
                    ..current.clone()
                }
            }
            RecordEdit::Notes(notes) => AnnotationRecord {
                notes,
                ..current.clone()
            },
        };

        tracing::debug!(index, "record edited");
        self.records[index] = updated;
        Ok(&self.records[index])
    }

    /// Drag-commit path: a crossed range is swapped instead of rejected.
    pub fn apply_span(
        &mut self,
        index: usize,
        start_ms: u64,
        end_ms: u64,
        fps: f64,
    ) -> Result<&AnnotationRecord> {
        let current = self
            .records
            .get(index)
            .ok_or(Error::RecordNotFound(index))?;
        let updated = apply_span_ms(current, start_ms, end_ms, fps)?;
        self.records[index] = updated;
        Ok(&self.records[index])
    }

    /// Compare the categories used by records with the configured list.
    pub fn category_mismatch(&self, categories: &[Category]) -> Option<MismatchWarning> {
        let configured: BTreeMap<i64, &str> = categories
            .iter()
            .map(|c| (c.number, c.name.trim()))
            .collect();

        let mut seen = BTreeSet::new();
        let mut warning = MismatchWarning::default();
        for rec in &self.records {
            if !seen.insert(rec.category_id) {
                continue;
            }
            let recorded = rec.category_name.trim();
            match configured.get(&rec.category_id) {
                None => warning
                    .missing
                    .push((rec.category_id, recorded.to_string())),
                Some(name) if !recorded.is_empty() && !name.is_empty() && recorded != *name => {
                    warning
                        .renamed
                        .push((rec.category_id, recorded.to_string(), name.to_string()))
                }
                Some(_) => {}
            }
        }

        (!warning.is_empty()).then_some(warning)
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidField {
            field,
            message: "must be a number".to_string(),
        })
    }
}
