//! Operator maintenance over the cache: filtered listing, bulk edits, and
//! CSV export/import.

use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ApprovalTag;
use crate::cache::{CacheEntry, CacheError, CachedRow, NormCache};
use crate::key::CacheKey;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("import error at line {line}: {message}")]
    Import { line: usize, message: String },
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which cached entries an administrative operation applies to. All bounds
/// are optional and combine conjunctively; confidence and date bounds are
/// inclusive.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub field: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub approved_by: Option<ApprovalTag>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl EntryFilter {
    /// Reject nonsensical bounds before anything touches the store.
    pub fn validate(&self) -> Result<(), AdminError> {
        for (name, bound) in [
            ("min confidence", self.min_confidence),
            ("max confidence", self.max_confidence),
        ] {
            if let Some(value) = bound
                && (!value.is_finite() || !(0.0..=1.0).contains(&value))
            {
                return Err(AdminError::InvalidFilter(format!(
                    "{name} {value} outside [0, 1]"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_confidence, self.max_confidence)
            && min > max
        {
            return Err(AdminError::InvalidFilter(format!(
                "confidence range inverted ({min} > {max})"
            )));
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before)
            && after > before
        {
            return Err(AdminError::InvalidFilter("date range inverted".to_string()));
        }
        Ok(())
    }

    pub fn matches(&self, row: &CachedRow) -> bool {
        if let Some(field) = &self.field
            && row.field != *field
        {
            return false;
        }
        if let Some(min) = self.min_confidence
            && row.entry.confidence_score < min
        {
            return false;
        }
        if let Some(max) = self.max_confidence
            && row.entry.confidence_score > max
        {
            return false;
        }
        if let Some(tag) = self.approved_by
            && row.entry.approved_by != Some(tag)
        {
            return false;
        }
        if let Some(after) = self.created_after
            && row.entry.created_at < after
        {
            return false;
        }
        if let Some(before) = self.created_before
            && row.entry.created_at > before
        {
            return false;
        }
        true
    }
}

/// What a bulk edit does to each matching entry.
#[derive(Debug, Clone)]
pub enum BulkAction {
    SetValue(String),
    SetConfidence(f64),
    SetTag(ApprovalTag),
    Delete,
}

impl BulkAction {
    fn validate(&self) -> Result<(), AdminError> {
        if let BulkAction::SetConfidence(value) = self
            && (!value.is_finite() || !(0.0..=1.0).contains(value))
        {
            return Err(AdminError::InvalidAction(format!(
                "confidence {value} outside [0, 1]"
            )));
        }
        Ok(())
    }
}

/// All live entries matching the filter.
pub fn select(cache: &NormCache, filter: &EntryFilter) -> Result<Vec<CachedRow>, AdminError> {
    filter.validate()?;
    Ok(cache.list().into_iter().filter(|row| filter.matches(row)).collect())
}

/// Apply one action to every entry matching the filter.
///
/// Each mutated entry has its `review_count` incremented, `last_reviewed`
/// stamped, and provenance set to `bulk_edit`, unless the action itself
/// assigns a tag, which then wins. Returns how many entries were touched.
pub fn bulk_edit(
    cache: &NormCache,
    filter: &EntryFilter,
    action: &BulkAction,
) -> Result<usize, AdminError> {
    action.validate()?;
    let rows = select(cache, filter)?;
    let mut touched = 0usize;
    for row in rows {
        match action {
            BulkAction::Delete => cache.delete(&row.key)?,
            BulkAction::SetValue(value) => {
                let mut entry = row.entry.clone();
                entry.normalized_value = value.clone();
                entry.mark_reviewed(ApprovalTag::BulkEdit);
                cache.put(&row.key, &row.field, &row.original_value, &entry)?;
            }
            BulkAction::SetConfidence(value) => {
                let mut entry = row.entry.clone();
                entry.confidence_score = *value;
                entry.mark_reviewed(ApprovalTag::BulkEdit);
                cache.put(&row.key, &row.field, &row.original_value, &entry)?;
            }
            BulkAction::SetTag(tag) => {
                let mut entry = row.entry.clone();
                entry.mark_reviewed(*tag);
                cache.put(&row.key, &row.field, &row.original_value, &entry)?;
            }
        }
        touched += 1;
    }
    tracing::info!(touched, ?action, "bulk edit applied");
    Ok(touched)
}

/// Apply a targeted manual review to one entry: set a new value, bump the
/// review count, and tag `manual_review`.
pub fn review(
    cache: &NormCache,
    key: &CacheKey,
    new_value: &str,
) -> Result<Option<CacheEntry>, AdminError> {
    let Some(row) = cache.list().into_iter().find(|row| row.key == *key) else {
        return Ok(None);
    };
    let mut entry = row.entry;
    entry.normalized_value = new_value.to_string();
    entry.mark_reviewed(ApprovalTag::ManualReview);
    cache.put(key, &row.field, &row.original_value, &entry)?;
    Ok(Some(entry))
}

// ── CSV round-trip ──────────────────────────────────────────────────────

const CSV_HEADER: &str = "field,original_value,normalized_value,confidence_score,timestamp,approved_by,review_count,last_reviewed";

/// Quote a CSV value when it contains a delimiter, quote, or newline.
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Split one CSV line into fields, honoring double-quoted values with `""`
/// escapes. Embedded newlines are not supported (the writer never produces
/// them for this schema).
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Write every live entry as a flat CSV table. Returns the row count.
pub fn export_csv<W: Write>(cache: &NormCache, writer: &mut W) -> Result<usize, AdminError> {
    writeln!(writer, "{CSV_HEADER}")?;
    let rows = cache.list();
    for row in &rows {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{}",
            csv_escape(&row.field),
            csv_escape(&row.original_value),
            csv_escape(&row.entry.normalized_value),
            row.entry.confidence_score,
            row.entry.created_at.timestamp(),
            row.entry.approved_by.map(|t| t.as_str()).unwrap_or(""),
            row.entry.review_count,
            row.entry
                .last_reviewed
                .map(|t| t.timestamp().to_string())
                .unwrap_or_default(),
        )?;
    }
    tracing::info!(rows = rows.len(), "cache exported");
    Ok(rows.len())
}

/// Read a CSV table produced by [`export_csv`] back into the cache.
///
/// Keys are re-derived from each row's `(original_value, field)` pair, so a
/// foreign file cannot smuggle in mismatched keys. The whole file is parsed
/// before anything is written; a malformed line aborts the import with the
/// cache untouched.
pub fn import_csv<R: BufRead>(cache: &NormCache, reader: R) -> Result<usize, AdminError> {
    let mut parsed: Vec<(CacheKey, String, String, CacheEntry)> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if index == 0 {
            if !line.trim_start().starts_with("field,") {
                return Err(AdminError::Import {
                    line: line_no,
                    message: "missing header row".to_string(),
                });
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let fields = parse_csv_line(&line);
        let [field, original_value, normalized_value, confidence, timestamp, approved_by, review_count, last_reviewed]: [String; 8] =
            match fields.try_into() {
                Ok(columns) => columns,
                Err(fields) => {
                    return Err(AdminError::Import {
                        line: line_no,
                        message: format!("expected 8 columns, found {}", fields.len()),
                    });
                }
            };

        let confidence_score: f64 = confidence.parse().map_err(|_| AdminError::Import {
            line: line_no,
            message: format!("bad confidence_score {confidence:?}"),
        })?;
        let created_at = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| AdminError::Import {
                line: line_no,
                message: format!("bad timestamp {timestamp:?}"),
            })?;
        let approved_by = if approved_by.is_empty() {
            None
        } else {
            Some(ApprovalTag::parse(&approved_by).ok_or_else(|| AdminError::Import {
                line: line_no,
                message: format!("unknown approval tag {approved_by:?}"),
            })?)
        };
        let review_count: u32 = review_count.parse().map_err(|_| AdminError::Import {
            line: line_no,
            message: format!("bad review_count {review_count:?}"),
        })?;
        let last_reviewed = if last_reviewed.is_empty() {
            None
        } else {
            Some(
                last_reviewed
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .ok_or_else(|| AdminError::Import {
                        line: line_no,
                        message: format!("bad last_reviewed {last_reviewed:?}"),
                    })?,
            )
        };

        let key = CacheKey::derive(&original_value, &field);
        parsed.push((
            key,
            field,
            original_value,
            CacheEntry {
                normalized_value,
                confidence_score,
                created_at,
                approved_by,
                review_count,
                last_reviewed,
            },
        ));
    }

    for (key, field, original_value, entry) in &parsed {
        cache.put(key, field, original_value, entry)?;
    }
    tracing::info!(rows = parsed.len(), "cache imported");
    Ok(parsed.len())
}
