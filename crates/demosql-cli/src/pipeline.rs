//! File processing pipeline: parse, normalize, duplicate-check, load.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use demosql_core::{Adjudicator, Normalizer, format};
use demosql_ingest::prediction_column;
use demosql_records::{Record, RecordsDb, insert_statement};
use indicatif::{ProgressBar, ProgressStyle};

use crate::output::{self, ColorMode};

pub struct ProcessOptions {
    /// Write a rendered `.sql` file next to each input instead of inserting.
    pub sql_out: bool,
    /// Insert even when an identical record already exists.
    pub force: bool,
    /// Show a progress bar (only sensible when nothing prompts on stdin).
    pub progress: bool,
}

/// Reference vocabulary for one column; an unavailable records database
/// degrades to an empty vocabulary.
fn vocabulary(records: Option<&RecordsDb>, column: &str) -> Vec<String> {
    let Some(db) = records else {
        return Vec::new();
    };
    db.distinct_values(column).unwrap_or_else(|e| {
        tracing::warn!(column, error = %e, "vocabulary lookup failed, using empty set");
        Vec::new()
    })
}

/// Process a batch of analysis files. Per-file failures are reported and do
/// not stop the batch.
pub async fn process_files(
    files: &[PathBuf],
    engine: &Normalizer,
    records: Option<&RecordsDb>,
    adjudicator: &dyn Adjudicator,
    color: ColorMode,
    options: &ProcessOptions,
) -> anyhow::Result<()> {
    let bar = if options.progress && files.len() > 1 {
        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let mut stdout = std::io::stdout();
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<file>")
            .to_string();
        if let Some(bar) = &bar {
            bar.set_message(name.clone());
        }

        match process_one(path, engine, records, adjudicator, options).await {
            Ok(outcome) => {
                let ok = !outcome.starts_with("skipped");
                output::print_file_outcome(&mut stdout, &name, &outcome, ok, color)?;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "file processing failed");
                output::print_file_outcome(&mut stdout, &name, &format!("failed: {e}"), false, color)?;
            }
        }

        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    stdout.flush()?;
    Ok(())
}

async fn process_one(
    path: &Path,
    engine: &Normalizer,
    records: Option<&RecordsDb>,
    adjudicator: &dyn Adjudicator,
    options: &ProcessOptions,
) -> anyhow::Result<String> {
    let parsed = demosql_ingest::parse_file(path)?;
    let year = Utc::now().year();

    let mut record = Record {
        age: parsed.input.age,
        zip_code: parsed.input.zip_code.clone(),
        ..Default::default()
    };

    if let Some(occupation) = &parsed.input.occupation {
        let vocab = vocabulary(records, "occupation");
        let (value, _) = engine
            .normalize(occupation, "occupation", &vocab, adjudicator)
            .await;
        record.occupation = Some(value);
    }
    if let Some(location) = &parsed.input.location {
        let vocab = vocabulary(records, "location");
        let (value, _) = engine
            .normalize(location, "location", &vocab, adjudicator)
            .await;
        record.location = Some(value);
    }
    if let Some(gender) = &parsed.input.gender {
        let vocab = vocabulary(records, "gender");
        let (value, _) = engine.normalize(gender, "gender", &vocab, adjudicator).await;
        record.gender = Some(value);
    }

    for (category, prediction) in &parsed.predictions {
        let Some(column) = prediction_column(category) else {
            tracing::warn!(category, "unknown prediction category, skipped");
            continue;
        };

        // Location predictions reuse the vocabulary-backed engine; every
        // other category goes through the fixed pattern tables.
        let value = if category == "location_analysis" {
            let vocab = vocabulary(records, "location");
            engine
                .normalize(&prediction.prediction, "location", &vocab, adjudicator)
                .await
                .0
        } else {
            format::canonicalize(category, &prediction.prediction)
        };
        if let Err(e) = record.predictions.set(column, value) {
            tracing::warn!(category, error = %e, "could not store prediction");
            continue;
        }

        if let Some(confidence) = &prediction.confidence {
            let level = format::canonicalize_confidence(confidence);
            tracing::info!(category, confidence = %level, "prediction confidence");
        }
        if !prediction.sources.is_empty() {
            let sources = format::canonicalize_sources(&prediction.sources, year);
            tracing::debug!(category, ?sources, "prediction sources");
        }
    }

    if !options.force
        && let Some(db) = records
        && db.record_exists(&record)?
    {
        return Ok("skipped (duplicate record)".to_string());
    }

    if options.sql_out {
        let sql_path = path.with_extension("sql");
        std::fs::write(&sql_path, format!("{}\n", insert_statement(&record)))?;
        Ok(format!("sql written to {}", sql_path.display()))
    } else if let Some(db) = records {
        db.insert(&record)?;
        Ok("inserted".to_string())
    } else {
        Ok("parsed (no records database configured, nothing written)".to_string())
    }
}
