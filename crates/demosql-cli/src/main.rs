use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use demosql_core::config_file::{self, ConfigFile};
use demosql_core::proposer::openai::{DEFAULT_MODEL, OpenAiProposer};
use demosql_core::{
    ApprovalPolicy, ApprovalTag, CACHE_EXPIRY_DAYS, CacheKey, NormCache, Normalizer, RunStats,
    admin,
    approval::AcceptAll,
};
use demosql_records::RecordsDb;

mod adjudicator;
mod output;
mod pipeline;

use adjudicator::ConsoleAdjudicator;
use output::ColorMode;
use pipeline::ProcessOptions;

/// Normalize demographic analysis files and maintain the normalization cache
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize analysis files and load them into the records table
    Process {
        /// Analysis files to process
        files: Vec<PathBuf>,

        /// Process every analysis file found in --dir
        #[arg(long)]
        all: bool,

        /// Directory scanned with --all
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Path to the records database
        #[arg(long)]
        records: Option<PathBuf>,

        /// Path to the normalization cache database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Write a rendered .sql file next to each input instead of inserting
        #[arg(long)]
        sql_out: bool,

        /// Accept every below-threshold proposal without prompting
        #[arg(long)]
        assume_yes: bool,

        /// Insert records even when an identical one already exists
        #[arg(long)]
        force: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// OpenAI API key
        #[arg(long)]
        openai_key: Option<String>,

        /// OpenAI model for normalization proposals
        #[arg(long)]
        model: Option<String>,
    },

    /// Inspect and maintain the normalization cache
    Cache {
        /// Path to the normalization cache database
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Manage the records database
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// List cached entries, optionally filtered
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show the entry for one (field, value) pair
    Show { field: String, value: String },

    /// Set a reviewed value on one entry
    Review {
        field: String,
        value: String,
        new_value: String,
    },

    /// Delete the entry for one (field, value) pair
    Delete { field: String, value: String },

    /// Remove entries older than the retention window
    Sweep,

    /// Apply one edit to every entry matching a filter
    BulkEdit {
        #[command(flatten)]
        filter: FilterArgs,

        /// Set a new normalized value on matching entries
        #[arg(long)]
        set_value: Option<String>,

        /// Set a new confidence score on matching entries
        #[arg(long)]
        set_confidence: Option<f64>,

        /// Set a new approval tag on matching entries
        #[arg(long)]
        set_tag: Option<String>,

        /// Delete matching entries
        #[arg(long)]
        delete: bool,

        /// Apply without the preview/confirmation step
        #[arg(long)]
        yes: bool,
    },

    /// Export the cache to a CSV file
    Export { path: PathBuf },

    /// Import entries from a CSV file
    Import { path: PathBuf },

    /// Show store-level counts
    Stats,
}

#[derive(Subcommand, Debug)]
enum RecordsCommand {
    /// Create the records database and its table
    Init {
        /// Path to the records database
        #[arg(long)]
        records: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Only entries for this field
    #[arg(long)]
    field: Option<String>,

    /// Minimum confidence score (inclusive)
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Maximum confidence score (inclusive)
    #[arg(long)]
    max_confidence: Option<f64>,

    /// Only entries with this approval tag
    #[arg(long)]
    tag: Option<String>,

    /// Only entries created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    after: Option<String>,

    /// Only entries created on or before this date (YYYY-MM-DD)
    #[arg(long)]
    before: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> anyhow::Result<admin::EntryFilter> {
        let approved_by = self
            .tag
            .map(|tag| {
                ApprovalTag::parse(&tag)
                    .with_context(|| format!("unknown approval tag {tag:?}"))
            })
            .transpose()?;
        let created_after = self
            .after
            .map(|d| day_bound(&d, false))
            .transpose()?;
        let created_before = self
            .before
            .map(|d| day_bound(&d, true))
            .transpose()?;
        Ok(admin::EntryFilter {
            field: self.field,
            min_confidence: self.min_confidence,
            max_confidence: self.max_confidence,
            approved_by,
            created_after,
            created_before,
        })
    }
}

/// Parse `YYYY-MM-DD` into the start or end instant of that day (UTC).
fn day_bound(date: &str, end_of_day: bool) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("bad date {date:?}, expected YYYY-MM-DD"))?;
    let time = if end_of_day {
        day.and_hms_opt(23, 59, 59)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    Ok(time.context("invalid time of day")?.and_utc())
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let file_appender = tracing_appender::rolling::never(".", "demosql.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    guard
}

// ── configuration resolution: flags > environment > config file ────────

fn resolve_cache_path(flag: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    flag.or_else(|| std::env::var("DEMOSQL_CACHE_PATH").ok().map(PathBuf::from))
        .or_else(|| {
            config
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .map(PathBuf::from)
        })
        .or_else(|| dirs::data_dir().map(|d| d.join("demosql").join("norm_cache.db")))
        .unwrap_or_else(|| PathBuf::from("norm_cache.db"))
}

fn resolve_records_path(flag: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    flag.or_else(|| std::env::var("DEMOSQL_RECORDS_PATH").ok().map(PathBuf::from))
        .or_else(|| {
            config
                .records
                .as_ref()
                .and_then(|r| r.path.clone())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("demographic_analysis.db"))
}

fn resolve_expiry_days(config: &ConfigFile) -> u64 {
    config
        .cache
        .as_ref()
        .and_then(|c| c.expiry_days)
        .unwrap_or(CACHE_EXPIRY_DAYS)
}

fn resolve_threshold(config: &ConfigFile) -> ApprovalPolicy {
    config
        .cache
        .as_ref()
        .and_then(|c| c.auto_approve_threshold)
        .map(ApprovalPolicy::new)
        .unwrap_or_default()
}

/// Open the persistent cache, falling back to in-memory (with a warning)
/// when the database cannot be opened. Normalization still works then; it
/// just re-asks the proposal source next run.
fn build_cache(path: &PathBuf, expiry_days: u64) -> NormCache {
    match NormCache::open(path, expiry_days) {
        Ok(cache) => {
            tracing::info!(path = %path.display(), "opened normalization cache");
            cache
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            NormCache::new(expiry_days)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing();
    let cli = Cli::parse();
    let config = config_file::load_config();

    match cli.command {
        Command::Process {
            files,
            all,
            dir,
            records,
            cache,
            sql_out,
            assume_yes,
            force,
            no_color,
            openai_key,
            model,
        } => {
            let color = ColorMode(!no_color);

            let mut files = files;
            if all {
                files.extend(demosql_ingest::discover_files(&dir)?);
                files.sort();
                files.dedup();
            }
            if files.is_empty() {
                anyhow::bail!("no analysis files given; pass paths or --all");
            }

            let openai_key = openai_key
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| config.api_keys.as_ref().and_then(|a| a.openai_key.clone()))
                .context("no OpenAI API key; pass --openai-key or set OPENAI_API_KEY")?;
            let model = model
                .or_else(|| std::env::var("OPENAI_MODEL").ok())
                .or_else(|| config.api_keys.as_ref().and_then(|a| a.openai_model.clone()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());

            let cache_path = resolve_cache_path(cache, &config);
            let norm_cache = Arc::new(build_cache(&cache_path, resolve_expiry_days(&config)));
            let proposer = Arc::new(OpenAiProposer::new(openai_key).with_model(model));
            let stats = Arc::new(RunStats::new());
            let engine = Normalizer::new(
                norm_cache,
                proposer,
                resolve_threshold(&config),
                stats.clone(),
            );

            let records_db = if sql_out && records.is_none() {
                // Pure .sql rendering works without a records database.
                match RecordsDb::open(&resolve_records_path(None, &config)) {
                    Ok(db) => Some(db),
                    Err(_) => None,
                }
            } else {
                Some(RecordsDb::create(&resolve_records_path(records, &config))?)
            };

            let options = ProcessOptions {
                sql_out,
                force,
                progress: assume_yes,
            };
            if assume_yes {
                pipeline::process_files(
                    &files,
                    &engine,
                    records_db.as_ref(),
                    &AcceptAll,
                    color,
                    &options,
                )
                .await?;
            } else {
                let console = ConsoleAdjudicator { color };
                pipeline::process_files(
                    &files,
                    &engine,
                    records_db.as_ref(),
                    &console,
                    color,
                    &options,
                )
                .await?;
            }

            let mut stdout = std::io::stdout();
            output::print_stats(&mut stdout, &stats.summary(), color)?;
        }

        Command::Cache {
            cache,
            no_color,
            command,
        } => {
            let color = ColorMode(!no_color);
            let cache_path = resolve_cache_path(cache, &config);
            let store = NormCache::open(&cache_path, resolve_expiry_days(&config))
                .with_context(|| format!("failed to open cache at {}", cache_path.display()))?;
            run_cache_command(&store, command, color)?;
        }

        Command::Records { command } => match command {
            RecordsCommand::Init { records } => {
                let path = resolve_records_path(records, &config);
                let db = RecordsDb::create(&path)?;
                println!(
                    "records database ready at {} ({} records)",
                    db.path().display(),
                    db.len()?
                );
            }
        },
    }

    Ok(())
}

fn run_cache_command(store: &NormCache, command: CacheCommand, color: ColorMode) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    match command {
        CacheCommand::List { filter } => {
            let rows = admin::select(store, &filter.into_filter()?)?;
            if rows.is_empty() {
                println!("no matching entries");
                return Ok(());
            }
            for row in &rows {
                output::print_entry(&mut stdout, row, color)?;
            }
            println!("{} entries", rows.len());
        }

        CacheCommand::Show { field, value } => {
            let key = CacheKey::derive(&value, &field);
            match store.get(&key) {
                Some(entry) => {
                    let row = demosql_core::CachedRow {
                        key,
                        field,
                        original_value: value,
                        entry,
                    };
                    output::print_entry(&mut stdout, &row, color)?;
                }
                None => println!("no entry for ({field}, {value})"),
            }
        }

        CacheCommand::Review {
            field,
            value,
            new_value,
        } => {
            let key = CacheKey::derive(&value, &field);
            match admin::review(store, &key, &new_value)? {
                Some(entry) => println!(
                    "updated ({field}, {value}) -> {} (review #{})",
                    entry.normalized_value, entry.review_count
                ),
                None => println!("no entry for ({field}, {value})"),
            }
        }

        CacheCommand::Delete { field, value } => {
            let key = CacheKey::derive(&value, &field);
            store.delete(&key)?;
            println!("deleted ({field}, {value})");
        }

        CacheCommand::Sweep => {
            let removed = store.sweep_expired();
            println!(
                "removed {removed} entries older than {} days",
                store.retention_days()
            );
        }

        CacheCommand::BulkEdit {
            filter,
            set_value,
            set_confidence,
            set_tag,
            delete,
            yes,
        } => {
            let mut actions: Vec<admin::BulkAction> = Vec::new();
            if let Some(value) = set_value {
                actions.push(admin::BulkAction::SetValue(value));
            }
            if let Some(confidence) = set_confidence {
                actions.push(admin::BulkAction::SetConfidence(confidence));
            }
            if let Some(tag) = set_tag {
                let tag = ApprovalTag::parse(&tag)
                    .with_context(|| format!("unknown approval tag {tag:?}"))?;
                actions.push(admin::BulkAction::SetTag(tag));
            }
            if delete {
                actions.push(admin::BulkAction::Delete);
            }
            if actions.len() != 1 {
                anyhow::bail!(
                    "pass exactly one of --set-value, --set-confidence, --set-tag, --delete"
                );
            }
            let action = actions.remove(0);
            let filter = filter.into_filter()?;

            if !yes {
                let rows = admin::select(store, &filter)?;
                for row in &rows {
                    output::print_entry(&mut stdout, row, color)?;
                }
                println!(
                    "{} entries would be affected; re-run with --yes to apply",
                    rows.len()
                );
                return Ok(());
            }

            let touched = admin::bulk_edit(store, &filter, &action)?;
            println!("edited {touched} entries");
        }

        CacheCommand::Export { path } => {
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let rows = admin::export_csv(store, &mut file)?;
            file.flush()?;
            println!("exported {rows} entries to {}", path.display());
        }

        CacheCommand::Import { path } => {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let rows = admin::import_csv(store, BufReader::new(file))?;
            println!("imported {rows} entries from {}", path.display());
        }

        CacheCommand::Stats => {
            let rows = store.list();
            let mut by_tag: std::collections::BTreeMap<&str, usize> = Default::default();
            let mut by_field: std::collections::BTreeMap<String, usize> = Default::default();
            for row in &rows {
                let tag = row.entry.approved_by.map(|t| t.as_str()).unwrap_or("untagged");
                *by_tag.entry(tag).or_default() += 1;
                *by_field.entry(row.field.clone()).or_default() += 1;
            }
            println!("entries:   {}", rows.len());
            println!("persisted: {}", store.has_persistence());
            println!("retention: {} days", store.retention_days());
            if !by_field.is_empty() {
                println!("by field:");
                for (field, count) in by_field {
                    println!("  {field}: {count}");
                }
                println!("by tag:");
                for (tag, count) in by_tag {
                    println!("  {tag}: {count}");
                }
            }
        }
    }
    Ok(())
}
