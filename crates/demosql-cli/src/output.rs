use std::io::Write;

use demosql_core::{CachedRow, StatsSummary};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn format_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Print one cached entry in list form.
pub fn print_entry(w: &mut dyn Write, row: &CachedRow, color: ColorMode) -> std::io::Result<()> {
    let tag = row
        .entry
        .approved_by
        .map(|t| t.as_str())
        .unwrap_or("untagged");
    let header = format!("{} :: {} -> {}", row.field, row.original_value, row.entry.normalized_value);
    if color.enabled() {
        writeln!(w, "{}", header.bold())?;
    } else {
        writeln!(w, "{}", header)?;
    }
    writeln!(
        w,
        "    confidence {:.2} | {} | created {} | reviews {}{}",
        row.entry.confidence_score,
        tag,
        format_time(row.entry.created_at),
        row.entry.review_count,
        row.entry
            .last_reviewed
            .map(|t| format!(" | last reviewed {}", format_time(t)))
            .unwrap_or_default(),
    )?;
    Ok(())
}

/// Print the end-of-run normalization statistics.
pub fn print_stats(w: &mut dyn Write, summary: &StatsSummary, color: ColorMode) -> std::io::Result<()> {
    let title = "Normalization statistics";
    if color.enabled() {
        writeln!(w, "\n{}", title.bold().underline())?;
    } else {
        writeln!(w, "\n{}", title)?;
    }
    writeln!(w, "  total:             {}", summary.total_normalizations)?;
    writeln!(w, "  cache hits:        {}", summary.cache_hits)?;
    writeln!(w, "  proposal calls:    {}", summary.proposal_calls)?;
    writeln!(w, "  proposal failures: {}", summary.proposal_failures)?;
    writeln!(w, "  auto approvals:    {}", summary.auto_approvals)?;
    writeln!(w, "  manual approvals:  {}", summary.manual_approvals)?;
    writeln!(w, "  rejections:        {}", summary.rejections)?;
    writeln!(w, "  duration:          {:.2}s", summary.duration_secs)?;
    if !summary.fields.is_empty() {
        writeln!(w, "  per field:")?;
        for (field, stats) in &summary.fields {
            writeln!(
                w,
                "    {}: {} values, {} distinct, mean confidence {:.2}, approval rate {:.0}%",
                field,
                stats.total,
                stats.distinct_values,
                stats.mean_confidence,
                stats.approval_rate * 100.0,
            )?;
        }
    }
    Ok(())
}

/// Print a per-file processing outcome line.
pub fn print_file_outcome(
    w: &mut dyn Write,
    name: &str,
    outcome: &str,
    ok: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        if ok {
            writeln!(w, "{} {}", name, outcome.green())
        } else {
            writeln!(w, "{} {}", name, outcome.yellow())
        }
    } else {
        writeln!(w, "{} {}", name, outcome)
    }
}
