use std::io::Write;

use demosql_core::{Adjudicator, Verdict};
use owo_colors::OwoColorize;

use crate::output::ColorMode;

/// Console adjudicator: shows the proposal and reads a y/n/replacement
/// answer from stdin, like the interactive review it replaces.
pub struct ConsoleAdjudicator {
    pub color: ColorMode,
}

impl Adjudicator for ConsoleAdjudicator {
    fn decide(&self, raw_value: &str, proposed_value: &str, confidence: f64) -> Verdict {
        let mut stderr = std::io::stderr();
        let header = "Normalization proposal";
        if self.color.enabled() {
            let _ = writeln!(stderr, "\n{}", header.bold());
        } else {
            let _ = writeln!(stderr, "\n{}", header);
        }
        let _ = writeln!(stderr, "  original:   {}", raw_value);
        let _ = writeln!(stderr, "  proposed:   {}", proposed_value);
        let _ = writeln!(stderr, "  confidence: {:.2}", confidence);
        let _ = write!(stderr, "Approve? (y/n, or type a replacement): ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            // Unreadable stdin (e.g. closed pipe): keep the raw value.
            return Verdict::Reject;
        }
        let answer = answer.trim();
        match answer.to_lowercase().as_str() {
            "y" | "yes" => Verdict::Accept,
            "n" | "no" => Verdict::Reject,
            "" => Verdict::Accept,
            _ => Verdict::Replace(answer.to_string()),
        }
    }
}
