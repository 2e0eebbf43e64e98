use portsindex_indexer::{ReconcileReport, ReconcileStats};
use serde::Serialize;

/// Machine-readable outcome printed with `--json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub index_file: String,
    pub stats: &'a ReconcileStats,
    pub errors: Vec<String>,
}

impl<'a> RunSummary<'a> {
    pub fn new(index_file: String, report: &'a ReconcileReport) -> Self {
        Self {
            index_file,
            stats: &report.stats,
            errors: report.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

pub fn summary_line(stats: &ReconcileStats) -> String {
    let read = stats.lines_read();
    let removed = stats.lines_removed();
    let written = stats.lines_written();

    let mut line = format!(
        "{read} line(s) read, {} changed, {removed} removed",
        stats.lines_changed()
    );
    // Malformed index lines are dropped without being counted as removed.
    if written != read.saturating_sub(removed) {
        line.push_str(&format!(", {written} written"));
    }
    line
}
