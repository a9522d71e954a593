//! Result and error rendering for the three output modes.

use clap::ValueEnum;
use serde_json::json;

use atomic_core::error::{AtomicError, ErrorEnvelope};
use atomic_ledger::{LedgerStats, VerificationReport};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Table,
    /// One JSON document
    Json,
    /// One JSON object per line
    Ndjson,
}

/// Render an error to stderr: structured JSON under `json`, one line
/// otherwise.
pub fn render_error(format: OutputFormat, err: &AtomicError) {
    match format {
        OutputFormat::Json => {
            let envelope = ErrorEnvelope::from_error(err);
            eprintln!(
                "{}",
                serde_json::to_string(&envelope)
                    .unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", err.code()))
            );
        }
        _ => eprintln!("{}: {}", err.code(), err),
    }
}

pub fn render_report(format: OutputFormat, report: &VerificationReport) {
    match format {
        OutputFormat::Json => print_json(&serde_json::to_value(report).unwrap_or_default()),
        OutputFormat::Ndjson => {
            for result in &report.results {
                print_json(&serde_json::to_value(result).unwrap_or_default());
            }
            for fork in &report.forks {
                print_json(&json!({ "fork": fork }));
            }
        }
        OutputFormat::Table => {
            println!(
                "total {}  valid {}  invalid {}  unsigned {}",
                report.total, report.valid, report.invalid, report.unsigned
            );
            for issue in &report.errors {
                println!("line {}: {} — {}", issue.line, issue.code, issue.message);
            }
            for fork in &report.forks {
                println!(
                    "fork in trace {}: hash {} at lines {:?}",
                    fork.trace_id,
                    short_hash(&fork.hash),
                    fork.lines
                );
            }
            if report.interrupted {
                println!("(interrupted)");
            }
        }
    }
}

pub fn render_stats(format: OutputFormat, stats: &LedgerStats) {
    match format {
        OutputFormat::Table => {
            println!("total {}", stats.total);
            for (entity, count) in &stats.by_type {
                println!("  {entity}: {count}");
            }
            for (status, count) in &stats.by_status {
                println!("  status {status}: {count}");
            }
            if let (Some(oldest), Some(newest)) = (stats.oldest_timestamp, stats.newest_timestamp) {
                println!("  span {} .. {}", oldest.to_rfc3339(), newest.to_rfc3339());
            }
        }
        _ => print_json(&serde_json::to_value(stats).unwrap_or_default()),
    }
}

pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
    );
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
