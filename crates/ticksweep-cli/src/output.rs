//! Run summary rendering.

use serde::Serialize;

use ticksweep_core::{FailReason, MetricsSnapshot, RunOutcome, Symbol};

use crate::cli::OutputFormat;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    metrics: &'a MetricsSnapshot,
    missed: Vec<MissedEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct MissedEntry<'a> {
    symbol: &'a Symbol,
    reason: FailReason,
}

pub fn render(outcome: &RunOutcome, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => render_json(outcome),
        OutputFormat::Text => {
            render_text(outcome);
            Ok(())
        }
    }
}

fn render_json(outcome: &RunOutcome) -> Result<(), CliError> {
    let missed = outcome
        .results
        .iter()
        .filter_map(|result| {
            result.reason().map(|reason| MissedEntry {
                symbol: result.symbol(),
                reason,
            })
        })
        .collect();

    let summary = JsonSummary {
        metrics: &outcome.metrics,
        missed,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn render_text(outcome: &RunOutcome) {
    let m = &outcome.metrics;
    println!("run {}", m.run_id);
    println!(
        "  processed {}/{} in {:.1}s ({:.1}/s)",
        m.processed,
        m.total,
        m.elapsed.as_secs_f64(),
        m.throughput_per_sec
    );
    println!(
        "  filled {} ({:.1}%), missed {}",
        m.succeeded,
        m.success_rate * 100.0,
        m.failed
    );
    println!(
        "  misses by reason: rate_limited={} proxy_error={} no_data={} timeout={}",
        m.by_reason.rate_limited, m.by_reason.proxy_error, m.by_reason.no_data, m.by_reason.timeout
    );
    if m.rate_limit_hits > 0 {
        println!("  throttle signals observed: {}", m.rate_limit_hits);
    }
    if m.persist_errors > 0 {
        println!("  persistence errors: {}", m.persist_errors);
    }
}
