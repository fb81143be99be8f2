use std::fmt::Write as _;

use accuracy_validator::AccuracyStats;
use prediction_core::PredictionRecord;

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

/// Render the accuracy report for one symbol as a plain-text table.
/// Read-only output; the records and rollups stay untouched.
pub fn render_symbol_report(
    symbol: &str,
    records: &[PredictionRecord],
    stats: &[AccuracyStats],
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Predictions for {}", symbol.to_uppercase());
    let _ = writeln!(
        out,
        "{:<12} {:<12} {:<5} {:>6} {:>10} {:>10} {:>8} {:<10}",
        "date", "timeframe", "call", "conf", "predicted", "actual", "error%", "state"
    );
    for record in records {
        let _ = writeln!(
            out,
            "{:<12} {:<12} {:<5} {:>6.1} {:>10.2} {:>10} {:>8} {:<10}{}",
            record.prediction_date.format("%Y-%m-%d"),
            record.timeframe.as_str(),
            record.direction.as_str(),
            record.confidence,
            record.predicted_price,
            fmt_opt(record.actual_price, 2),
            fmt_opt(record.error_pct.map(|e| e * 100.0), 2),
            record.state.as_str(),
            if record.forced_hold { "  (risk hold)" } else { "" }
        );
    }
    if records.is_empty() {
        let _ = writeln!(out, "(no records in range)");
    }

    for rollup in stats {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Accuracy [{} / {}]: {} of {} correct ({}), mean abs error {:.2}%",
            rollup.timeframe.as_str(),
            rollup.period,
            rollup.correct,
            rollup.total,
            rollup
                .accuracy_pct()
                .map(|p| format!("{:.1}%", p))
                .unwrap_or_else(|| "n/a".to_string()),
            rollup.mean_abs_error_pct * 100.0
        );

        let _ = writeln!(out, "  calibration (stated confidence vs realized):");
        for bucket in &rollup.calibration {
            if bucket.total == 0 {
                continue;
            }
            let realized = bucket.correct as f64 / bucket.total as f64 * 100.0;
            let _ = writeln!(
                out,
                "    {:>3.0}-{:<3.0}: {:>3} predictions, {:.1}% correct",
                bucket.lo, bucket.hi, bucket.total, realized
            );
        }
    }

    out
}

/// Batch view across symbols: one line per live record, newest first.
pub fn render_batch_report(records: &[PredictionRecord]) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:<12} {:<8} {:<12} {:<5} {:>6} {:<10}",
        "date", "symbol", "timeframe", "call", "conf", "state"
    );
    for record in records {
        let _ = writeln!(
            out,
            "{:<12} {:<8} {:<12} {:<5} {:>6.1} {:<10}",
            record.prediction_date.format("%Y-%m-%d"),
            record.symbol,
            record.timeframe.as_str(),
            record.direction.as_str(),
            record.confidence,
            record.state.as_str()
        );
    }
    if records.is_empty() {
        let _ = writeln!(out, "(no records in range)");
    }

    out
}
