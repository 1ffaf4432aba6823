use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use boilerfuel_core::quota::WriteOutcome;

pub(crate) const LBS_PER_KG: f64 = 2.20462;
pub(crate) const KG_PER_LB: f64 = 0.453_592;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Convert a weight in `unit` to kilograms.
pub(crate) fn to_kg(value: f64, unit: &str) -> Result<f64> {
    match unit.to_lowercase().as_str() {
        "kg" => Ok(value),
        "lbs" | "lb" => Ok(no_neg_zero(value * KG_PER_LB)),
        _ => bail!("Invalid unit '{unit}'. Use 'kg' or 'lbs'"),
    }
}

/// Tell the user when a write did not land where they expect it.
pub(crate) fn report_outcome(outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::Pruned {
            retained_days,
            removed,
        } => eprintln!(
            "Storage was full: removed {removed} log entries older than {retained_days} days"
        ),
        WriteOutcome::Dropped { .. } => eprintln!("Storage is full: this change was not saved"),
        WriteOutcome::Failed => eprintln!("Could not save this change"),
        WriteOutcome::Written | WriteOutcome::Unchanged => {}
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// Print a compact QR code to stderr using Unicode half-block characters.
///
/// Each character encodes two vertical modules, halving the output height.
pub(crate) fn print_qr_code(data: &str) {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to generate QR code: {e}");
            return;
        }
    };

    let width = code.width();
    let colors: Vec<bool> = code
        .into_colors()
        .into_iter()
        .map(|c| c == qrcode::Color::Dark)
        .collect();

    let quiet = 1;
    let total = width + 2 * quiet;

    let is_dark = |row: usize, col: usize| -> bool {
        if row < quiet || row >= quiet + width || col < quiet || col >= quiet + width {
            return false;
        }
        colors[(row - quiet) * width + (col - quiet)]
    };

    eprintln!();
    eprintln!("Scan on your other device:");

    for row in (0..total).step_by(2) {
        let line: String = (0..total)
            .map(|col| {
                let top = is_dark(row, col);
                let bot = row + 1 < total && is_dark(row + 1, col);
                match (top, bot) {
                    (true, true) => '\u{2588}',
                    (true, false) => '\u{2580}',
                    (false, true) => '\u{2584}',
                    (false, false) => ' ',
                }
            })
            .collect();
        eprintln!("{line}");
    }
    eprintln!();
}
