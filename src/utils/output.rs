/// Child output protocol
/// The isolated child writes free-form log lines plus exactly one result line
/// `Wrapper: Time(<secs>) Score(<score>)` and optionally one detail line
/// `Wrapper: Detail(<json>)` carrying the full evaluation result.
use crate::config::types::{EvaluationResult, Result};
use log::Level;
use once_cell::sync::Lazy;
use regex::Regex;

pub const RESULT_PREFIX: &str = "Wrapper: ";
const DETAIL_OPEN: &str = "Wrapper: Detail(";

/// Log target for re-emitted child lines
pub const CHILD_LOG_TARGET: &str = "evalbox::child";

static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Wrapper: Time\(([.\d]+)\) Score\(([.\deE+-]+)\)$")
        .expect("result line pattern is valid")
});

/// Level a child line is re-emitted at, decided by substring
pub fn classify_line(line: &str) -> Level {
    if line.contains("DEBUG") {
        Level::Debug
    } else if line.contains("WARN") {
        Level::Warn
    } else if line.contains("ERROR") {
        Level::Error
    } else {
        Level::Info
    }
}

/// Re-emit one child line through `log`
pub fn emit_child_line(line: &str) {
    log::log!(target: CHILD_LOG_TARGET, classify_line(line), "{}", line);
}

/// Parse `(time, score)` from a result line. The whole trimmed line must
/// match; text that merely embeds a result is an ordinary log line.
pub fn parse_result_line(line: &str) -> Option<(f64, f64)> {
    let caps = RESULT_LINE.captures(line.trim())?;
    let time = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let score = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((time, score))
}

/// Render a result line. Scores that would print as `inf`/`NaN` must already
/// be mapped to finite values by the caller.
pub fn format_result_line(time: f64, score: f64) -> String {
    let time = if time.is_finite() && time >= 0.0 { time } else { 0.0 };
    format!("{}Time({}) Score({})", RESULT_PREFIX, time, format_score(score))
}

fn format_score(score: f64) -> String {
    // Plain Display would print 1e100 as a 101-digit integer
    if score != 0.0 && (score.abs() >= 1e15 || score.abs() < 1e-6) {
        format!("{:e}", score)
    } else {
        format!("{}", score)
    }
}

pub fn format_detail_line(result: &EvaluationResult) -> Result<String> {
    Ok(format!("{}{})", DETAIL_OPEN, serde_json::to_string(result)?))
}

/// Parse a detail line; malformed JSON is treated as absent
pub fn parse_detail_line(line: &str) -> Option<EvaluationResult> {
    let body = line.trim().strip_prefix(DETAIL_OPEN)?.strip_suffix(')')?;
    serde_json::from_str(body).ok()
}
