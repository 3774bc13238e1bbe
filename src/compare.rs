//! Output comparison for stdout-based judging modes.
//!
//! The cascade is deliberately forgiving: trailing whitespace, line-ending
//! style, blank lines, float formatting, and per-line ordering differences
//! do not fail a submission whose answers are numerically and structurally
//! right. Stages are attempted in order; the first success wins.

/// Relative tolerance for numeric token comparison.
const RELATIVE_TOLERANCE: f64 = 1e-5;

/// Decimal places used by the rounded-set fallback.
const ROUNDING_DECIMALS: i32 = 3;

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    if normalized(actual) == normalized(expected) {
        return true;
    }
    let actual_lines = significant_lines(actual);
    let expected_lines = significant_lines(expected);
    if tokens_equal(&actual_lines, &expected_lines) {
        return true;
    }
    if numeric_tokens_close(&actual_lines, &expected_lines) {
        return true;
    }
    if token_sets_equal(&actual_lines, &expected_lines) {
        return true;
    }
    rounded_number_sets_equal(&actual_lines, &expected_lines)
}

/// Stage 1 normalization: CRLF→LF and trailing-whitespace trim.
fn normalized(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Non-empty lines, each trimmed.
fn significant_lines(text: &str) -> Vec<String> {
    normalized(text)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn line_tokens(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Stage 2: line-by-line, token-by-token exact comparison.
fn tokens_equal(actual: &[String], expected: &[String]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .iter()
        .zip(expected)
        .all(|(a, e)| line_tokens(a) == line_tokens(e))
}

/// Stage 3: like stage 2, but numeric tokens compare with relative
/// tolerance. Non-numeric tokens must still match exactly.
fn numeric_tokens_close(actual: &[String], expected: &[String]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    actual.iter().zip(expected).all(|(a, e)| {
        let a_tokens = line_tokens(a);
        let e_tokens = line_tokens(e);
        a_tokens.len() == e_tokens.len()
            && a_tokens
                .iter()
                .zip(&e_tokens)
                .all(|(at, et)| tokens_close(at, et))
    })
}

fn tokens_close(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) => floats_close(a, e),
        _ => false,
    }
}

fn floats_close(a: f64, e: f64) -> bool {
    if a == e {
        return true;
    }
    (a - e).abs() <= RELATIVE_TOLERANCE * e.abs().max(a.abs())
}

/// Stage 4: per-line token sets; order within a line is ignored.
fn token_sets_equal(actual: &[String], expected: &[String]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    actual.iter().zip(expected).all(|(a, e)| {
        let mut a_tokens = line_tokens(a);
        let mut e_tokens = line_tokens(e);
        a_tokens.sort_unstable();
        a_tokens.dedup();
        e_tokens.sort_unstable();
        e_tokens.dedup();
        a_tokens == e_tokens
    })
}

/// Stage 5: per-line sets of numbers rounded to three decimals, so float
/// noise and ordering differences cancel together. Every token on both
/// sides must parse as a number.
fn rounded_number_sets_equal(actual: &[String], expected: &[String]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    actual.iter().zip(expected).all(|(a, e)| {
        let a_set = rounded_set(a);
        let e_set = rounded_set(e);
        match (a_set, e_set) {
            (Some(a), Some(e)) => a == e,
            _ => false,
        }
    })
}

fn rounded_set(line: &str) -> Option<Vec<i64>> {
    let factor = 10f64.powi(ROUNDING_DECIMALS);
    let mut rounded = line
        .split_whitespace()
        .map(|tok| tok.parse::<f64>().map(|v| (v * factor).round() as i64))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    rounded.sort_unstable();
    rounded.dedup();
    Some(rounded)
}
