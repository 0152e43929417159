//! Turns raw completion text into typed results.
//!
//! Every operation tries structured mode first: the text (or a fenced / embedded
//! JSON object inside it) deserializes into the target shape. JSON of any other
//! shape is a parse error. Only text with no JSON object in it goes to the
//! line-oriented fallback. Bounds are enforced the same way for both modes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExploreError, Result};
use crate::utils::truncate_chars;

pub const MAX_SUB_PROBLEMS: usize = 8;
pub const MIN_OPTIONS: usize = 5;
const RAW_LOG_CAP_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecomposeResult {
    pub sub_problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsResult {
    pub recommended: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
}

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*•+]+\s+|\(?\d{1,3}[.):]\s*|#{1,6}\s+)").expect("list marker pattern")
});

static FIELD_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^"?(?:sub[_ ]?problems|recommended|recommendation|options|summary)"?\s*:\s*"#)
        .expect("field label pattern")
});

static JSON_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"[^"]*"\s*:"#).expect("json pair pattern"));

const SHAPE_MISMATCH: &str = "JSON object does not match the expected shape";

/// Outcome of looking for a JSON answer in the completion text.
enum Structured<T> {
    Parsed(T),
    /// JSON was present but not in the target shape
    Mismatch,
    NotJson,
}

pub fn normalize_decompose(raw: &str) -> Result<DecomposeResult> {
    const OP: &str = "decompose";
    let candidate = match parse_structured::<DecomposeResult>(raw) {
        Structured::Parsed(parsed) => parsed.sub_problems,
        Structured::Mismatch => return Err(parse_error(OP, raw, SHAPE_MISMATCH)),
        Structured::NotJson => {
            log_fallback(OP, raw);
            decompose_fallback(raw)
        }
    };

    let sub_problems: Vec<String> = candidate
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .take(MAX_SUB_PROBLEMS)
        .collect();
    if sub_problems.is_empty() {
        return Err(parse_error(OP, raw, "no sub-problems recovered"));
    }
    Ok(DecomposeResult { sub_problems })
}

pub fn normalize_options(raw: &str) -> Result<OptionsResult> {
    const OP: &str = "options";
    let candidate = match parse_structured::<OptionsResult>(raw) {
        Structured::Parsed(parsed) => parsed,
        Structured::Mismatch => return Err(parse_error(OP, raw, SHAPE_MISMATCH)),
        Structured::NotJson => {
            log_fallback(OP, raw);
            options_fallback(raw)
        }
    };

    if candidate.recommended.trim().is_empty() {
        return Err(parse_error(OP, raw, "missing recommendation"));
    }
    let options: Vec<String> = candidate
        .options
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();
    if options.len() < MIN_OPTIONS {
        return Err(parse_error(
            OP,
            raw,
            &format!("only {} options recovered, need {}", options.len(), MIN_OPTIONS),
        ));
    }
    Ok(OptionsResult {
        recommended: candidate.recommended,
        options,
    })
}

pub fn normalize_summary(raw: &str) -> Result<SummaryResult> {
    const OP: &str = "summary";
    let summary = match parse_structured::<SummaryResult>(raw) {
        Structured::Parsed(parsed) => parsed.summary,
        Structured::Mismatch => return Err(parse_error(OP, raw, SHAPE_MISMATCH)),
        Structured::NotJson => {
            log_fallback(OP, raw);
            summary_fallback(raw)
        }
    };

    if summary.trim().is_empty() {
        return Err(parse_error(OP, raw, "empty summary"));
    }
    Ok(SummaryResult { summary })
}

/// One sub-problem per line, list markers removed, empties dropped, capped at 8.
pub fn decompose_fallback(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(clean_line)
        .take(MAX_SUB_PROBLEMS)
        .collect()
}

/// First meaningful line is the recommendation, every later line an option.
/// Bounds are not checked here.
pub fn options_fallback(raw: &str) -> OptionsResult {
    let mut lines = raw.lines().filter_map(clean_line);
    let recommended = lines.next().unwrap_or_default();
    OptionsResult {
        recommended,
        options: lines.collect(),
    }
}

/// The whole text, trimmed.
pub fn summary_fallback(raw: &str) -> String {
    raw.trim().to_string()
}

/// Structured mode: the whole text, the text without a markdown fence, then each
/// top-level `{...}` object found in it. An object or array that fails to
/// deserialize into `T` is a mismatch rather than free text.
fn parse_structured<T: DeserializeOwned>(raw: &str) -> Structured<T> {
    let trimmed = raw.trim();
    let unfenced = strip_code_fence(trimmed);
    let mut mismatch = false;

    for candidate in [trimmed, unfenced]
        .into_iter()
        .chain(extract_json_candidates(unfenced))
    {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if !value.is_object() {
            mismatch |= value.is_array();
            continue;
        }
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Structured::Parsed(parsed),
            Err(_) => mismatch = true,
        }
    }

    if mismatch {
        Structured::Mismatch
    } else {
        Structured::NotJson
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Top-level JSON object spans in `text`, in order of appearance.
fn extract_json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        candidates.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

/// Strip list markers, a leading field label, JSON punctuation and quotes.
/// Lines without any alphanumeric content, or still shaped like a
/// `"key": value` pair, are dropped.
fn clean_line(line: &str) -> Option<String> {
    let mut s = line.trim();
    if let Some(m) = LIST_MARKER.find(s) {
        s = &s[m.end()..];
    }
    if let Some(m) = FIELD_LABEL.find(s) {
        s = &s[m.end()..];
    }
    if JSON_PAIR.is_match(s.trim_start_matches(|c: char| c.is_whitespace() || c == '{')) {
        return None;
    }
    let s = s
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']' | '{' | '}'))
        .trim_matches('"')
        .trim();

    if s.chars().any(char::is_alphanumeric) {
        Some(s.to_string())
    } else {
        None
    }
}

fn log_fallback(operation: &str, raw: &str) {
    tracing::warn!(
        "{} response was not a structured JSON object, using line fallback ({} chars)",
        operation,
        raw.chars().count()
    );
}

fn parse_error(operation: &str, raw: &str, reason: &str) -> ExploreError {
    tracing::warn!(
        "Unusable {} response ({}): {}",
        operation,
        reason,
        truncate_chars(raw.trim(), RAW_LOG_CAP_CHARS)
    );
    ExploreError::Parse {
        operation: operation.to_string(),
        message: reason.to_string(),
    }
}
