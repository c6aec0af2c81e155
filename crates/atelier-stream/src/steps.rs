//! Reasoning-step extraction from `<thinking>` block bodies.
//!
//! A thinking block is freeform text with optional `Step N`, `Type:` and
//! `Confidence:` marker lines. Blocks without any `Step N` markers collapse
//! into a single step numbered from a stream-lifetime counter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a reasoning step is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    #[default]
    Analysis,
    Planning,
    Decision,
    Revision,
}

impl StepKind {
    /// Parse from a `Type:` marker value. Case-insensitive; unknown values
    /// leave the step's kind unchanged.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "analysis" => Some(StepKind::Analysis),
            "planning" => Some(StepKind::Planning),
            "decision" => Some(StepKind::Decision),
            "revision" => Some(StepKind::Revision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Analysis => "analysis",
            StepKind::Planning => "planning",
            StepKind::Decision => "decision",
            StepKind::Revision => "revision",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reasoning step extracted from a thinking block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    /// 1-based sequence number, from an explicit `Step N` marker or the
    /// stream-lifetime counter when the block has no markers.
    pub number: u32,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
    /// Confidence in [0, 1]; out-of-range marker values are clamped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set when the step's content mentions revising earlier work.
    #[serde(default)]
    pub is_revision: bool,
}

/// Split the inner text of one thinking block into ordered steps.
///
/// `counter` is the stream-lifetime fallback counter, bumped only when a
/// block contains no `Step N` markers and collapses into a single step.
pub(crate) fn split_steps(inner: &str, counter: &mut u32) -> Vec<ThinkingStep> {
    let mut steps = Vec::new();

    let mut number: Option<u32> = None;
    let mut kind = StepKind::Analysis;
    let mut confidence: Option<f64> = None;
    let mut is_revision = false;
    let mut content: Vec<&str> = Vec::new();

    for raw in inner.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((n, rest)) = match_step_marker(line) {
            flush_step(&mut steps, number, kind, confidence, is_revision, &content);
            number = Some(n);
            kind = StepKind::Analysis;
            confidence = None;
            is_revision = false;
            content = if rest.is_empty() { Vec::new() } else { vec![rest] };
        } else if let Some(value) = marker_value(line, "type:") {
            if let Some(k) = StepKind::parse(value) {
                kind = k;
            }
        } else if let Some(value) = marker_value(line, "confidence:") {
            if let Some(c) = leading_float(value) {
                confidence = Some(c.clamp(0.0, 1.0));
            }
        } else if line.to_lowercase().contains("revis") {
            is_revision = true;
            content.push(line);
        } else {
            content.push(line);
        }
    }
    flush_step(&mut steps, number, kind, confidence, is_revision, &content);

    // No structured steps at all — the whole block is one step.
    if steps.is_empty() && !inner.trim().is_empty() {
        *counter += 1;
        steps.push(ThinkingStep {
            number: *counter,
            kind: StepKind::Analysis,
            content: inner.trim().to_string(),
            confidence: None,
            is_revision: false,
        });
    }

    steps
}

/// A step only counts once it has both a number and non-empty content.
fn flush_step(
    steps: &mut Vec<ThinkingStep>,
    number: Option<u32>,
    kind: StepKind,
    confidence: Option<f64>,
    is_revision: bool,
    content: &[&str],
) {
    let Some(number) = number else { return };
    if content.is_empty() {
        return;
    }
    steps.push(ThinkingStep {
        number,
        kind,
        content: content.join("\n").trim().to_string(),
        confidence,
        is_revision,
    });
}

/// Match a `Step <N>[:] <rest>` marker line. Case-insensitive on "Step".
fn match_step_marker(line: &str) -> Option<(u32, &str)> {
    let rest = strip_prefix_ci(line, "step ")?;
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let number: u32 = rest[..digits].parse().ok()?;
    let mut tail = &rest[digits..];
    if let Some(t) = tail.strip_prefix(':') {
        tail = t;
    }
    Some((number, tail.trim_start()))
}

/// Non-empty value of a `Marker: value` line, or None. Case-insensitive.
fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let value = strip_prefix_ci(line, marker)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Longest numeric prefix of `s` as a float (parseFloat semantics):
/// `"0.8 or so"` reads as `0.8`, `"abc"` reads as nothing.
fn leading_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E') {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    while end > 0 {
        if let Ok(v) = s[..end].parse::<f64>() {
            return Some(v);
        }
        end -= 1;
    }
    None
}
