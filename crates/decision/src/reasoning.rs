//! Chain-of-thought extraction. Never fails; the worst case is an empty string.

use crate::sanitize::{self, DECISION_OPEN, FENCE_OPEN};
use crate::scan;
use serde_json::{Map, Value};

/// Object keys that may carry the trace, highest priority first.
pub const REASONING_KEYS: [&str; 5] = ["cot_trace", "chain_of_thought", "cot", "reasoning", "analysis"];

/// Reads a trace out of a JSON object text.
///
/// Keys match case-insensitively. String values are trimmed, other values pretty-printed.
fn trace_from_object(text: &str) -> Option<String> {
    let text = text.trim();
    if !text.starts_with('{') {
        return None;
    }
    let object: Map<String, Value> = serde_json::from_str(text).ok()?;

    let value = REASONING_KEYS.iter().find_map(|target| {
        object
            .iter()
            .find(|(key, _)| key.to_lowercase() == *target)
            .map(|(_, value)| value)
    })?;

    let trace = match value {
        Value::String(s) => s.trim().to_string(),
        other => serde_json::to_string_pretty(other).ok()?,
    };
    (!trace.is_empty()).then_some(trace)
}

/// Free text around the JSON payload.
///
/// The prose before the first fence or decision tag, or failing that whatever follows it.
fn surrounding_prose(s: &str) -> String {
    let fence = s.find(FENCE_OPEN);
    let tag = s.find(DECISION_OPEN);
    let cutoff = [fence, tag].into_iter().flatten().min().unwrap_or(s.len());

    let head = s[..cutoff].trim();
    if !head.is_empty() {
        return head.to_string();
    }
    if let Some(idx) = fence {
        return s[idx + FENCE_OPEN.len()..].trim().to_string();
    }
    if let Some(idx) = tag {
        return s[idx + DECISION_OPEN.len()..].trim().to_string();
    }
    String::new()
}

/// Best-effort reasoning trace of a model response.
#[must_use]
pub fn extract_reasoning(raw: &str) -> String {
    let s = sanitize::clean(raw);

    if let Some(inner) = sanitize::reasoning_tag(&s) {
        return inner.trim().to_string();
    }

    let from_fence = sanitize::fenced_json(&s)
        .and_then(|inner| trace_from_object(&sanitize::strip_json_comments(inner)));
    if let Some(trace) = from_fence {
        return trace;
    }

    if let Some(trace) = trace_from_object(&sanitize::sanitize(raw)) {
        return trace;
    }

    let from_scan = scan::object_containing_any_key(&s, &REASONING_KEYS).and_then(trace_from_object);
    if let Some(trace) = from_scan {
        return trace;
    }

    surrounding_prose(&s)
}
