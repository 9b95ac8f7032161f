//! Text cleanup applied to raw model output before any JSON decoding.

use crate::scan;
use once_cell::sync::Lazy;
use regex::Regex;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("fence pattern compiles"));
static DECISION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<decision>(.*?)</decision>").expect("decision tag pattern compiles"));
static REASONING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").expect("reasoning tag pattern compiles"));
static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(//|#).*?$").expect("line comment pattern compiles"));
static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern compiles"));

/// Zero-width characters and the byte-order mark.
const INVISIBLE: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Markers where free-text prose ends and a JSON payload begins.
pub const FENCE_OPEN: &str = "```json";
pub const DECISION_OPEN: &str = "<decision>";

#[must_use]
pub fn strip_invisible(s: &str) -> String {
    s.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

/// Maps typographic quotes, full-width JSON punctuation and CJK brackets to ASCII.
#[must_use]
pub fn normalize_punctuation(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '［' | '【' | '〔' => '[',
            '］' | '】' | '〕' => ']',
            '｛' => '{',
            '｝' => '}',
            '：' => ':',
            '，' | '、' => ',',
            '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// Removes `/* */` blocks, then whole lines starting with `//` or `#`.
///
/// Not string-aware: only call it on text expected to be JSON.
#[must_use]
pub fn strip_json_comments(s: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(s, "");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

/// Content of the first ```` ```json ```` fence.
#[must_use]
pub fn fenced_json(s: &str) -> Option<&str> {
    JSON_FENCE.captures(s).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Content of the first `<decision>` tag.
#[must_use]
pub fn decision_tag(s: &str) -> Option<&str> {
    DECISION_TAG.captures(s).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Content of the first `<reasoning>` tag.
#[must_use]
pub fn reasoning_tag(s: &str) -> Option<&str> {
    REASONING_TAG.captures(s).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Trimmed response with invisible characters removed.
#[must_use]
pub fn clean(raw: &str) -> String {
    strip_invisible(raw).trim().to_string()
}

/// Best-effort JSON payload of a model response.
///
/// Preference order: fenced JSON, `<decision>` tag, the object holding `"decisions"`, the first
/// `{`/`[` block. Comments are stripped from whichever is chosen. When nothing looks like JSON
/// the cleaned text itself is returned.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let s = normalize_punctuation(&clean(raw));

    let payload = fenced_json(&s)
        .or_else(|| decision_tag(&s))
        .or_else(|| scan::object_containing_key(&s, "decisions"))
        .or_else(|| scan::first_json_block(&s))
        .unwrap_or(s.as_str());

    strip_json_comments(payload.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invisible_characters_removed() {
        assert_eq!(clean("\u{FEFF}  {\"a\":\u{200B}1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_full_width_punctuation_normalized() {
        let s = "｛“decisions”：［｛“symbol”：“BTCUSDT”，“action”：“hold”｝］｝";
        assert_eq!(
            normalize_punctuation(s),
            r#"{"decisions":[{"symbol":"BTCUSDT","action":"hold"}]}"#
        );
        assert_eq!(normalize_punctuation("【1、2〕\u{3000}"), "[1,2] ");
    }

    #[test]
    fn test_comments_stripped() {
        let s = "{\n  // leading note\n  \"a\": 1, /* inline */\n  # hash note\n  \"b\": 2\n}";
        let stripped = strip_json_comments(s);
        assert!(!stripped.contains("note"));
        assert!(!stripped.contains("inline"));
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn test_fence_preferred_over_tag() {
        let raw = "thinking...\n```json\n{\"decisions\": []}\n```\n<decision>[1]</decision>";
        assert_eq!(sanitize(raw), "{\"decisions\": []}");
    }

    #[test]
    fn test_fence_label_is_case_insensitive() {
        assert_eq!(sanitize("```JSON\n[1]\n```"), "[1]");
    }

    #[test]
    fn test_decision_tag_used_without_fence() {
        let raw = "<reasoning>calm market</reasoning>\n<decision>\n[{\"symbol\":\"ETHUSDT\"}]\n</decision>";
        assert_eq!(sanitize(raw), "[{\"symbol\":\"ETHUSDT\"}]");
    }

    #[test]
    fn test_decisions_object_found_in_prose() {
        let raw = "I see [levels] here. Result: {\"decisions\": [{\"action\": \"wait\"}]} done";
        assert_eq!(sanitize(raw), "{\"decisions\": [{\"action\": \"wait\"}]}");
    }

    #[test]
    fn test_unbalanced_block_kept_to_end() {
        assert_eq!(sanitize("prefix [{\"a\": 1}"), "[{\"a\": 1}");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(sanitize("  nothing to see  "), "nothing to see");
    }
}
