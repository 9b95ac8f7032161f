//! Byte-level scanning for balanced JSON blocks inside free text.
//!
//! Structural characters are ASCII, so byte offsets returned here are always valid `str`
//! slice boundaries.

/// Index of the bracket closing the one at `start`, skipping anything inside JSON strings.
fn find_matching(s: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&open) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Index of the `}` matching the `{` at `start`.
#[must_use]
pub fn find_matching_brace(s: &str, start: usize) -> Option<usize> {
    find_matching(s, start, b'{', b'}')
}

/// Index of the `]` matching the `[` at `start`.
#[must_use]
pub fn find_matching_bracket(s: &str, start: usize) -> Option<usize> {
    find_matching(s, start, b'[', b']')
}

/// Start of the innermost unquoted `{` still open at byte `pos`.
///
/// Returns `None` when `pos` sits inside a string or no object is open.
#[must_use]
pub fn enclosing_object_start(s: &str, pos: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().take(pos) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                open.pop();
            }
            _ => {}
        }
    }

    if in_string {
        None
    } else {
        open.last().copied()
    }
}

/// The balanced object around the first occurrence of any `"key"` that has one.
///
/// Occurrences are tried in text order.
#[must_use]
pub fn object_containing_any_key<'a>(s: &'a str, keys: &[&str]) -> Option<&'a str> {
    let mut hits: Vec<usize> = keys
        .iter()
        .flat_map(|key| {
            let quoted = format!("\"{key}\"");
            s.match_indices(&quoted).map(|(i, _)| i).collect::<Vec<_>>()
        })
        .collect();
    hits.sort_unstable();

    hits.into_iter().find_map(|idx| {
        let start = enclosing_object_start(s, idx)?;
        let end = find_matching_brace(s, start)?;
        Some(&s[start..=end])
    })
}

/// The balanced object around the first `"key"` in `s`.
#[must_use]
pub fn object_containing_key<'a>(s: &'a str, key: &str) -> Option<&'a str> {
    object_containing_any_key(s, &[key])
}

/// The first `{...}` or `[...]` block, whichever opens first.
///
/// When the block is never closed, everything from its opening character on is returned.
#[must_use]
pub fn first_json_block(s: &str) -> Option<&str> {
    let start = s.find(&['{', '['][..])?;
    let end = if s.as_bytes()[start] == b'{' {
        find_matching_brace(s, start)
    } else {
        find_matching_bracket(s, start)
    };
    Some(end.map_or(&s[start..], |end| &s[start..=end]))
}

/// The first balanced `[...]` block.
#[must_use]
pub fn first_balanced_array(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let end = find_matching_bracket(s, start)?;
    Some(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_brace_ignores_strings() {
        let s = r#"{"a": "}{", "b": {"c": "\"}"}} tail"#;
        let end = find_matching_brace(s, 0).unwrap();
        assert_eq!(&s[end + 1..], " tail");
        assert!(find_matching_brace(s, 1).is_none());
        assert!(find_matching_brace("{\"open\": 1", 0).is_none());
    }

    #[test]
    fn test_enclosing_object_skips_closed_siblings() {
        let s = r#"{"meta": {"x": 1}, "decisions": []}"#;
        let idx = s.find("\"decisions\"").unwrap();
        assert_eq!(enclosing_object_start(s, idx), Some(0));
    }

    #[test]
    fn test_object_containing_key_in_prose() {
        let s = r#"Here you go: {"decisions": [{"symbol": "BTCUSDT", "action": "hold"}]} thanks"#;
        assert_eq!(
            object_containing_key(s, "decisions"),
            Some(r#"{"decisions": [{"symbol": "BTCUSDT", "action": "hold"}]}"#)
        );
        assert!(object_containing_key("\"decisions\" without braces", "decisions").is_none());
    }

    #[test]
    fn test_key_inside_string_is_ignored() {
        let s = r#"{"note": "say "decisions" now"} {"decisions": [1]}"#;
        assert_eq!(object_containing_key(s, "decisions"), Some(r#"{"decisions": [1]}"#));
    }

    #[test]
    fn test_first_json_block() {
        assert_eq!(first_json_block("x [1, [2]] {\"a\":1}"), Some("[1, [2]]"));
        assert_eq!(first_json_block("x {\"a\": [1]"), Some("{\"a\": [1]"));
        assert_eq!(first_json_block("no json"), None);
    }

    #[test]
    fn test_first_balanced_array_with_multibyte_text() {
        let s = "决策如下：[{\"symbol\": \"ETHUSDT\"}] 完";
        assert_eq!(first_balanced_array(s), Some("[{\"symbol\": \"ETHUSDT\"}]"));
    }
}
