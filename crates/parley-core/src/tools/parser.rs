//! Textual tool-call scanner.
//!
//! Some models ignore native function calling and write calls into their
//! answer text instead. The accepted grammar is:
//!
//! ```text
//! call  := IDENT '{' balanced-json '}'
//! IDENT := a name from the allow-list, not preceded by [A-Za-z0-9_]
//! ```
//!
//! The object must parse as JSON and carry a string `action` field.
//! Anything else (unknown name, unbalanced braces, invalid JSON, missing
//! `action`) silently disqualifies the candidate. Every call in the text is
//! returned, in order of appearance.

use parley_types::tool::TextualToolCall;

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find every textual tool call in `text` whose name is in `allowed`.
pub fn extract_textual_tool_calls(text: &str, allowed: &[String]) -> Vec<TextualToolCall> {
    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('{') {
        let brace = cursor + offset;

        let mut name_start = brace;
        while name_start > cursor && is_ident_byte(bytes[name_start - 1]) {
            name_start -= 1;
        }
        let name = &text[name_start..brace];
        let bounded = name_start == 0 || !is_ident_byte(bytes[name_start - 1]);

        if !name.is_empty() && bounded && allowed.iter().any(|a| a == name) {
            if let Some(end) = find_json_end(text, brace) {
                if let Some(payload) = parse_call_payload(&text[brace..end]) {
                    calls.push(TextualToolCall {
                        tool_name: name.to_string(),
                        start: name_start,
                        end,
                        payload,
                    });
                    cursor = end;
                    continue;
                }
            }
        }
        cursor = brace + 1;
    }

    calls
}

fn parse_call_payload(raw: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("action")?.as_str()?;
    Some(value)
}

/// Return the byte offset one past the bracket that closes the one at
/// `start`, skipping brackets inside JSON strings.
pub fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for (index, &ch) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if ch == b'\\' {
                escape = true;
            } else if ch == b'"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(ch),
            b'}' | b']' => {
                let opening = stack.pop()?;
                if (opening == b'{') != (ch == b'}') {
                    return None;
                }
                if stack.is_empty() {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove the detected call spans from `text`, keeping the prose around them.
pub fn strip_tool_calls(text: &str, calls: &[TextualToolCall]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for call in calls {
        out.push_str(&text[cursor..call.start]);
        cursor = call.end;
    }
    out.push_str(&text[cursor..]);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extracts_consecutive_calls_with_nested_json() {
        let text = r#"foo{"action":"x","n":{"a":1}}bar{"action":"y"}"#;
        let calls = extract_textual_tool_calls(text, &allow(&["foo", "bar"]));

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "foo");
        assert_eq!((calls[0].start, calls[0].end), (0, 29));
        assert_eq!(calls[0].payload["n"]["a"], 1);
        assert_eq!(&text[calls[0].start..calls[0].end], r#"foo{"action":"x","n":{"a":1}}"#);

        assert_eq!(calls[1].tool_name, "bar");
        assert_eq!((calls[1].start, calls[1].end), (29, 46));
        assert_eq!(calls[1].payload, json!({"action": "y"}));
    }

    #[test]
    fn test_ignores_names_outside_allow_list() {
        let text = r#"evil{"action":"rm"} foo{"action":"ok"}"#;
        let calls = extract_textual_tool_calls(text, &allow(&["foo"]));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "foo");
    }

    #[test]
    fn test_name_must_be_a_whole_identifier() {
        let text = r#"myfoo{"action":"x"}"#;
        assert!(extract_textual_tool_calls(text, &allow(&["foo"])).is_empty());
    }

    #[test]
    fn test_missing_action_or_bad_json_disqualifies() {
        let allowed = allow(&["foo"]);
        assert!(extract_textual_tool_calls(r#"foo{"query":"x"}"#, &allowed).is_empty());
        assert!(extract_textual_tool_calls(r#"foo{"action":42}"#, &allowed).is_empty());
        assert!(extract_textual_tool_calls(r#"foo{"action":"x""#, &allowed).is_empty());
        assert!(extract_textual_tool_calls(r#"foo{action: x}"#, &allowed).is_empty());
    }

    #[test]
    fn test_braces_inside_strings_do_not_count() {
        let text = r#"I'll check. http_fetch{"action":"get","url":"https://x.test/?q={paris}"} done"#;
        let calls = extract_textual_tool_calls(text, &allow(&["http_fetch"]));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].payload["url"], "https://x.test/?q={paris}");
        assert_eq!(strip_tool_calls(text, &calls), "I'll check.  done");
    }

    #[test]
    fn test_find_json_end_rejects_mismatched_brackets() {
        assert_eq!(find_json_end(r#"{"a":[1,2]}"#, 0), Some(11));
        assert_eq!(find_json_end(r#"{"a":[1,2}}"#, 0), None);
        assert_eq!(find_json_end(r#"{"a":"\"}"}"#, 0), Some(11));
    }

    #[test]
    fn test_handles_multibyte_text_around_calls() {
        let text = r#"Il fait quel temps à Paris? weather{"action":"current","city":"Paris"}"#;
        let calls = extract_textual_tool_calls(text, &allow(&["weather"]));
        assert_eq!(calls.len(), 1);
        assert_eq!(&text[calls[0].start..calls[0].start + 7], "weather");
    }
}
