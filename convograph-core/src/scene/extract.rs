//! Text extraction helpers for labels and tooltips.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Exit code reported when a code execution reply has no `exitcode:` marker.
pub const UNKNOWN_EXIT_CODE: i64 = -1;

const CHAT_COMPLETION_PREFIX: &str = "ChatCompletionMessage(content=";

fn exitcode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"exitcode:\s*(\d+)").expect("valid exitcode regex"))
}

/// Extract the exit code from a code execution reply (`exitcode: 1`).
///
/// Returns [`UNKNOWN_EXIT_CODE`] when no exit code is present.
pub fn extract_code_exitcode(text: &str) -> i64 {
    match exitcode_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        Some(code) => code,
        None => {
            tracing::debug!("Unable to extract exitcode");
            UNKNOWN_EXIT_CODE
        }
    }
}

/// Pick the colour for the `colored`-th agent, cycling through the palette.
pub fn assign_agent_color(palette: &[String], colored: usize) -> &str {
    &palette[colored % palette.len()]
}

/// Darken a `#RRGGBB` colour by `amount` (0.0 – 1.0) of full scale per channel.
///
/// Values that are not `#RRGGBB` are returned unchanged.
pub fn darken_color(color: &str, amount: f64) -> String {
    let Some(c) = color
        .strip_prefix('#')
        .filter(|hex| hex.len() == 6)
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
    else {
        return color.to_string();
    };
    let shift = 255.0 * amount;
    let channel = |v: u32| ((v & 0xFF) as f64 - shift).max(0.0) as u8;
    format!(
        "#{:02X}{:02X}{:02X}",
        channel(c >> 16),
        channel(c >> 8),
        channel(c)
    )
}

/// Keep a string within `max_length` characters, marking cuts with `...`.
pub fn truncate_string(s: &str, max_length: usize) -> String {
    if s.chars().count() <= max_length {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_length.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Tooltip text for a logged message.
///
/// Plain strings are used as-is; message objects contribute their content
/// followed by one line per tool call.
pub fn create_tooltip(message: &Value) -> String {
    match message {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let mut text = match map.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            if let Some(Value::Array(calls)) = map.get("tool_calls") {
                for call in calls {
                    let function = call.get("function").cloned().unwrap_or(Value::Null);
                    text.push_str(&format!("\nTool call: {}", function));
                }
            }
            text
        }
        _ => "Unable to create tooltip".to_string(),
    }
}

/// Display text of a payload value: strings unquoted, null empty, anything
/// else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Summary text from a summary event's `summary` payload.
///
/// Accepts a plain string, `{"summary": {"content": ...}}` or `{"content": ...}`.
pub fn summary_text(summary: &Value) -> Option<String> {
    match summary {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let content = if let Some(inner) = map.get("summary") {
                inner.get("content")
            } else {
                map.get("content")
            }?;
            Some(value_text(content))
        }
        _ => None,
    }
}

/// Response text of an invocation.
///
/// String responses that embed `ChatCompletionMessage(content='...', refusal=...)`
/// are reduced to the unescaped content; anything else is returned whole.
pub fn extract_invocation_response(response: &Value) -> String {
    match response {
        Value::String(s) => chat_completion_content(s).unwrap_or_else(|| s.clone()),
        other => other.to_string(),
    }
}

fn chat_completion_content(response: &str) -> Option<String> {
    for (pos, _) in response.match_indices(CHAT_COMPLETION_PREFIX) {
        let rest = &response[pos + CHAT_COMPLETION_PREFIX.len()..];
        let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            continue;
        };
        let body = &rest[1..];
        if let Some(end) = closing_quote(body, quote) {
            return Some(unescape(&body[..end]));
        }
    }
    None
}

/// Byte offset of the first unescaped `quote` that is followed by `, refusal`,
/// skipping offset 0 so the content is never empty.
fn closing_quote(body: &str, quote: char) -> Option<usize> {
    let mut prev: Option<char> = None;
    for (idx, ch) in body.char_indices() {
        if idx > 0 && ch == quote && prev != Some('\\') {
            let after = body[idx + ch.len_utf8()..].strip_prefix(',');
            if let Some(after) = after {
                if after.trim_start().starts_with("refusal") {
                    return Some(idx);
                }
            }
        }
        prev = Some(ch);
    }
    None
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_code_exitcode() {
        assert_eq!(
            extract_code_exitcode("exitcode: 1 (execution failed)\nCode output: boom"),
            1
        );
        assert_eq!(extract_code_exitcode("... exitcode:0 ..."), 0);
        assert_eq!(extract_code_exitcode("no code ran"), UNKNOWN_EXIT_CODE);
    }

    #[test]
    fn test_color_cycling_wraps() {
        let palette: Vec<String> = ["#000001", "#000002", "#000003"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(assign_agent_color(&palette, 0), "#000001");
        assert_eq!(assign_agent_color(&palette, 2), "#000003");
        assert_eq!(
            assign_agent_color(&palette, palette.len()),
            assign_agent_color(&palette, 0)
        );
    }

    #[test]
    fn test_darken_color() {
        assert_eq!(darken_color("#FFFFFF", 0.0), "#FFFFFF");
        assert_eq!(darken_color("#FF8000", 0.2), "#CC4D00");
        assert_eq!(darken_color("#101010", 1.0), "#000000");
        assert_eq!(darken_color("red", 0.2), "red");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 30), "short");
        let long = "a".repeat(40);
        let cut = truncate_string(&long, 30);
        assert_eq!(cut.chars().count(), 30);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_create_tooltip() {
        assert_eq!(create_tooltip(&json!("hi")), "hi");
        assert_eq!(
            create_tooltip(&json!({"content": null, "tool_calls": [{"function": {"name": "f"}}]})),
            "\nTool call: {\"name\":\"f\"}"
        );
        assert_eq!(create_tooltip(&json!(5)), "Unable to create tooltip");
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("135.80 USD")), "135.80 USD");
        assert_eq!(value_text(&json!(2)), "2");
        assert_eq!(value_text(&Value::Null), "");
    }

    #[test]
    fn test_summary_text_shapes() {
        assert_eq!(summary_text(&json!("done")).as_deref(), Some("done"));
        assert_eq!(
            summary_text(&json!({"summary": {"content": "nested"}})).as_deref(),
            Some("nested")
        );
        assert_eq!(
            summary_text(&json!({"content": "flat"})).as_deref(),
            Some("flat")
        );
        assert_eq!(summary_text(&json!({"other": 1})), None);
        assert_eq!(summary_text(&json!([1])), None);
    }

    #[test]
    fn test_extract_invocation_response_chat_completion() {
        let response = json!(
            "ChatCompletion(id='x', choices=[Choice(message=ChatCompletionMessage(content='It\\'s 42.\\nDone', refusal=None, role='assistant'))])"
        );
        assert_eq!(extract_invocation_response(&response), "It's 42.\nDone");
    }

    #[test]
    fn test_extract_invocation_response_plain() {
        assert_eq!(extract_invocation_response(&json!("plain")), "plain");
        assert_eq!(
            extract_invocation_response(&json!({"content": "x"})),
            "{\"content\":\"x\"}"
        );
    }
}
