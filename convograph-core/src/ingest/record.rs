//! Line classification
//!
//! Turns one raw log line into at most one [`LogRecord`]. Record kinds are
//! told apart by discriminator key sets, checked in a fixed priority order:
//!
//! | Priority | Signature | Kind |
//! |----------|-----------|------|
//! | 1 | line starts with the session marker | Session |
//! | 2 | `client_id` + `class` | Client |
//! | 3 | `id` + `agent_name` | Agent |
//! | 4 | `source_id` + `source_name` | Event |
//! | 5 | `invocation_id` | Invocation |
//!
//! Anything else is reported back to the loader, which skips it.

use crate::error::{Error, Result};
use crate::types::{parse_timestamp, Agent, Client, Event, Invocation, LogRecord, Session};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Marker the framework writes when a logging session starts.
pub const SESSION_MARKER: &str = "Started new session with Session ID:";

/// Prefix of the logger's own diagnostic lines.
pub const DIAGNOSTIC_PREFIX: &str = "[file_logger]";

/// Outcome of classifying one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// A recognized record
    Record(LogRecord),
    /// Logger diagnostic output, ignored
    Diagnostic,
    /// Empty or whitespace-only
    Blank,
    /// Not a JSON object, or a record whose fields could not be decoded
    Undecodable(String),
    /// Valid JSON object matching no known record shape
    Unrecognized,
}

// ============================================
// Lenient field decoding
// ============================================

/// Ids are logged as integers, but missing ones are logged as `""` or `null`.
///
/// Missing ids decode as `0`. Negative, fractional or non-numeric ids are
/// rejected so the line is skipped with a warning instead of being keyed
/// under a coerced id.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid id {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid id {:?}", s))),
        Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("invalid id {}", other))),
    }
}

/// Caching flags show up as `0`/`1` as well as booleans.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or_default())
}

// ============================================
// Raw JSON record types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawClient {
    #[serde(deserialize_with = "lenient_u64")]
    client_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    wrapper_id: u64,
    session_id: Option<String>,
    class: String,
    json_state: Option<String>,
    timestamp: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    thread_id: u64,
    #[serde(deserialize_with = "lenient_bool")]
    is_custom_class: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawAgent {
    #[serde(deserialize_with = "lenient_u64")]
    id: u64,
    agent_name: String,
    #[serde(deserialize_with = "lenient_u64")]
    wrapper_id: u64,
    session_id: Option<String>,
    current_time: Option<String>,
    agent_type: Option<String>,
    args: Value,
    #[serde(deserialize_with = "lenient_u64")]
    thread_id: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    #[serde(deserialize_with = "lenient_u64")]
    source_id: u64,
    source_name: String,
    event_name: Option<String>,
    agent_module: Option<String>,
    agent_class: Option<String>,
    json_state: Option<String>,
    timestamp: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    thread_id: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawInvocation {
    invocation_id: String,
    #[serde(deserialize_with = "lenient_u64")]
    client_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    wrapper_id: u64,
    request: Value,
    response: Value,
    #[serde(deserialize_with = "lenient_bool")]
    is_cached: bool,
    #[serde(deserialize_with = "lenient_f64")]
    cost: f64,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    thread_id: u64,
    source_name: Option<String>,
}

// ============================================
// Classification
// ============================================

/// Classify one raw log line.
///
/// `line_number` is 1-based and only used in error messages.
///
/// # Errors
///
/// Returns [`Error::Timestamp`] when a recognized record carries a timestamp
/// that cannot be parsed. Every other problem is reported through
/// [`LineKind`] so the caller can skip the line.
pub fn classify_line(line: &str, line_number: usize) -> Result<LineKind> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix(SESSION_MARKER) {
        let session_id = rest.trim().to_string();
        return Ok(LineKind::Record(LogRecord::Session(Session { session_id })));
    }

    if trimmed.is_empty() {
        return Ok(LineKind::Blank);
    }
    if trimmed.starts_with(DIAGNOSTIC_PREFIX) {
        return Ok(LineKind::Diagnostic);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => return Ok(LineKind::Undecodable(format!("JSON parse error: {}", e))),
    };
    let Value::Object(map) = value else {
        return Ok(LineKind::Undecodable("not a JSON object".to_string()));
    };

    classify_object(map, line_number)
}

fn classify_object(map: Map<String, Value>, line_number: usize) -> Result<LineKind> {
    let has = |key: &str| map.contains_key(key);

    if has("client_id") && has("class") {
        let raw: RawClient = match decode(map) {
            Ok(raw) => raw,
            Err(reason) => return Ok(LineKind::Undecodable(reason)),
        };
        return Ok(LineKind::Record(LogRecord::Client(client_from_raw(raw))));
    }

    if has("id") && has("agent_name") {
        let raw: RawAgent = match decode(map) {
            Ok(raw) => raw,
            Err(reason) => return Ok(LineKind::Undecodable(reason)),
        };
        return agent_from_raw(raw, line_number).map(|a| LineKind::Record(LogRecord::Agent(a)));
    }

    if has("source_id") && has("source_name") {
        let raw: RawEvent = match decode(map) {
            Ok(raw) => raw,
            Err(reason) => return Ok(LineKind::Undecodable(reason)),
        };
        return event_from_raw(raw, line_number);
    }

    if has("invocation_id") {
        let raw: RawInvocation = match decode(map) {
            Ok(raw) => raw,
            Err(reason) => return Ok(LineKind::Undecodable(reason)),
        };
        return invocation_from_raw(raw, line_number)
            .map(|i| LineKind::Record(LogRecord::Invocation(i)));
    }

    Ok(LineKind::Unrecognized)
}

fn decode<T: for<'de> Deserialize<'de>>(map: Map<String, Value>) -> std::result::Result<T, String> {
    serde_json::from_value(Value::Object(map)).map_err(|e| format!("deserialization error: {}", e))
}

fn required_timestamp(value: Option<&str>, line_number: usize) -> Result<f64> {
    let value = value.unwrap_or_default();
    parse_timestamp(value).ok_or_else(|| Error::Timestamp {
        line: line_number,
        value: value.to_string(),
    })
}

fn client_from_raw(raw: RawClient) -> Client {
    Client {
        client_id: raw.client_id,
        wrapper_id: raw.wrapper_id,
        session_id: raw.session_id.unwrap_or_default(),
        class_name: Client::normalize_class_name(&raw.class),
        state_blob: raw.json_state.unwrap_or_default(),
        timestamp: raw.timestamp.unwrap_or_default(),
        thread_id: raw.thread_id,
        is_custom: raw.is_custom_class,
    }
}

fn agent_from_raw(raw: RawAgent, line_number: usize) -> Result<Agent> {
    let created_at = raw.current_time.unwrap_or_default();
    let created_ts = required_timestamp(Some(&created_at), line_number)?;
    let agent_type = raw.agent_type.unwrap_or_default();
    let group_chat_source_id = Agent::group_chat_source(&agent_type, &raw.args);

    Ok(Agent {
        id: raw.id,
        name: raw.agent_name,
        wrapper_id: raw.wrapper_id,
        session_id: raw.session_id.unwrap_or_default(),
        created_at,
        created_ts,
        agent_type,
        init_args: raw.args,
        thread_id: raw.thread_id,
        group_chat_source_id,
    })
}

fn event_from_raw(raw: RawEvent, line_number: usize) -> Result<LineKind> {
    let timestamp = required_timestamp(raw.timestamp.as_deref(), line_number)?;

    let payload = match raw.json_state.as_deref().map(str::trim) {
        None | Some("") => Value::Object(Map::new()),
        Some(state) => match serde_json::from_str(state) {
            Ok(v) => v,
            Err(e) => {
                return Ok(LineKind::Undecodable(format!(
                    "event json_state parse error: {}",
                    e
                )))
            }
        },
    };

    Ok(LineKind::Record(LogRecord::Event(Event {
        event_id: Event::id_for_timestamp(timestamp),
        source_id: raw.source_id,
        source_name: raw.source_name,
        event_name: raw.event_name.unwrap_or_default(),
        agent_module: raw.agent_module.unwrap_or_default(),
        agent_class: raw.agent_class.unwrap_or_default(),
        payload,
        timestamp,
        thread_id: raw.thread_id,
    })))
}

fn invocation_from_raw(raw: RawInvocation, line_number: usize) -> Result<Invocation> {
    let start_time = raw.start_time.unwrap_or_default();
    let start_ts = required_timestamp(Some(&start_time), line_number)?;
    if let Some(end) = raw.end_time.as_deref() {
        required_timestamp(Some(end), line_number)?;
    }

    Ok(Invocation {
        invocation_id: raw.invocation_id,
        client_id: raw.client_id,
        wrapper_id: raw.wrapper_id,
        request: raw.request,
        response: raw.response,
        is_cached: raw.is_cached,
        cost: raw.cost,
        start_time,
        start_ts,
        end_time: raw.end_time,
        thread_id: raw.thread_id,
        source_name: raw.source_name.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> LogRecord {
        match classify_line(line, 1).unwrap() {
            LineKind::Record(r) => r,
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_session_marker() {
        let r = record("Started new session with Session ID: abc-123");
        assert_eq!(
            r,
            LogRecord::Session(Session {
                session_id: "abc-123".to_string()
            })
        );
    }

    #[test]
    fn test_client_line() {
        let r = record(
            r#"{"client_id": 7, "wrapper_id": 3, "session_id": "s", "class": "OpenAIClient", "json_state": "{}", "timestamp": "2024-06-10 12:00:00.000001", "thread_id": 1}"#,
        );
        let LogRecord::Client(c) = r else {
            panic!("expected client")
        };
        assert_eq!(c.client_id, 7);
        assert_eq!(c.wrapper_id, 3);
        assert_eq!(c.class_name, "OpenAI");
        assert!(!c.is_custom);
    }

    #[test]
    fn test_agent_line_with_empty_wrapper() {
        let r = record(
            r#"{"id": 1, "agent_name": "A", "wrapper_id": "", "session_id": "s", "current_time": "2024-06-10 12:00:00.000000", "agent_type": "ConversableAgent", "args": {}, "thread_id": 1}"#,
        );
        let LogRecord::Agent(a) = r else {
            panic!("expected agent")
        };
        assert_eq!(a.name, "A");
        assert_eq!(a.wrapper_id, 0);
        assert_eq!(a.created_ts, 1718020800.0);
        assert_eq!(a.group_chat_source_id, None);
    }

    #[test]
    fn test_event_line_payload() {
        let r = record(
            r#"{"source_id": 2, "source_name": "B", "event_name": "received_message", "agent_module": "m", "agent_class": "C", "json_state": "{\"sender\": \"A\", \"silent\": true}", "timestamp": "2024-06-10 12:00:01.000000", "thread_id": 1}"#,
        );
        let LogRecord::Event(e) = r else {
            panic!("expected event")
        };
        assert_eq!(e.event_name, "received_message");
        assert_eq!(e.payload_str("sender"), Some("A"));
        assert!(e.payload_flag("silent"));
        assert_eq!(e.event_id, "1718020801");
    }

    #[test]
    fn test_event_without_state_gets_empty_object() {
        let r = record(
            r#"{"source_id": 2, "source_name": "B", "event_name": "x", "timestamp": "2024-06-10 12:00:01"}"#,
        );
        let LogRecord::Event(e) = r else {
            panic!("expected event")
        };
        assert!(e.payload.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_event_with_bad_state_is_undecodable() {
        let kind = classify_line(
            r#"{"source_id": 2, "source_name": "B", "event_name": "x", "json_state": "{not json", "timestamp": "2024-06-10 12:00:01"}"#,
            4,
        )
        .unwrap();
        assert!(matches!(kind, LineKind::Undecodable(_)));
    }

    #[test]
    fn test_invocation_line() {
        let r = record(
            r#"{"invocation_id": "inv-1", "client_id": 9, "wrapper_id": 3, "request": {}, "response": "hello", "is_cached": 1, "cost": 0.25, "start_time": "2024-06-10 12:00:02.000000", "thread_id": 1, "source_name": "A"}"#,
        );
        let LogRecord::Invocation(i) = r else {
            panic!("expected invocation")
        };
        assert_eq!(i.invocation_id, "inv-1");
        assert!(i.is_cached);
        assert_eq!(i.cost, 0.25);
        assert_eq!(i.end_time, None);
    }

    #[test]
    fn test_client_signature_wins_over_invocation() {
        // Both carry client_id; only the client has `class`.
        let r = record(
            r#"{"client_id": 1, "class": "X", "invocation_id": "i", "timestamp": "2024-06-10 12:00:00"}"#,
        );
        assert!(matches!(r, LogRecord::Client(_)));
    }

    #[test]
    fn test_bad_timestamp_is_fatal() {
        let err = classify_line(
            r#"{"source_id": 2, "source_name": "B", "event_name": "x", "timestamp": "not a time"}"#,
            12,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timestamp { line: 12, .. }));
    }

    #[test]
    fn test_session_marker_must_lead_the_line() {
        let line = r#"{"source_id": 1, "source_name": "A", "event_name": "received_message", "json_state": "{\"message\": \"Log says Session ID: 42\", \"sender\": \"B\"}", "timestamp": "2024-06-10 12:00:00.000001"}"#;
        let LogRecord::Event(event) = record(line) else {
            panic!("expected event")
        };
        assert_eq!(event.event_name, "received_message");

        assert_eq!(
            record("  Started new session with Session ID: padded "),
            LogRecord::Session(Session {
                session_id: "padded".to_string()
            })
        );
        assert!(matches!(
            classify_line("note: Session ID: 42", 1).unwrap(),
            LineKind::Undecodable(_)
        ));
    }

    #[test]
    fn test_malformed_ids_are_undecodable() {
        let negative = r#"{"client_id": -3, "wrapper_id": 1, "class": "OpenAIClient", "timestamp": "2024-06-10 12:00:00.000001"}"#;
        assert!(
            matches!(classify_line(negative, 1).unwrap(), LineKind::Undecodable(r) if r.contains("invalid id"))
        );

        let garbled = r#"{"client_id": "abc", "wrapper_id": 1, "class": "OpenAIClient", "timestamp": "2024-06-10 12:00:00.000001"}"#;
        assert!(matches!(
            classify_line(garbled, 1).unwrap(),
            LineKind::Undecodable(_)
        ));

        let quoted = r#"{"client_id": "12", "wrapper_id": null, "class": "OpenAIClient", "timestamp": "2024-06-10 12:00:00.000001"}"#;
        let LogRecord::Client(c) = record(quoted) else {
            panic!("expected client")
        };
        assert_eq!((c.client_id, c.wrapper_id), (12, 0));
    }

    #[test]
    fn test_skippable_lines() {
        assert_eq!(classify_line("", 1).unwrap(), LineKind::Blank);
        assert_eq!(
            classify_line("[file_logger] Failed to log event", 1).unwrap(),
            LineKind::Diagnostic
        );
        assert!(matches!(
            classify_line("not json at all", 1).unwrap(),
            LineKind::Undecodable(_)
        ));
        assert!(matches!(
            classify_line("[1, 2]", 1).unwrap(),
            LineKind::Undecodable(_)
        ));
        assert_eq!(
            classify_line(r#"{"foo": 1}"#, 1).unwrap(),
            LineKind::Unrecognized
        );
    }
}
