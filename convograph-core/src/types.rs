//! Core record types for convograph
//!
//! These types represent the records written by a multi-agent conversation
//! framework's file logger. Every record is immutable once parsed; diagram
//! state (occurrence numbers, colours) lives in the scene builder instead.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One run of the framework; identified by the log's marker line |
//! | **Client** | An LLM client instance, grouped under a logical wrapper |
//! | **Wrapper** | A group of interchangeable clients (e.g. retry fallbacks) sharing one `wrapper_id` |
//! | **Agent** | A conversational participant; may appear many times in the diagram |
//! | **Event** | A lifecycle point: message received, reply function executed, summary, ... |
//! | **Invocation** | A single LLM call made through a client |

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Agent type string for group chat managers
pub const GROUP_CHAT_MANAGER: &str = "GroupChatManager";

// ============================================
// Session
// ============================================

/// Marker for one framework run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: String,
}

// ============================================
// Client
// ============================================

/// An LLM client instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub client_id: u64,
    /// Logical wrapper this client belongs to
    pub wrapper_id: u64,
    pub session_id: String,
    /// Client class name with any trailing `Client` suffix removed
    pub class_name: String,
    /// Serialized client configuration, kept verbatim
    pub state_blob: String,
    pub timestamp: String,
    pub thread_id: u64,
    pub is_custom: bool,
}

impl Client {
    /// Normalize a logged class name (`OpenAIClient` → `OpenAI`).
    pub fn normalize_class_name(class_name: &str) -> String {
        class_name
            .strip_suffix("Client")
            .unwrap_or(class_name)
            .to_string()
    }
}

impl std::fmt::Display for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client ({}) - {}", self.client_id, self.class_name)
    }
}

// ============================================
// Agent
// ============================================

/// A conversational agent.
///
/// One agent identity may be drawn many times; see
/// [`crate::scene::AgentRenderState`] for the per-occurrence state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub id: u64,
    pub name: String,
    pub wrapper_id: u64,
    pub session_id: String,
    /// Creation time as logged
    pub created_at: String,
    /// Creation time as Unix seconds
    pub created_ts: f64,
    pub agent_type: String,
    /// Constructor arguments as logged
    pub init_args: serde_json::Value,
    pub thread_id: u64,
    /// Source id of the managed group chat, for group chat managers only
    pub group_chat_source_id: Option<u64>,
}

impl Agent {
    /// Extract the group chat source id from a manager's init args.
    ///
    /// Only `GroupChatManager` agents carry one, under `self._groupchat_sourceid`.
    pub fn group_chat_source(agent_type: &str, init_args: &serde_json::Value) -> Option<u64> {
        if agent_type != GROUP_CHAT_MANAGER {
            return None;
        }
        init_args
            .get("self")
            .and_then(|s| s.get("_groupchat_sourceid"))
            .and_then(|v| v.as_u64())
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent ({}) - {}", self.id, self.name)
    }
}

// ============================================
// Event
// ============================================

/// A single lifecycle point logged by an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Derived from the timestamp; doubles as the diagram node id
    pub event_id: String,
    pub source_id: u64,
    /// Name of the agent that logged the event
    pub source_name: String,
    pub event_name: String,
    pub agent_module: String,
    pub agent_class: String,
    /// Parsed `json_state`; an empty object when absent
    pub payload: serde_json::Value,
    /// Unix seconds
    pub timestamp: f64,
    pub thread_id: u64,
}

impl Event {
    /// Derive the event id for a Unix timestamp.
    pub fn id_for_timestamp(timestamp: f64) -> String {
        format!("{}", timestamp)
    }

    /// String payload field, if present.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    /// Boolean payload field; absent or non-boolean reads as `false`.
    pub fn payload_flag(&self, field: &str) -> bool {
        self.payload
            .get(field)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Event ({}) - {}, {}, {}, {}",
            self.timestamp, self.source_name, self.event_name, self.agent_module, self.agent_class
        )
    }
}

// ============================================
// Invocation
// ============================================

/// One LLM call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub invocation_id: String,
    pub client_id: u64,
    pub wrapper_id: u64,
    pub request: serde_json::Value,
    /// Either a JSON object or the client's string rendering of its response
    pub response: serde_json::Value,
    pub is_cached: bool,
    pub cost: f64,
    pub start_time: String,
    /// `start_time` as Unix seconds
    pub start_ts: f64,
    pub end_time: Option<String>,
    pub thread_id: u64,
    pub source_name: String,
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invocation ({})", self.invocation_id)
    }
}

// ============================================
// Tagged records
// ============================================

/// A classified log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Session(Session),
    Client(Client),
    Agent(Agent),
    Event(Event),
    Invocation(Invocation),
}

/// Key-only handle into a [`crate::ingest::LoadedLog`] collection.
///
/// The ordered record sequence stores these rather than the records, so an
/// agent whose record is logged again resolves to its latest version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum RecordRef {
    Client(u64),
    Agent(u64),
    Event(String),
    Invocation(String),
}

// ============================================
// Timestamps
// ============================================

/// Parse a logged timestamp into Unix seconds.
///
/// Accepts RFC 3339 and the logger's naive `YYYY-MM-DD HH:MM:SS.ffffff`
/// form (space or `T` separated, fraction optional). Naive values are UTC.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    let dt = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|naive| naive.and_utc())
        })?;
    Some(dt.timestamp_micros() as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_naive() {
        let ts = parse_timestamp("2024-06-10 12:00:00.500000").unwrap();
        assert_eq!(ts, 1718020800.5);
        let ts = parse_timestamp("2024-06-10T12:00:00").unwrap();
        assert_eq!(ts, 1718020800.0);
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts = parse_timestamp("2024-06-10T14:00:00+02:00").unwrap();
        assert_eq!(ts, 1718020800.0);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_event_id_distinct_per_timestamp() {
        assert_eq!(Event::id_for_timestamp(1718020800.5), "1718020800.5");
        assert_ne!(
            Event::id_for_timestamp(1718020800.5),
            Event::id_for_timestamp(1718020800.25)
        );
    }

    #[test]
    fn test_client_class_name_suffix() {
        assert_eq!(Client::normalize_class_name("OpenAIClient"), "OpenAI");
        assert_eq!(Client::normalize_class_name("Gemini"), "Gemini");
        // Only a trailing suffix is removed
        assert_eq!(
            Client::normalize_class_name("ClientProxyClient"),
            "ClientProxy"
        );
    }

    #[test]
    fn test_group_chat_source() {
        let args = json!({"self": {"_groupchat_sourceid": 42}});
        assert_eq!(Agent::group_chat_source("GroupChatManager", &args), Some(42));
        assert_eq!(Agent::group_chat_source("ConversableAgent", &args), None);
        assert_eq!(
            Agent::group_chat_source("GroupChatManager", &json!({})),
            None
        );
    }
}
