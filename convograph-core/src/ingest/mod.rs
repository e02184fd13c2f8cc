//! Ingestion layer for framework log files
//!
//! Reads a line-oriented log, classifies each line into a record kind and
//! collects the records into keyed tables plus one order-preserving sequence
//! that drives the scene builder.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌──────────────────────────┐
//! │  LogSource  │ ──► │ classify_line │ ──► │        LoadedLog         │
//! │ (file, ...) │     │  (per line)   │     │ tables + ordered records │
//! └─────────────┘     └───────────────┘     └──────────────────────────┘
//! ```
//!
//! ## Deduplication
//!
//! | Record | Key | On duplicate |
//! |--------|-----|--------------|
//! | Client | `client_id` | dropped (wrapper map still updated) |
//! | Agent | `id` | stored record replaced, sequence unchanged |
//! | Event | `event_id` (timestamp) | dropped |
//! | Invocation | `invocation_id` | dropped |

mod record;

pub use record::{classify_line, LineKind, DIAGNOSTIC_PREFIX, SESSION_MARKER};

use crate::error::{Error, Result};
use crate::types::{Agent, Client, Event, Invocation, LogRecord, RecordRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================
// Log sources
// ============================================

/// Handle to a file logging session.
///
/// `open_handlers` mirrors the number of handlers still attached to the
/// session's logger; a non-zero count means the log may still be written to.
#[derive(Debug, Clone)]
pub struct FileLoggerHandle {
    pub log_file: PathBuf,
    pub open_handlers: usize,
}

/// Where a log comes from.
#[derive(Debug, Clone)]
pub enum LogSource {
    /// A text log file on disk
    File(PathBuf),
    /// A file logging session; must be stopped before it can be read
    FileLogger(FileLoggerHandle),
    /// A SQLite log database (recognized, not supported)
    Sqlite(PathBuf),
}

impl LogSource {
    /// Pick a source kind from a path's extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_sqlite = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "db" | "sqlite" | "sqlite3"))
            .unwrap_or(false);
        if is_sqlite {
            LogSource::Sqlite(path)
        } else {
            LogSource::File(path)
        }
    }

    /// Resolve the readable text log path, failing fast for unusable sources.
    pub fn log_path(&self) -> Result<&Path> {
        match self {
            LogSource::File(path) => Ok(path),
            LogSource::FileLogger(handle) => {
                if handle.open_handlers != 0 {
                    return Err(Error::LogSessionOpen {
                        log_file: handle.log_file.clone(),
                        open_handlers: handle.open_handlers,
                    });
                }
                Ok(&handle.log_file)
            }
            LogSource::Sqlite(path) => Err(Error::UnsupportedSource(format!(
                "SQLite logs are not supported ({}); use a text log file",
                path.display()
            ))),
        }
    }
}

// ============================================
// Loaded log
// ============================================

/// Agents keyed by id, remembering first-insertion order for name lookups.
#[derive(Debug, Default, Clone)]
pub struct AgentTable {
    agents: Vec<Agent>,
    index: HashMap<u64, usize>,
}

impl AgentTable {
    /// Insert or replace an agent. Returns `true` when the id is new.
    pub fn upsert(&mut self, agent: Agent) -> bool {
        match self.index.get(&agent.id) {
            Some(&pos) => {
                self.agents[pos] = agent;
                false
            }
            None => {
                self.index.insert(agent.id, self.agents.len());
                self.agents.push(agent);
                true
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&Agent> {
        self.index.get(&id).map(|&pos| &self.agents[pos])
    }

    /// First agent (in insertion order) with the given name.
    pub fn by_name(&self, name: &str) -> Result<&Agent> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }
}

/// Everything read from one log.
#[derive(Debug, Default, Clone)]
pub struct LoadedLog {
    /// Session id from the first marker line
    pub session_id: Option<String>,
    pub clients: HashMap<u64, Client>,
    /// wrapper_id → client ids, in the order they were logged
    pub wrapper_clients: HashMap<u64, Vec<u64>>,
    pub agents: AgentTable,
    pub events: HashMap<String, Event>,
    pub invocations: HashMap<String, Invocation>,
    /// Newly accepted records in original line order
    pub ordered: Vec<RecordRef>,
    /// Non-fatal problems encountered while loading
    pub warnings: Vec<String>,
}

impl LoadedLog {
    /// The session id, required by everything downstream of the loader.
    pub fn require_session_id(&self) -> Result<&str> {
        self.session_id.as_deref().ok_or(Error::MissingSession)
    }

    /// Id of the first agent with the given name.
    pub fn agent_id_by_name(&self, name: &str) -> Result<u64> {
        self.agents.by_name(name).map(|a| a.id)
    }

    /// Resolve an invocation's client by id, falling back to the first client
    /// registered under the same wrapper.
    pub fn client_for_invocation(&self, invocation: &Invocation) -> Result<&Client> {
        resolve_client(
            &self.clients,
            &self.wrapper_clients,
            invocation.client_id,
            invocation.wrapper_id,
        )
    }

    fn add_client(&mut self, client: Client) -> bool {
        self.wrapper_clients
            .entry(client.wrapper_id)
            .or_default()
            .push(client.client_id);

        if self.clients.contains_key(&client.client_id) {
            tracing::info!(
                client_id = client.client_id,
                "Client already exists, no duplicate added"
            );
            return false;
        }
        tracing::debug!(client_id = client.client_id, class = %client.class_name, "Client added");
        self.clients.insert(client.client_id, client);
        true
    }

    fn add_agent(&mut self, agent: Agent) -> bool {
        let (id, name) = (agent.id, agent.name.clone());
        let added = self.agents.upsert(agent);
        if added {
            tracing::debug!(agent_id = id, name = %name, "Agent added");
        } else {
            tracing::debug!(agent_id = id, name = %name, "Agent already exists, updating");
        }
        added
    }

    fn add_event(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.event_id) {
            tracing::info!(
                timestamp = event.timestamp,
                event_name = %event.event_name,
                "Event at this timestamp already exists, no duplicate added"
            );
            return false;
        }
        tracing::trace!(timestamp = event.timestamp, source = %event.source_name, event_name = %event.event_name, "Event added");
        self.events.insert(event.event_id.clone(), event);
        true
    }

    fn add_invocation(&mut self, invocation: Invocation) -> bool {
        if self.invocations.contains_key(&invocation.invocation_id) {
            tracing::info!(
                invocation_id = %invocation.invocation_id,
                "Invocation already exists, no duplicate added"
            );
            return false;
        }
        tracing::trace!(invocation_id = %invocation.invocation_id, "Invocation added");
        self.invocations
            .insert(invocation.invocation_id.clone(), invocation);
        true
    }
}

/// Look up a client by id, else the first client registered under `wrapper_id`.
pub fn resolve_client<'a>(
    clients: &'a HashMap<u64, Client>,
    wrapper_clients: &HashMap<u64, Vec<u64>>,
    client_id: u64,
    wrapper_id: u64,
) -> Result<&'a Client> {
    if let Some(client) = clients.get(&client_id) {
        return Ok(client);
    }
    wrapper_clients
        .get(&wrapper_id)
        .and_then(|ids| ids.first())
        .and_then(|first| clients.get(first))
        .ok_or(Error::UnknownClient {
            client_id,
            wrapper_id,
        })
}

// ============================================
// Loading
// ============================================

/// Load a log from any supported source.
pub fn load_source(source: &LogSource) -> Result<LoadedLog> {
    let path = source.log_path()?;
    load_path(path)
}

/// Load a text log file.
pub fn load_path(path: &Path) -> Result<LoadedLog> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })?;
    let log = load_str(&content)?;
    tracing::info!(
        path = %path.display(),
        records = log.ordered.len(),
        warnings = log.warnings.len(),
        "Loaded log"
    );
    Ok(log)
}

/// Load a log from its text content.
///
/// Undecodable and unrecognized lines are skipped and recorded in
/// [`LoadedLog::warnings`]; only timestamp failures abort the load.
pub fn load_str(content: &str) -> Result<LoadedLog> {
    let mut log = LoadedLog::default();

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;

        let record = match classify_line(line, line_number)? {
            LineKind::Record(record) => record,
            LineKind::Blank | LineKind::Diagnostic => continue,
            LineKind::Undecodable(reason) => {
                tracing::warn!(line = line_number, %reason, "Can't decode line, skipping");
                log.warnings
                    .push(format!("Line {}: {}", line_number, reason));
                continue;
            }
            LineKind::Unrecognized => {
                tracing::warn!(line = line_number, "Unknown record shape, skipping");
                log.warnings
                    .push(format!("Line {}: unrecognized record", line_number));
                continue;
            }
        };

        match record {
            LogRecord::Session(session) => {
                if log.session_id.is_none() {
                    tracing::debug!(session_id = %session.session_id, "Session found");
                    log.session_id = Some(session.session_id);
                }
            }
            LogRecord::Client(client) => {
                if client.client_id == 0 {
                    tracing::warn!(line = line_number, "Client record without client_id");
                    log.warnings
                        .push(format!("Line {}: client record without client_id", line_number));
                }
                let key = RecordRef::Client(client.client_id);
                if log.add_client(client) {
                    log.ordered.push(key);
                }
            }
            LogRecord::Agent(agent) => {
                if agent.id == 0 {
                    tracing::warn!(line = line_number, "Agent record without id");
                    log.warnings
                        .push(format!("Line {}: agent record without id", line_number));
                }
                let key = RecordRef::Agent(agent.id);
                if log.add_agent(agent) {
                    log.ordered.push(key);
                }
            }
            LogRecord::Event(event) => {
                let key = RecordRef::Event(event.event_id.clone());
                if log.add_event(event) {
                    log.ordered.push(key);
                }
            }
            LogRecord::Invocation(invocation) => {
                let key = RecordRef::Invocation(invocation.invocation_id.clone());
                if log.add_invocation(invocation) {
                    log.ordered.push(key);
                }
            }
        }
    }

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2024-06-10 12:00:00";

    fn client_line(client_id: u64, wrapper_id: u64, class: &str) -> String {
        format!(
            r#"{{"client_id": {client_id}, "wrapper_id": {wrapper_id}, "session_id": "s", "class": "{class}", "json_state": "{{}}", "timestamp": "{TS}", "thread_id": 1}}"#
        )
    }

    fn agent_line(id: u64, name: &str, agent_type: &str) -> String {
        format!(
            r#"{{"id": {id}, "agent_name": "{name}", "wrapper_id": "", "session_id": "s", "current_time": "{TS}", "agent_type": "{agent_type}", "args": {{}}, "thread_id": 1}}"#
        )
    }

    fn event_line(second: u32, source: &str, event_name: &str) -> String {
        format!(
            r#"{{"source_id": 1, "source_name": "{source}", "event_name": "{event_name}", "agent_module": "m", "agent_class": "C", "json_state": "{{}}", "timestamp": "2024-06-10 12:00:{second:02}", "thread_id": 1}}"#
        )
    }

    fn invocation_line(id: &str, client_id: u64, wrapper_id: u64) -> String {
        format!(
            r#"{{"invocation_id": "{id}", "client_id": {client_id}, "wrapper_id": {wrapper_id}, "request": {{}}, "response": "ok", "is_cached": 0, "cost": 0.1, "start_time": "{TS}", "thread_id": 1, "source_name": "A"}}"#
        )
    }

    #[test]
    fn test_session_id_round_trip() {
        let log = load_str("Started new session with Session ID: abc-123\n").unwrap();
        assert_eq!(log.require_session_id().unwrap(), "abc-123");
    }

    #[test]
    fn test_missing_session_is_reported() {
        let log = load_str(&agent_line(1, "A", "ConversableAgent")).unwrap();
        assert!(matches!(
            log.require_session_id(),
            Err(Error::MissingSession)
        ));
    }

    #[test]
    fn test_first_session_marker_wins() {
        let log = load_str(
            "Started new session with Session ID: first\nStarted new session with Session ID: second\n",
        )
        .unwrap();
        assert_eq!(log.session_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let content = [
            client_line(1, 10, "OpenAIClient"),
            client_line(1, 11, "OtherClient"),
            event_line(1, "A", "first"),
            event_line(1, "A", "second"),
            invocation_line("inv", 1, 10),
            invocation_line("inv", 1, 10),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        assert_eq!(log.clients.len(), 1);
        assert_eq!(log.clients[&1].class_name, "OpenAI");
        assert_eq!(log.events.len(), 1);
        assert_eq!(
            log.events.values().next().unwrap().event_name,
            "first"
        );
        assert_eq!(log.invocations.len(), 1);
        assert_eq!(log.ordered.len(), 3);
    }

    #[test]
    fn test_agent_update_is_last_write_wins() {
        let content = [
            agent_line(1, "A", "ConversableAgent"),
            agent_line(2, "B", "ConversableAgent"),
            agent_line(1, "A", "AssistantAgent"),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        assert_eq!(log.agents.len(), 2);
        assert!(!log.agents.is_empty());
        assert_eq!(log.agents.get(1).unwrap().agent_type, "AssistantAgent");
        let names: Vec<_> = log.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        // Updates do not re-enter the sequence
        assert_eq!(
            log.ordered,
            vec![RecordRef::Agent(1), RecordRef::Agent(2)]
        );
    }

    #[test]
    fn test_wrapper_map_tracks_duplicates() {
        let content = [
            client_line(1, 10, "A"),
            client_line(2, 10, "B"),
            client_line(1, 10, "A"),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();
        assert_eq!(log.wrapper_clients[&10], vec![1, 2, 1]);
    }

    #[test]
    fn test_order_preserved_and_bad_lines_skipped() {
        let content = [
            "Started new session with Session ID: s".to_string(),
            agent_line(1, "A", "ConversableAgent"),
            "garbage".to_string(),
            "[file_logger] Failed to log".to_string(),
            event_line(2, "A", "x"),
            r#"{"unknown": true}"#.to_string(),
            client_line(5, 6, "C"),
            String::new(),
            invocation_line("i1", 5, 6),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        assert_eq!(
            log.ordered,
            vec![
                RecordRef::Agent(1),
                RecordRef::Event(Event::id_for_timestamp(1718020802.0)),
                RecordRef::Client(5),
                RecordRef::Invocation("i1".to_string()),
            ]
        );
        assert_eq!(log.warnings.len(), 2);
        assert!(log.warnings[0].starts_with("Line 3:"));
        assert!(log.warnings[1].starts_with("Line 6:"));
    }

    #[test]
    fn test_session_text_inside_record_is_kept() {
        let message = r#"{"source_id": 1, "source_name": "A", "event_name": "received_message", "json_state": "{\"message\": \"Log says Session ID: 42\", \"sender\": \"B\"}", "timestamp": "2024-06-10 12:00:03"}"#;
        let content = [
            "Started new session with Session ID: s1".to_string(),
            agent_line(1, "A", "ConversableAgent"),
            message.to_string(),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        assert_eq!(log.session_id.as_deref(), Some("s1"));
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.ordered.len(), 2);
        assert!(log.warnings.is_empty());
    }

    #[test]
    fn test_malformed_client_ids_are_reported() {
        let content = [
            r#"{"client_id": -1, "wrapper_id": 10, "class": "OpenAIClient", "timestamp": "2024-06-10 12:00:00"}"#,
            r#"{"client_id": "", "wrapper_id": 10, "class": "OpenAIClient", "timestamp": "2024-06-10 12:00:00"}"#,
            r#"{"client_id": "x", "wrapper_id": 11, "class": "OtherClient", "timestamp": "2024-06-10 12:00:00"}"#,
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        assert_eq!(log.clients.len(), 1);
        assert_eq!(log.warnings.len(), 3);
        assert!(log.warnings[0].starts_with("Line 1:"));
        assert_eq!(log.warnings[1], "Line 2: client record without client_id");
        assert!(log.warnings[2].starts_with("Line 3:"));
    }

    #[test]
    fn test_bad_timestamp_fails_load() {
        let content = r#"{"source_id": 1, "source_name": "A", "event_name": "x", "timestamp": "never"}"#;
        assert!(matches!(
            load_str(content),
            Err(Error::Timestamp { line: 1, .. })
        ));
    }

    #[test]
    fn test_client_resolution_fallback() {
        let content = [
            client_line(1, 10, "FirstClient"),
            client_line(2, 10, "SecondClient"),
            invocation_line("direct", 2, 10),
            invocation_line("fallback", 99, 10),
            invocation_line("missing", 99, 77),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();

        let direct = &log.invocations["direct"];
        assert_eq!(log.client_for_invocation(direct).unwrap().class_name, "Second");

        let fallback = &log.invocations["fallback"];
        assert_eq!(log.client_for_invocation(fallback).unwrap().class_name, "First");

        let missing = &log.invocations["missing"];
        assert!(matches!(
            log.client_for_invocation(missing),
            Err(Error::UnknownClient {
                client_id: 99,
                wrapper_id: 77
            })
        ));
    }

    #[test]
    fn test_agent_lookup_by_name() {
        let content = [
            agent_line(1, "A", "ConversableAgent"),
            agent_line(2, "A", "ConversableAgent"),
        ]
        .join("\n");
        let log = load_str(&content).unwrap();
        assert_eq!(log.agent_id_by_name("A").unwrap(), 1);
        assert!(matches!(
            log.agent_id_by_name("Z"),
            Err(Error::UnknownAgent(name)) if name == "Z"
        ));
    }

    #[test]
    fn test_log_source_selection() {
        assert!(matches!(
            LogSource::from_path("run.log"),
            LogSource::File(_)
        ));
        assert!(matches!(
            LogSource::from_path("logs.DB"),
            LogSource::Sqlite(_)
        ));

        let sqlite = LogSource::from_path("logs.sqlite");
        assert!(matches!(
            sqlite.log_path(),
            Err(Error::UnsupportedSource(_))
        ));

        let open = LogSource::FileLogger(FileLoggerHandle {
            log_file: PathBuf::from("run.log"),
            open_handlers: 1,
        });
        assert!(matches!(
            open.log_path(),
            Err(Error::LogSessionOpen {
                open_handlers: 1,
                ..
            })
        ));

        let closed = LogSource::FileLogger(FileLoggerHandle {
            log_file: PathBuf::from("run.log"),
            open_handlers: 0,
        });
        assert_eq!(closed.log_path().unwrap(), Path::new("run.log"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_source(&LogSource::File(PathBuf::from(
            "/nonexistent/convograph/run.log",
        )))
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
