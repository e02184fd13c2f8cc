//! Error types for convograph-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the convograph-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A record carried a timestamp that could not be parsed.
    ///
    /// Fatal for the whole load: event ids derive from timestamps.
    #[error("invalid timestamp {value:?} on line {line}")]
    Timestamp { line: usize, value: String },

    /// The log source kind is recognized but cannot be read.
    #[error("unsupported log source: {0}")]
    UnsupportedSource(String),

    /// A file logger still has open handlers, so the log may be incomplete.
    #[error("logging session for {} is still open ({open_handlers} handler(s)); stop logging before visualizing", .log_file.display())]
    LogSessionOpen {
        log_file: PathBuf,
        open_handlers: usize,
    },

    /// No `Session ID:` marker line was found in the log.
    #[error("no session id found in log")]
    MissingSession,

    /// An event referenced an agent name with no agent record.
    #[error("unknown agent, name: {0}")]
    UnknownAgent(String),

    /// An invocation's client could not be resolved by id or wrapper.
    #[error("unknown client, id: {client_id}; no other clients registered with wrapper_id: {wrapper_id}")]
    UnknownClient { client_id: u64, wrapper_id: u64 },

    /// A required field was missing from an event payload.
    #[error("event {event_name:?} is missing payload field {field:?}")]
    MissingField { event_name: String, field: String },

    /// An event needed an active agent in its level but none was set.
    #[error("event {event_name:?} at {event_id} has no active agent to attach to")]
    NoActiveAgent { event_name: String, event_id: String },

    /// A summary payload had an unrecognized shape.
    #[error("cannot extract summary text from event {0}")]
    Summary(String),

    /// A nested level was opened but the log ended before it closed.
    #[error("{kind} opened by event {event_id} was never closed")]
    UnclosedLevel { kind: String, event_id: String },

    /// A level end event appeared with no open nested level.
    #[error("event {event_name:?} at {event_id} closes a level that was never opened")]
    UnexpectedLevelEnd { event_name: String, event_id: String },

    /// Nested levels exceeded the configured depth limit.
    #[error("nesting too deep: more than {limit} nested levels")]
    NestingTooDeep { limit: usize },

    /// The graph renderer failed.
    #[error("render error: {0}")]
    Render(String),

    /// Rendered SVG did not have the expected structure.
    #[error("invalid SVG file: {0}")]
    InvalidSvg(String),
}

/// Result type alias for convograph-core
pub type Result<T> = std::result::Result<T, Error>;
