//! # convograph-core
//!
//! Core library for convograph - turns multi-agent conversation runtime logs
//! into flow diagrams.
//!
//! This library provides:
//! - Domain types for sessions, clients, agents, events and LLM invocations
//! - A line-oriented log loader with deduplication and ordering
//! - A scene-graph builder that replays the conversation level by level
//! - Graphviz DOT rendering and SVG post-processing
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Load:** log lines → records (`ingest`)
//! - **Build:** ordered records → [`SceneGraph`] (`scene`)
//! - **Render:** scene graph → DOT → SVG (`render`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use convograph_core::{Config, LogSource, Visualizer};
//! use std::path::Path;
//!
//! let config = Config::load().expect("failed to load config");
//! let visualizer = Visualizer::new(LogSource::from_path("runtime.log"), &config);
//! visualizer
//!     .create_svg(Path::new("flow.svg"), config.render.cleanup)
//!     .expect("failed to render diagram");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{LoadedLog, LogSource};
pub use scene::{SceneBuilder, SceneGraph};
pub use types::*;
pub use visualize::Visualizer;

// Public modules
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod render;
pub mod scene;
pub mod types;
pub mod visualize;
