//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/convograph/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/convograph/` (~/.config/convograph/)
//! - State/Logs: `$XDG_STATE_HOME/convograph/` (~/.local/state/convograph/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Diagram colours, fonts and shapes
    #[serde(default)]
    pub style: StyleConfig,

    /// Renderer and builder settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Visual style of the generated diagram.
///
/// Shapes are Graphviz shape names (<https://graphviz.org/doc/info/shapes.html>).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    /// Placeholder canvas colour, swapped for `url(#bg_pattern)` after rendering.
    /// Must not be used anywhere else in the diagram.
    pub canvas_replace_bg: String,
    pub canvas_pattern_bg: String,
    pub canvas_pattern_color: String,
    pub nested_bg: String,
    pub groupchat_bg: String,
    pub start_bg: String,
    pub start_font_color: String,
    pub start_border_color: String,
    pub fill_color: String,
    pub border_color: String,
    pub font_color: String,
    pub node_font_color: String,
    pub edge_color: String,
    pub edge_success_color: String,
    pub edge_unsuccessful_color: String,
    pub edge_style: String,
    pub edge_style_silent: String,
    pub font_names: String,
    pub label_distance: String,
    pub node_pen_width: String,
    /// Agent fill colours, assigned in order of first appearance and cycled.
    pub palette: Vec<String>,
    pub node_shape: NodeShapes,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            canvas_replace_bg: "#123456".to_string(),
            canvas_pattern_bg: "#222222".to_string(),
            canvas_pattern_color: "#2A2A2A".to_string(),
            nested_bg: "#18184F".to_string(),
            groupchat_bg: "#004F4F".to_string(),
            start_bg: "#222222".to_string(),
            start_font_color: "#FFFFFF".to_string(),
            start_border_color: "#6666FF".to_string(),
            fill_color: "#DDFFF7".to_string(),
            border_color: "#00BE92".to_string(),
            font_color: "#FAFAFA".to_string(),
            node_font_color: "#222222".to_string(),
            edge_color: "#6666FF".to_string(),
            edge_success_color: "#00FF00".to_string(),
            edge_unsuccessful_color: "#FF0000".to_string(),
            edge_style: "solid".to_string(),
            edge_style_silent: "dashed".to_string(),
            font_names: "Helvetica, DejaVu Sans, Arial, Courier, sans-serif".to_string(),
            label_distance: "5.0".to_string(),
            node_pen_width: "3.0".to_string(),
            palette: default_palette(),
            node_shape: NodeShapes::default(),
        }
    }
}

fn default_palette() -> Vec<String> {
    [
        "#FAF4D0", "#C0DFB7", "#EDB7AD", "#FBDBD5", "#E4EEE9", "#CDD5C6", "#A9C9D4", "#E8C4C6",
        "#EBCFB9", "#FF0080", "#808080", "#ADD8E6", "#90EE90", "#FFFFE0",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

/// Graphviz shape per node kind
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeShapes {
    pub agent: String,
    pub summary: String,
    pub terminate: String,
    pub invocation: String,
    pub info: String,
    pub code_execution: String,
    pub custom_reply_func: String,
    pub human: String,
}

impl Default for NodeShapes {
    fn default() -> Self {
        Self {
            agent: "oval".to_string(),
            summary: "parallelogram".to_string(),
            terminate: "octagon".to_string(),
            invocation: "invhouse".to_string(),
            info: "note".to_string(),
            code_execution: "cds".to_string(),
            custom_reply_func: "septagon".to_string(),
            human: "Mdiamond".to_string(),
        }
    }
}

impl StyleConfig {
    /// Validate style settings, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.palette.is_empty() {
            return Err(Error::Config(
                "style.palette must contain at least one colour".to_string(),
            ));
        }
        // These get darkened for borders, so they must be plain hex.
        for color in self
            .palette
            .iter()
            .chain([&self.nested_bg, &self.groupchat_bg])
        {
            if !is_hex_color(color) {
                return Err(Error::Config(format!(
                    "style colour {:?} must be a #RRGGBB hex value",
                    color
                )));
            }
        }
        Ok(())
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Renderer and builder settings
#[derive(Debug, Deserialize)]
pub struct RenderConfig {
    /// Graphviz executable used to lay out the diagram
    #[serde(default = "default_dot_binary")]
    pub dot_binary: String,

    /// Maximum depth of nested chats before the build is aborted
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,

    /// Remove the intermediate graph description after rendering
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dot_binary: default_dot_binary(),
            max_nesting_depth: default_max_nesting_depth(),
            cleanup: default_cleanup(),
        }
    }
}

fn default_dot_binary() -> String {
    "dot".to_string()
}

fn default_max_nesting_depth() -> usize {
    64
}

fn default_cleanup() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.style.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/convograph/config.toml` (~/.config/convograph/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("convograph").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/convograph/` (~/.local/state/convograph/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("convograph")
    }
}
