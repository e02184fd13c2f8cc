//! Rendering adapter
//!
//! Turns a [`SceneGraph`](crate::scene::SceneGraph) into Graphviz DOT
//! ([`dot`]), hands the DOT to a [`GraphRenderer`] and post-processes the
//! resulting SVG ([`svg`]).

pub mod dot;
pub mod svg;

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Extension of the intermediate graph description file.
pub const DOT_EXTENSION: &str = "gv";

/// Converts DOT source into an SVG file.
///
/// Implementations write `<base>.svg` and return its path.
pub trait GraphRenderer {
    fn render_svg(&self, dot: &str, base: &Path, cleanup: bool) -> Result<PathBuf>;
}

/// Renders by shelling out to the Graphviz `dot` binary.
#[derive(Debug, Clone)]
pub struct GraphvizCli {
    pub binary: String,
}

impl GraphvizCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for GraphvizCli {
    fn default() -> Self {
        Self::new("dot")
    }
}

impl GraphRenderer for GraphvizCli {
    fn render_svg(&self, dot: &str, base: &Path, cleanup: bool) -> Result<PathBuf> {
        let gv_path = write_dot(dot, base)?;
        let svg_path = with_suffix(base, "svg");

        tracing::debug!(
            binary = %self.binary,
            input = %gv_path.display(),
            output = %svg_path.display(),
            "Running Graphviz"
        );
        let output = Command::new(&self.binary)
            .arg("-Tsvg")
            .arg("-o")
            .arg(&svg_path)
            .arg(&gv_path)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::Render(format!(
                    "Graphviz binary '{}' not found; install Graphviz or set render.dot_binary",
                    self.binary
                )),
                _ => Error::Render(format!("Failed to run '{}': {}", self.binary, e)),
            })?;

        if !output.status.success() {
            return Err(Error::Render(format!(
                "'{}' exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if cleanup {
            if let Err(e) = std::fs::remove_file(&gv_path) {
                tracing::warn!(path = %gv_path.display(), error = %e, "Failed to remove graph description file");
            }
        }
        Ok(svg_path)
    }
}

/// Write DOT source to `<base>.gv`.
pub fn write_dot(dot: &str, base: &Path) -> Result<PathBuf> {
    let path = with_suffix(base, DOT_EXTENSION);
    std::fs::write(&path, dot)?;
    tracing::debug!(path = %path.display(), bytes = dot.len(), "Graph description written");
    Ok(path)
}

/// `<base>.<extension>`, keeping any dots already in the file name.
pub fn with_suffix(base: &Path, extension: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

/// Output path without a trailing `.svg` (any case).
pub fn normalize_output_base(output: &Path) -> PathBuf {
    match output.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("svg") => output.with_extension(""),
        _ => output.to_path_buf(),
    }
}
