//! Pipeline facade: log source in, diagram out.

use crate::config::Config;
use crate::error::Result;
use crate::ingest::{self, LoadedLog, LogSource};
use crate::render::{self, dot, svg, GraphRenderer, GraphvizCli};
use crate::scene::{SceneBuilder, SceneGraph};
use std::path::{Path, PathBuf};

/// Renders the conversation recorded in one log source.
///
/// ```rust,ignore
/// let config = Config::load()?;
/// let visualizer = Visualizer::new(LogSource::from_path("runtime.log"), &config);
/// let svg = visualizer.create_svg(Path::new("flow.svg"), true)?;
/// ```
pub struct Visualizer<'c> {
    source: LogSource,
    config: &'c Config,
}

impl<'c> Visualizer<'c> {
    pub fn new(source: LogSource, config: &'c Config) -> Self {
        Self { source, config }
    }

    /// Load the log, requiring a session marker.
    pub fn load(&self) -> Result<LoadedLog> {
        let log = ingest::load_source(&self.source)?;
        let session_id = log.require_session_id()?;
        tracing::info!(
            session_id,
            agents = log.agents.len(),
            events = log.events.len(),
            invocations = log.invocations.len(),
            "Log ready"
        );
        for warning in &log.warnings {
            tracing::debug!(warning = %warning, "Skipped log line");
        }
        Ok(log)
    }

    /// Build the scene graph for an already loaded log.
    pub fn build_scene(&self, log: &LoadedLog) -> Result<SceneGraph> {
        SceneBuilder::new(log, &self.config.style, self.config.render.max_nesting_depth).build()
    }

    /// Load and build.
    pub fn scene(&self) -> Result<SceneGraph> {
        let log = self.load()?;
        self.build_scene(&log)
    }

    /// DOT source of the diagram.
    pub fn to_dot(&self) -> Result<String> {
        let scene = self.scene()?;
        Ok(dot::to_dot(&scene, &self.config.style))
    }

    /// Scene graph as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        let scene = self.scene()?;
        Ok(serde_json::to_string_pretty(&scene)?)
    }

    /// Write the graph description to `<output base>.gv` and return its path.
    pub fn create_dot(&self, output: &Path) -> Result<PathBuf> {
        let dot = self.to_dot()?;
        let path = render::write_dot(&dot, &render::normalize_output_base(output))?;
        tracing::info!(path = %path.display(), "Graph description created");
        Ok(path)
    }

    /// Render the diagram to `<output base>.svg` with the configured Graphviz binary.
    pub fn create_svg(&self, output: &Path, cleanup: bool) -> Result<PathBuf> {
        let renderer = GraphvizCli::new(self.config.render.dot_binary.clone());
        self.create_svg_with(&renderer, output, cleanup)
    }

    /// Render the diagram with a specific renderer, then post-process the SVG.
    pub fn create_svg_with(
        &self,
        renderer: &dyn GraphRenderer,
        output: &Path,
        cleanup: bool,
    ) -> Result<PathBuf> {
        let dot = self.to_dot()?;
        let base = render::normalize_output_base(output);
        let path = renderer.render_svg(&dot, &base, cleanup)?;
        svg::post_process_file(&path, &self.config.style)?;
        tracing::info!(path = %path.display(), "Diagram created");
        Ok(path)
    }
}
