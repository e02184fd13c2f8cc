//! convograph - render multi-agent conversation logs as flow diagrams
//!
//! Reads a runtime log and writes an SVG diagram (via Graphviz), the
//! Graphviz description, or the scene graph as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use convograph_core::{Config, LogSource, Visualizer};

#[derive(Parser)]
#[command(name = "convograph")]
#[command(about = "Render a multi-agent conversation log as a flow diagram")]
#[command(version)]
struct Args {
    /// Runtime log file to visualize
    log: PathBuf,

    /// Output file; a trailing .svg is replaced per format
    /// Defaults to the log path with an .svg extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: svg (default), dot or json
    #[arg(short, long, default_value = "svg")]
    format: String,

    /// Keep the intermediate .gv file next to the SVG
    #[arg(long)]
    keep_dot: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/convograph/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        convograph_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(log = %args.log.display(), format = %args.format, "convograph starting");

    if let Err(e) = run(&args, &config) {
        tracing::error!(error = %format!("{:#}", e), "convograph failed");
        eprintln!("Logs: {}", Config::state_dir().display());
        return Err(e);
    }

    tracing::info!("convograph finished");
    Ok(())
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.log.with_extension("svg"));
    let visualizer = Visualizer::new(LogSource::from_path(&args.log), config);

    match args.format.as_str() {
        "svg" => {
            let cleanup = config.render.cleanup && !args.keep_dot;
            let path = visualizer
                .create_svg(&output, cleanup)
                .with_context(|| format!("failed to render {}", args.log.display()))?;
            println!("{}", path.display());
        }
        "dot" => {
            let path = visualizer
                .create_dot(&output)
                .with_context(|| format!("failed to build diagram for {}", args.log.display()))?;
            println!("{}", path.display());
        }
        "json" => {
            let json = visualizer
                .to_json()
                .with_context(|| format!("failed to build diagram for {}", args.log.display()))?;
            println!("{}", json);
        }
        other => anyhow::bail!("Unknown format '{}' (expected svg, dot or json)", other),
    }
    Ok(())
}
