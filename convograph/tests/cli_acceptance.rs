use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    work: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let work = base.join("work");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");
        fs::create_dir_all(&work).expect("failed to create work dir");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
            work,
        }
    }

    /// Copy a core fixture log into the work directory.
    fn seed_log(&self, name: &str) -> PathBuf {
        let source = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../convograph-core/tests/fixtures")
            .join(name);
        let target = self.work.join(name);
        fs::copy(source, &target).expect("failed to copy fixture log");
        target
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("convograph"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute convograph: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "convograph {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn dot_format_writes_graph_description() {
    let env = CliTestEnv::new();
    let log = path_arg(&env.seed_log("nested.log"));
    let output_path = path_arg(&env.work.join("diagram.svg"));
    let args = ["--format", "dot", "-o", &output_path, &log];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let gv = env.work.join("diagram.gv");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("diagram.gv"), "unexpected stdout:\n{stdout}");

    let dot = fs::read_to_string(&gv).expect("graph description should exist");
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("subgraph \"cluster_0\""));
    assert!(dot.contains("writer (1)"));

    // Logs go to the isolated state directory
    assert!(env.xdg_state.join("convograph").exists());
}

#[test]
fn json_format_prints_scene_graph() {
    let env = CliTestEnv::new();
    let log = path_arg(&env.seed_log("groupchat.log"));
    let args = ["--format", "json", &log];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let scene: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let items = scene["root"]["items"].as_array().expect("root items");
    assert!(items
        .iter()
        .any(|item| item["item"] == "scene" && item["kind"] == "speaker_selection"));
}

#[test]
fn config_file_overrides_style() {
    let env = CliTestEnv::new();
    let log = path_arg(&env.seed_log("simple.log"));
    let config_path = env.work.join("custom.toml");
    fs::write(
        &config_path,
        "[style]\nedge_color = \"#ABCDEF\"\npalette = [\"#010203\"]\n",
    )
    .expect("failed to write config");
    let config_arg = path_arg(&config_path);
    let args = ["--config", &config_arg, "--format", "dot", &log];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let dot = fs::read_to_string(env.work.join("simple.gv")).expect("graph description");
    assert!(dot.contains("color=\"#ABCDEF\""));
    assert!(dot.contains("fillcolor=\"#010203\""));
}

#[test]
fn missing_session_marker_fails() {
    let env = CliTestEnv::new();
    let log = env.work.join("no-session.log");
    let content = fs::read_to_string(env.seed_log("simple.log")).expect("fixture");
    let without_marker: String = content
        .lines()
        .skip(1)
        .map(|line| format!("{line}\n"))
        .collect();
    fs::write(&log, without_marker).expect("failed to write log");

    let log_arg = path_arg(&log);
    let output = run_bin(&env, &["--format", "dot", &log_arg]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("session"), "unexpected stderr:\n{stderr}");
    let log_dir = env.xdg_state.join("convograph");
    assert!(
        stderr.contains(&format!("Logs: {}", log_dir.display())),
        "unexpected stderr:\n{stderr}"
    );
}

#[test]
fn unknown_format_is_rejected() {
    let env = CliTestEnv::new();
    let log = path_arg(&env.seed_log("simple.log"));
    let output = run_bin(&env, &["--format", "png", &log]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown format 'png'"));
}

#[test]
fn dotted_output_name_is_kept() {
    let env = CliTestEnv::new();
    let log = path_arg(&env.seed_log("simple.log"));
    let output_path = path_arg(&env.work.join("flow.v2.svg"));
    let args = ["--format", "dot", "-o", &output_path, &log];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    assert!(env.work.join("flow.v2.gv").exists());
    assert!(!env.work.join("flow.gv").exists());
}
