#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the last stdout line as JSON.
    pub fn json(&self) -> Value {
        let line = self.stdout.lines().last().unwrap_or_else(|| {
            panic!("no stdout; log: {}", self.log_path.display());
        });
        serde_json::from_str(line).unwrap_or_else(|e| {
            panic!("stdout is not JSON ({e}); log: {}", self.log_path.display());
        })
    }
}

/// Isolated data directory plus a config file pointing into it.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub config_path: PathBuf,
}

impl Sandbox {
    /// Sandbox with `batch_size = 2` so batches stay short.
    pub fn new() -> Self {
        Self::build("\n[scheduling]\nbatch_size = 2\n")
    }

    /// Sandbox that keeps the default scheduling section.
    pub fn with_default_scheduling() -> Self {
        Self::build("")
    }

    fn build(extra: &str) -> Self {
        let dir = tempfile::tempdir().expect("create sandbox dir");
        let root = dir.path();
        let config_path = root.join("config.toml");
        let config = format!(
            "[paths]\n\
             database = {:?}\n\
             state_file = {:?}\n\
             stop_signal = {:?}\n\
             activity_log = {:?}\n\
             {extra}",
            root.join("test-data.sqlite3").display().to_string(),
            root.join("session-state.json").display().to_string(),
            root.join("stop-signal.txt").display().to_string(),
            root.join("activity.jsonl").display().to_string(),
        );
        fs::write(&config_path, config).expect("write sandbox config");
        Self { dir, config_path }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).expect("write sandbox file");
        path
    }

    /// Run `qat --config <sandbox> --json <args>`.
    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        let config = self.config_path.to_string_lossy().to_string();
        let mut full = vec!["--config", config.as_str(), "--json"];
        full.extend_from_slice(args);
        run_cli_case(case_name, &full)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_qat") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "qat.exe" } else { "qat" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve qat binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("qat-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env_remove("QAT_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute qat command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
