//! Yolk CLI - binary entry point.
//!
//! Speaks LSP on stdin/stdout. stdout carries protocol frames only, so all
//! logging goes to `~/.yolk/logs/yolk.log` (or stderr when no log file can
//! be opened).

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use yolk_config::YolkConfig;

const USAGE: &str = "\
Usage: yolk [--stdio]

Language server that reports GHCi diagnostics to the editor.
Communicates over stdin/stdout.

Options:
      --stdio    Use stdio transport (the default and only transport)
  -h, --help     Print help
  -V, --version  Print version

Configuration: $YOLK_CONFIG or ~/.yolk/config.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            "-V" | "--version" => {
                println!("{} {}", yolk_lsp::SERVER_NAME, env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--stdio" => {}
            other => {
                eprintln!("yolk: ignoring unknown argument {other:?}");
            }
        }
    }

    // Tracing is not up yet; collect problems and report them once it is.
    let mut warnings = Vec::new();
    let config = match YolkConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            warnings.push(format!("{e}; using defaults"));
            YolkConfig::default()
        }
    };

    init_tracing(config.log_level(), warnings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting yolk");

    let result = yolk_lsp::serve(tokio::io::stdin(), tokio::io::stdout(), config.ghci()).await;
    match &result {
        Ok(()) => tracing::info!("Exiting"),
        Err(e) => tracing::error!("Exiting: {e:#}"),
    }
    result
}

fn init_tracing(level: Option<&str>, mut warnings: Vec<String>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|e| {
            warnings.push(format!("Invalid log level {level:?}: {e}"));
            EnvFilter::new("info")
        });

    let (log_file, init_warnings) = open_log_file();
    warnings.extend(init_warnings);

    match log_file {
        Some((log_path, file)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::info!(path = %log_path.display(), "Logging initialized");
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
        }
    }

    for warning in warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.yolk/logs/yolk.log
    if let Some(dir) = yolk_config::yolk_dir() {
        candidates.push(dir.join("logs").join("yolk.log"));
    }

    // Fallback: ./.yolk/logs/yolk.log
    candidates.push(PathBuf::from(".yolk").join("logs").join("yolk.log"));

    candidates
}
