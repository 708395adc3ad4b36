mod allocator;
mod attendance;
mod config;
mod dates;
mod db;
mod enrollment;
mod error;
mod fees;
mod grades;
mod ipc;
mod model;
mod promotion;
mod schedules;
mod sequence;
mod staff;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// School enrollment sidecar: JSON-lines requests on stdin, one response per line on stdout.
#[derive(Parser, Debug)]
#[command(name = "schoold", version, about)]
struct Cli {
    /// Workspace directory to open at startup (same as `workspace.select`).
    #[arg(long, env = "SCHOOLD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter, e.g. `schoold=debug`. Logs go to stderr.
    #[arg(long = "log", env = "SCHOOLD_LOG", default_value = "schoold=info")]
    log_filter: String,
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("schoold=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let mut state = ipc::AppState::default();
    if let Some(path) = cli.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            error!(code = e.code, message = %e.message, "failed to open startup workspace");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "schoold ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            tracing::debug!(method = %method, error = %resp["error"], "request failed");
        }
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
