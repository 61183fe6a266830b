mod backup;
mod db;
mod ipc;
mod models;
mod schedule;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// School timetable sidecar: newline-delimited JSON requests on stdin,
/// one JSON response per line on stdout.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Workspace directory to open at startup.
    #[arg(long, value_name = "DIR", env = "SCHOOLD_WORKSPACE")]
    workspace: Option<PathBuf>,
}

fn main() {
    // stdout carries the protocol, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = args.workspace {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            log::error!("failed to open startup workspace: {:#}", e);
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                log::warn!("unparseable request: {}", e);
                // No id to echo back.
                serde_json::json!({
                    "id": null,
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                })
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
