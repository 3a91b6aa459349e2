//! `pygscan` — the build-observer binary (§6).
//!
//! Invoked in place of the real compiler (`CC`/`CXX` redirected by
//! `pygmake`): `argv[1]` is the real compiler, `argv[2..]` its arguments.
//! Records the observed command line with the daemon, dispatches a
//! semantic-index worker for the translation unit and relays its facts,
//! then always runs the real compiler so the build is never broken by a
//! daemon that is unreachable, misbehaving, or simply not running.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use pygmalion::config::Config;
use pygmalion::fact::CommandInfo;
use pygmalion::transport::{self, WireRequest};
use pygmalion::worker::{Worker, WorkerFact};
use pygmalion::{Result, SOCKET_FILE_NAME};

/// Walks upward from `start` looking for a directory containing the daemon
/// socket, so `pygscan` works from any build subdirectory.
fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        if d.join(SOCKET_FILE_NAME).exists() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

/// Looks for `name` next to the currently running executable (mirrors
/// `pygmake`'s sibling-binary lookup), so the worker is found without
/// relying on the project root containing a copy of it.
fn find_sibling_binary(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let candidate = dir.join(name);
    candidate.exists().then_some(candidate)
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn source_file_arg(args: &[String]) -> Option<String> {
    args.iter()
        .find(|a| {
            let lower = a.to_ascii_lowercase();
            !a.starts_with('-')
                && (lower.ends_with(".c")
                    || lower.ends_with(".cc")
                    || lower.ends_with(".cpp")
                    || lower.ends_with(".cxx")
                    || lower.ends_with(".h")
                    || lower.ends_with(".hpp"))
        })
        .cloned()
}

/// Reports one observed invocation and its worker-streamed facts to the
/// daemon, best-effort: a connection or protocol failure is logged and
/// ignored, never propagated to the exit code (§6, "so the build is
/// unaffected").
fn report_to_daemon(root: &Path, ci: &CommandInfo, worker_exe: &Path) {
    let socket_path = root.join(SOCKET_FILE_NAME);
    let mut stream = match UnixStream::connect(&socket_path) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "daemon unreachable, skipping indexing for this translation unit");
            return;
        }
    };

    if let Err(e) = transport::send_request(&mut stream, &WireRequest::ResetMetadata(ci.source_file.clone())) {
        warn!(error = %e, "failed to reset metadata before re-indexing");
        return;
    }
    if let Err(e) = transport::send_request(&mut stream, &WireRequest::UpdateCommandInfo(ci.clone())) {
        warn!(error = %e, "failed to record command info");
        return;
    }

    let mut worker = match Worker::spawn(worker_exe) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to spawn semantic-index worker");
            return;
        }
    };

    let facts: Vec<_> = match worker.analyze(ci) {
        Ok(stream) => stream.collect(),
        Err(e) => {
            warn!(error = %e, "failed to start worker analysis");
            return;
        }
    };

    let mut stream_ok = true;
    for fact in facts {
        let fact = match fact {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "worker reported an error mid-stream");
                stream_ok = false;
                break;
            }
        };
        let req = match fact {
            WorkerFact::Def(d) => WireRequest::UpdateDef(d),
            WorkerFact::Inclusion(i) => WireRequest::UpdateInclusion(i),
            WorkerFact::Override(o) => WireRequest::UpdateOverride(o),
            WorkerFact::CallEdge(c) => WireRequest::UpdateCallEdge(c),
            WorkerFact::Reference(r) => WireRequest::UpdateReference(r),
        };
        if let Err(e) = transport::send_request(&mut stream, &req) {
            warn!(error = %e, "failed to submit fact to daemon");
            stream_ok = false;
            break;
        }
    }

    if let Err(e) = worker.shutdown() {
        debug!(error = %e, "worker shutdown reported an error");
    }

    // SPEC_FULL §4.11: auto-regenerate compile_commands.json once this TU's
    // facts have fully landed, if the project opted in.
    if stream_ok {
        match Config::load(root) {
            Ok(cfg) if cfg.compilation_database => {
                if let Err(e) = transport::send_request(&mut stream, &WireRequest::ExportCompileCommands) {
                    warn!(error = %e, "failed to trigger compile_commands.json export");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load config for export check"),
        }
    }
}

fn exec_real_compiler(argv: &[String]) -> Result<i32> {
    let status = Command::new(&argv[0]).args(&argv[1..]).status()?;
    Ok(status.code().unwrap_or(1))
}

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        eprintln!("pygscan: usage: pygscan <compiler> [args...]");
        std::process::exit(1);
    }

    let cwd = std::env::current_dir().expect("current directory must be readable");

    if let Some(root) = find_project_root(&cwd) {
        if let Some(source_file) = source_file_arg(&argv[1..]) {
            let ci = CommandInfo {
                source_file,
                working_dir: cwd.display().to_string(),
                command: argv[0].clone(),
                args: argv[1..].to_vec(),
                last_indexed_epoch_secs: epoch_secs(),
            };
            let worker_exe = find_sibling_binary("pygclangindex").unwrap_or_else(|| PathBuf::from("pygclangindex"));
            report_to_daemon(&root, &ci, &worker_exe);
        }
    } else {
        debug!("no project root found (no .pygmalion.sock above {}), skipping indexing", cwd.display());
    }

    match exec_real_compiler(&argv) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("pygscan: failed to run real compiler: {e}");
            std::process::exit(1);
        }
    }
}
