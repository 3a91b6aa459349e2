//! `pygmake` — build wrapper (§6). Runs the user's build with `CC`/`CXX`
//! redirected to `pygscan`, so every compiler invocation is observed.

use std::path::PathBuf;
use std::process::Command;

use pygmalion::config::Config;

fn main() {
    let project_root = std::env::current_dir().expect("current directory must be readable");
    let config = match Config::load(&project_root) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("pygmake: {e}");
            std::process::exit(1);
        }
    };

    let extra_args: Vec<String> = std::env::args().skip(1).collect();
    let command_line = config.materialize_make_command(&project_root, &extra_args);

    let pygscan = find_sibling_binary("pygscan").unwrap_or_else(|| PathBuf::from("pygscan"));
    let pygscan = pygscan.display();
    // `CC`/`CXX` carry the real compiler as pygscan's first argument, the
    // same space-separated wrapper convention ccache uses, so make/ninja
    // invoke `pygscan cc ...` / `pygscan c++ ...` instead of the bare
    // compiler, and pygscan can still exec the one it wraps.
    let cc = format!("{pygscan} cc");
    let cxx = format!("{pygscan} c++");

    let mut parts = command_line.split_whitespace();
    let program = match parts.next() {
        Some(p) => p,
        None => {
            eprintln!("pygmake: empty make command after expansion");
            std::process::exit(1);
        }
    };

    let status = Command::new(program)
        .args(parts)
        .env("CC", &cc)
        .env("CXX", &cxx)
        .status();

    match status {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("pygmake: failed to run '{command_line}': {e}");
            std::process::exit(1);
        }
    }
}

/// Looks for `name` next to the currently running executable, so
/// `pygmake`/`pygscan` work from a `cargo install`-style flat bin directory
/// without relying on `PATH` containing a particular entry first.
fn find_sibling_binary(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let candidate = dir.join(name);
    candidate.exists().then_some(candidate)
}
