//! `pygmalion` — the query client binary (C10, §6).
//!
//! Each subcommand opens one connection to the daemon's Unix socket, sends
//! one request, reads one reply, prints it human-readably, and exits.
//! Exit status is 0 on success, non-zero on any daemon or connection error.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use pygmalion::fact::{CommandInfo, DefInfo, SourceRange};
use pygmalion::transport::{self, WireReply, WireRequest};
use pygmalion::{PygmalionError, Result, SOCKET_FILE_NAME};

/// Query client for a running `pygd` daemon.
#[derive(Parser, Debug)]
#[command(name = "pygmalion", version, about)]
struct Cli {
    /// Project root containing `.pygmalion.sock`. Defaults to the current
    /// directory.
    #[arg(short = 'C', long)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// What symbol is at this cursor position?
    Definition { file: String, line: u32, col: u32 },
    /// Who calls this symbol?
    Callers { usr: String },
    /// What does this symbol call?
    Callees { usr: String },
    /// What does this symbol override (its bases)?
    Bases { usr: String },
    /// What overrides this symbol?
    Overrides { usr: String },
    /// Every reference to this symbol.
    References { usr: String },
    /// The compile flags that apply to this file (§4.7 fallback chain).
    CompileFlags { file: String },
    /// Record a compiler invocation directly (normally `pygscan`'s job).
    Index { compiler: String, file: String },
    /// (Re)write `compile_commands.json` at the project root (SPEC_FULL §4.11).
    IndexExport,
    /// Ask the daemon to shut down.
    Stop,
}

fn connect(root: &Path) -> Result<UnixStream> {
    let path = root.join(SOCKET_FILE_NAME);
    UnixStream::connect(&path).map_err(|source| PygmalionError::DaemonUnreachable {
        path: path.display().to_string(),
        source,
    })
}

fn print_definitions(defs: &[DefInfo]) {
    for d in defs {
        println!("{}\t{}\t{}:{}:{}", d.usr, d.name, d.location.file, d.location.line, d.location.col);
    }
}

fn print_references(refs: &[SourceRange]) {
    for r in refs {
        println!("{}:{}:{}-{}:{}", r.file, r.line, r.col, r.end_line, r.end_col);
    }
}

fn print_command_info(ci: &Option<CommandInfo>) {
    match ci {
        Some(ci) => println!("{} {} {}", ci.working_dir, ci.command, ci.args.join(" ")),
        None => println!("(no compile flags known for this file)"),
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = cli
        .project_root
        .unwrap_or_else(|| std::env::current_dir().expect("current directory must be readable"));
    let mut stream = connect(&root)?;

    let request = match &cli.command {
        Commands::Definition { file, line, col } => WireRequest::GetReferenced {
            file: file.clone(),
            line: *line,
            col: *col,
        },
        Commands::Callers { usr } => WireRequest::GetCallers(usr.clone()),
        Commands::Callees { usr } => WireRequest::GetCallees(usr.clone()),
        Commands::Bases { usr } => WireRequest::GetBases(usr.clone()),
        Commands::Overrides { usr } => WireRequest::GetOverriders(usr.clone()),
        Commands::References { usr } => WireRequest::GetReferences(usr.clone()),
        Commands::CompileFlags { file } => WireRequest::CompileFlagsForFile(file.clone()),
        Commands::Index { compiler, file } => WireRequest::UpdateCommandInfo(CommandInfo {
            source_file: file.clone(),
            working_dir: root.display().to_string(),
            command: compiler.clone(),
            args: Vec::new(),
            last_indexed_epoch_secs: 0,
        }),
        Commands::IndexExport => WireRequest::ExportCompileCommands,
        Commands::Stop => WireRequest::Shutdown,
    };

    let reply = transport::send_request(&mut stream, &request)?;

    match reply {
        WireReply::Ack | WireReply::Inserted(_) => {}
        WireReply::CommandInfo(ci) => print_command_info(&ci),
        WireReply::CommandInfos(cis) => {
            for ci in cis {
                print_command_info(&Some(ci));
            }
        }
        WireReply::Definition(d) => print_definitions(&d.into_iter().collect::<Vec<_>>()),
        WireReply::Definitions(ds) => print_definitions(&ds),
        WireReply::References(rs) => print_references(&rs),
        WireReply::Error(msg) => {
            eprintln!("Error: {msg}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
