//! `pygd` — the daemon binary (§6). Owns the store, the scheduler's writer
//! thread, the Unix-domain-socket listener, and (transitively, via the
//! scheduler) the worker-subprocess pool.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mimalloc::MiMalloc;
use tracing::{debug, error, info, warn};

use pygmalion::config::Config;
use pygmalion::logging;
use pygmalion::scheduler::{self, SchedulerHandle};
use pygmalion::store::Store;
use pygmalion::transport::{self, WireReply, WireRequest};
use pygmalion::{export, PygmalionError, SOCKET_FILE_NAME, STORE_FILE_NAME};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn project_root() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("current directory must be readable"))
}

fn handle_connection(mut stream: UnixStream, handle: SchedulerHandle, socket_path: PathBuf, compile_commands_path: PathBuf) {
    loop {
        let payload = match transport::read_frame(&mut stream) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("client closed connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "error reading request frame");
                return;
            }
        };

        let request = transport::decode_request(&payload);
        let is_shutdown = matches!(request, Ok(WireRequest::Shutdown));
        let reply = match request {
            Ok(WireRequest::ExportCompileCommands) => match export::write_to(&handle, &compile_commands_path) {
                Ok(()) => {
                    info!(path = %compile_commands_path.display(), "exported compile_commands.json");
                    WireReply::Ack
                }
                Err(e) => {
                    warn!(error = %e, "failed to export compile_commands.json");
                    WireReply::Error(e.to_string())
                }
            },
            Ok(req) => transport::dispatch(&handle, req),
            Err(e) => WireReply::Error(e.to_string()),
        };

        let encoded = match transport::encode_reply(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode reply");
                return;
            }
        };
        if let Err(e) = transport::write_frame(&mut stream, &encoded) {
            warn!(error = %e, "error writing reply frame");
            return;
        }

        if is_shutdown {
            info!("shutdown requested over socket, exiting");
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(0);
        }
    }
}

fn run(root: &Path) -> pygmalion::Result<()> {
    if !root.is_dir() {
        return Err(PygmalionError::ProjectRootNotFound(root.display().to_string()));
    }

    let config = Config::load(root)?;
    logging::init(config.log_level);

    let store_path = root.join(STORE_FILE_NAME);
    info!(path = %store_path.display(), "opening store");
    let store = Store::open(&store_path)?;
    let handle = scheduler::spawn(store);

    let socket_path = root.join(SOCKET_FILE_NAME);
    // A stale socket file from a previous, uncleanly-terminated daemon
    // prevents bind; remove it before listening (§7 daemon restart).
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "listening");

    let shutting_down = Arc::new(AtomicBool::new(false));
    {
        let shutting_down = Arc::clone(&shutting_down);
        let handle = handle.clone();
        let socket_path = socket_path.clone();
        ctrlc::set_handler(move || {
            info!("received interrupt, shutting down");
            shutting_down.store(true, Ordering::Release);
            handle.shutdown();
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(0);
        })
        .expect("installing the Ctrl-C handler should only fail if called twice");
    }

    let compile_commands_path = root.join("compile_commands.json");

    for stream in listener.incoming() {
        if shutting_down.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => {
                let handle = handle.clone();
                let socket_path = socket_path.clone();
                let compile_commands_path = compile_commands_path.clone();
                std::thread::spawn(move || handle_connection(stream, handle, socket_path, compile_commands_path));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }

    Ok(())
}

fn main() {
    let root = project_root();
    if let Err(e) = run(&root) {
        eprintln!("pygd: {e}");
        std::process::exit(1);
    }
}
