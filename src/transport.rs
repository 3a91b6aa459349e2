//! Daemon transport (§4.10, C11): a length-prefixed JSON record protocol
//! carrying the scheduler's request/reply shapes over the project's Unix
//! domain socket, so `pygmalion`, `pygscan`, and any other out-of-process
//! caller can reach the single writer thread running inside `pygd`.
//!
//! Framing is deliberately the same shape as the worker protocol (§worker):
//! a `u32` big-endian byte count followed by that many bytes of payload.
//! The payload here is `serde_json`-encoded rather than the worker's custom
//! binary encoding, since these records cross a socket to potentially
//! different client binaries rather than a tightly coupled subprocess pipe.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{PygmalionError, Result};
use crate::fact::{CallEdge, CommandInfo, DefInfo, Inclusion, Override, Reference, SourceRange};
use crate::query::QuerySurface;
use crate::scheduler::SchedulerHandle;

/// Everything a socket client can ask the daemon to do. Update variants
/// mirror `scheduler::UpdateRequest`; query variants mirror
/// `scheduler::QueryRequest` minus their internal reply channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireRequest {
    UpdateCommandInfo(CommandInfo),
    UpdateDef(DefInfo),
    UpdateOverride(Override),
    UpdateReference(Reference),
    UpdateInclusion(Inclusion),
    UpdateCallEdge(CallEdge),
    ResetMetadata(String),
    InsertFileAndCheck(String),

    GetCommandInfo(String),
    GetSimilarCommandInfo(String),
    GetDefinition(String),
    GetIncluders(String),
    GetCallers(String),
    GetCallees(String),
    GetBases(String),
    GetOverriders(String),
    GetReferences(String),
    GetReferenced { file: String, line: u32, col: u32 },
    GetAllCommandInfos,
    /// `compile-flags <file>` (§4.7, §6): the query-surface fallback chain
    /// (`getCommandInfo` -> first of `getIncluders` -> `getSimilarCommandInfo`),
    /// run server-side so the CLI gets the same answer in one round trip
    /// that `QuerySurface::compile_flags_for_file` would give an in-process
    /// caller.
    CompileFlagsForFile(String),

    /// `pygmalion --index-export` (SPEC_FULL §4.11), and sent by `pygscan`
    /// itself after a translation unit's facts finish streaming when
    /// config's `compilationDatabase` is set: ask the daemon to (re)write
    /// `compile_commands.json` at the project root. Handled specially by
    /// `pygd`'s connection handler (it alone knows the project root to
    /// write to) rather than by [`dispatch`], which has no filesystem path
    /// to write to and replies with an error if it ever sees this variant.
    ExportCompileCommands,

    /// `pygmalion --stop` (§6): ask the daemon to shut down the scheduler's
    /// writer thread. The connection handler acks before the process exits.
    Shutdown,
}

/// The daemon's answer to a `WireRequest`. Update requests (fire-and-forget
/// on the scheduler side) get `Ack`; `InsertFileAndCheck` gets `Inserted`;
/// query requests get the variant matching what they asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireReply {
    Ack,
    Inserted(bool),
    CommandInfo(Option<CommandInfo>),
    CommandInfos(Vec<CommandInfo>),
    Definition(Option<DefInfo>),
    Definitions(Vec<DefInfo>),
    References(Vec<SourceRange>),
    Error(String),
}

/// Writes `payload` as one length-prefixed frame.
pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| PygmalionError::ProtocolDesync {
        context: "transport frame".to_string(),
        detail: format!("payload too large: {} bytes", payload.len()),
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one length-prefixed frame's payload. Returns `None` on clean EOF
/// before any byte of the next frame's length prefix has arrived.
pub fn read_frame(r: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read(&mut len_buf[..1]) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    r.read_exact(&mut len_buf[1..])?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Sends `req` and returns the decoded reply. Used by client binaries.
pub fn send_request(stream: &mut (impl Read + Write), req: &WireRequest) -> Result<WireReply> {
    let payload = serde_json::to_vec(req).map_err(|e| PygmalionError::ProtocolDesync {
        context: "encoding wire request".to_string(),
        detail: e.to_string(),
    })?;
    write_frame(stream, &payload)?;
    match read_frame(stream)? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| PygmalionError::ProtocolDesync {
            context: "decoding wire reply".to_string(),
            detail: e.to_string(),
        }),
        None => Err(PygmalionError::ProtocolDesync {
            context: "daemon connection".to_string(),
            detail: "connection closed before a reply arrived".to_string(),
        }),
    }
}

/// Decodes one `WireRequest` frame's payload. Used by `pygd`'s connection
/// handler threads.
pub fn decode_request(payload: &[u8]) -> Result<WireRequest> {
    serde_json::from_slice(payload).map_err(|e| PygmalionError::ProtocolDesync {
        context: "decoding wire request".to_string(),
        detail: e.to_string(),
    })
}

/// Encodes a `WireReply` into a frame payload. Used by `pygd`'s connection
/// handler threads.
pub fn encode_reply(reply: &WireReply) -> Result<Vec<u8>> {
    serde_json::to_vec(reply).map_err(|e| PygmalionError::ProtocolDesync {
        context: "encoding wire reply".to_string(),
        detail: e.to_string(),
    })
}

/// Dispatches one decoded request against the scheduler and produces the
/// reply to send back. This is the "decodes ... and forwards it to the
/// scheduler's update or query channel exactly as an in-process call
/// would" step of §4.10, shared by every connection handler thread.
pub fn dispatch(handle: &SchedulerHandle, req: WireRequest) -> WireReply {
    match req {
        WireRequest::UpdateCommandInfo(ci) => {
            handle.update_command_info(ci);
            WireReply::Ack
        }
        WireRequest::UpdateDef(d) => {
            handle.update_def(d);
            WireReply::Ack
        }
        WireRequest::UpdateOverride(o) => {
            handle.update_override(o);
            WireReply::Ack
        }
        WireRequest::UpdateReference(r) => {
            handle.update_reference(r);
            WireReply::Ack
        }
        WireRequest::UpdateInclusion(i) => {
            handle.update_inclusion(i);
            WireReply::Ack
        }
        WireRequest::UpdateCallEdge(edge) => {
            handle.update_caller(edge);
            WireReply::Ack
        }
        WireRequest::ResetMetadata(file) => {
            handle.reset_metadata(file);
            WireReply::Ack
        }
        WireRequest::InsertFileAndCheck(file) => match handle.insert_file_and_check(file) {
            Ok(inserted) => WireReply::Inserted(inserted),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetCommandInfo(file) => match handle.get_command_info(file) {
            Ok(ci) => WireReply::CommandInfo(ci),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetSimilarCommandInfo(file) => match handle.get_similar_command_info(file) {
            Ok(ci) => WireReply::CommandInfo(ci),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetDefinition(usr) => match handle.get_definition(usr) {
            Ok(d) => WireReply::Definition(d),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetIncluders(file) => match handle.get_includers(file) {
            Ok(cis) => WireReply::CommandInfos(cis),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetCallers(usr) => match handle.get_callers(usr) {
            Ok(ds) => WireReply::Definitions(ds),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetCallees(usr) => match handle.get_callees(usr) {
            Ok(ds) => WireReply::Definitions(ds),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetBases(usr) => match handle.get_bases(usr) {
            Ok(ds) => WireReply::Definitions(ds),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetOverriders(usr) => match handle.get_overriders(usr) {
            Ok(ds) => WireReply::Definitions(ds),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetReferences(usr) => match handle.get_references(usr) {
            Ok(rs) => WireReply::References(rs),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetReferenced { file, line, col } => match handle.get_referenced(file, line, col) {
            Ok(ds) => WireReply::Definitions(ds),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::GetAllCommandInfos => match handle.get_all_command_infos() {
            Ok(cis) => WireReply::CommandInfos(cis),
            Err(e) => WireReply::Error(e.to_string()),
        },
        WireRequest::CompileFlagsForFile(file) => {
            match QuerySurface::new(handle.clone()).compile_flags_for_file(&file) {
                Ok(ci) => WireReply::CommandInfo(ci),
                Err(e) => WireReply::Error(e.to_string()),
            }
        }
        WireRequest::ExportCompileCommands => WireReply::Error(
            "ExportCompileCommands must be handled by the daemon's connection handler, not dispatch()".to_string(),
        ),
        WireRequest::Shutdown => {
            handle.shutdown();
            WireReply::Ack
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Location;
    use crate::store::Store;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn read_frame_on_empty_input_is_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn request_reply_json_roundtrip() {
        let req = WireRequest::GetReferenced { file: "a.cpp".into(), line: 3, col: 7 };
        let payload = serde_json::to_vec(&req).unwrap();
        let decoded = decode_request(&payload).unwrap();
        match decoded {
            WireRequest::GetReferenced { file, line, col } => {
                assert_eq!(file, "a.cpp");
                assert_eq!(line, 3);
                assert_eq!(col, 7);
            }
            _ => panic!("wrong variant"),
        }

        let reply = WireReply::Ack;
        let payload = encode_reply(&reply).unwrap();
        let decoded: WireReply = serde_json::from_slice(&payload).unwrap();
        assert!(matches!(decoded, WireReply::Ack));
    }

    #[test]
    fn dispatch_update_then_query_via_scheduler() {
        let store = Store::open_in_memory().unwrap();
        let handle = crate::scheduler::spawn(store);

        let def = DefInfo {
            usr: "usr_a".into(),
            name: "a".into(),
            location: Location { file: "f.cpp".into(), line: 1, col: 1 },
            kind: "FunctionDecl".into(),
        };
        let reply = dispatch(&handle, WireRequest::UpdateDef(def.clone()));
        assert!(matches!(reply, WireReply::Ack));

        let reply = dispatch(&handle, WireRequest::GetDefinition("usr_a".to_string()));
        match reply {
            WireReply::Definition(Some(got)) => assert_eq!(got, def),
            other => panic!("unexpected reply: {other:?}"),
        }

        handle.shutdown();
    }

    #[test]
    fn dispatch_compile_flags_falls_back_like_query_surface_scenario_s3() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .update_source_file(&CommandInfo {
                source_file: "a.cpp".into(),
                working_dir: "/proj".into(),
                command: "/usr/bin/c++".into(),
                args: vec![],
                last_indexed_epoch_secs: 1,
            })
            .unwrap();
        store
            .update_inclusion(&Inclusion { includer: "a.cpp".into(), included: "h.hpp".into(), direct: true })
            .unwrap();
        let handle = crate::scheduler::spawn(store);

        let reply = dispatch(&handle, WireRequest::CompileFlagsForFile("h.hpp".to_string()));
        match reply {
            WireReply::CommandInfo(Some(ci)) => assert_eq!(ci.source_file, "a.cpp"),
            other => panic!("unexpected reply: {other:?}"),
        }
        handle.shutdown();
    }

    #[test]
    fn dispatch_get_all_command_infos() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .update_source_file(&CommandInfo {
                source_file: "a.cpp".into(),
                working_dir: "/proj".into(),
                command: "/usr/bin/c++".into(),
                args: vec![],
                last_indexed_epoch_secs: 1,
            })
            .unwrap();
        let handle = crate::scheduler::spawn(store);

        let reply = dispatch(&handle, WireRequest::GetAllCommandInfos);
        match reply {
            WireReply::CommandInfos(cis) => assert_eq!(cis.len(), 1),
            other => panic!("unexpected reply: {other:?}"),
        }
        handle.shutdown();
    }
}
