//! Worker wire protocol (§4.6) and core-side subprocess management (spawn,
//! turn-based request/response, respawn on failure).
//!
//! Framing: every message is a one-byte tag followed by the tagged payload
//! encoded per §fact. Requests: `Analyze(CommandInfo)` (tag 1) or `Shutdown`
//! (tag 2, no payload). Responses are zero or more facts followed by the
//! terminal `EndOfDefs` tag, then the core may send the next request.
//!
//! §4.6 literally names only `FoundDef`/`EndOfDefs`, but §2's data flow has
//! the worker streaming inclusion, override, call-edge, and reference facts
//! too ("each becomes a write request on the update channel") — a real
//! semantic-index worker has to report more than just definitions. This
//! implementation resolves the inconsistency by extending the response tag
//! space with one `Found*` variant per fact kind while keeping `EndOfDefs`
//! as the terminal tag's name (documented in DESIGN.md): it now terminates
//! a stream of mixed facts, not just definitions, but renaming it would
//! contradict the one place §4.6 is explicit about naming.

use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{PygmalionError, Result};
use crate::fact::{CallEdge, CommandInfo, DefInfo, Inclusion, Override, Reference};

const REQ_ANALYZE: u8 = 1;
const REQ_SHUTDOWN: u8 = 2;

const RESP_FOUND_DEF: u8 = 1;
const RESP_END_OF_DEFS: u8 = 2;
const RESP_FOUND_INCLUSION: u8 = 3;
const RESP_FOUND_OVERRIDE: u8 = 4;
const RESP_FOUND_CALL_EDGE: u8 = 5;
const RESP_FOUND_REFERENCE: u8 = 6;

fn write_tag(w: &mut impl Write, tag: u8) -> std::io::Result<()> {
    w.write_all(&[tag])
}

fn read_tag(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Encodes an `Analyze` request onto `w`.
pub fn encode_analyze(w: &mut impl Write, ci: &CommandInfo) -> Result<()> {
    write_tag(w, REQ_ANALYZE)?;
    ci.encode(w)
}

/// Encodes a `Shutdown` request onto `w`.
pub fn encode_shutdown(w: &mut impl Write) -> Result<()> {
    write_tag(w, REQ_SHUTDOWN)?;
    Ok(())
}

/// Worker-side: decode the next request from the core. Returns `None` on
/// clean EOF (core closed the pipe, e.g. after the process's own shutdown).
pub enum WorkerRequest {
    Analyze(CommandInfo),
    Shutdown,
}

pub fn decode_request(r: &mut impl Read) -> Result<Option<WorkerRequest>> {
    let mut tag_buf = [0u8; 1];
    match r.read(&mut tag_buf) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    match tag_buf[0] {
        REQ_ANALYZE => Ok(Some(WorkerRequest::Analyze(CommandInfo::decode(r)?))),
        REQ_SHUTDOWN => Ok(Some(WorkerRequest::Shutdown)),
        other => Err(PygmalionError::ProtocolDesync {
            context: "worker request tag".to_string(),
            detail: format!("unknown tag {other}"),
        }),
    }
}

/// One fact streamed back from a semantic-index worker (§2, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerFact {
    Def(DefInfo),
    Inclusion(Inclusion),
    Override(Override),
    CallEdge(CallEdge),
    Reference(Reference),
}

/// Worker-side: encode one fact response.
pub fn encode_fact(w: &mut impl Write, fact: &WorkerFact) -> Result<()> {
    match fact {
        WorkerFact::Def(d) => {
            write_tag(w, RESP_FOUND_DEF)?;
            d.encode(w)
        }
        WorkerFact::Inclusion(i) => {
            write_tag(w, RESP_FOUND_INCLUSION)?;
            i.encode(w)
        }
        WorkerFact::Override(o) => {
            write_tag(w, RESP_FOUND_OVERRIDE)?;
            o.encode(w)
        }
        WorkerFact::CallEdge(c) => {
            write_tag(w, RESP_FOUND_CALL_EDGE)?;
            c.encode(w)
        }
        WorkerFact::Reference(r) => {
            write_tag(w, RESP_FOUND_REFERENCE)?;
            r.encode(w)
        }
    }
}

/// Worker-side: encode the terminal `EndOfDefs` response.
pub fn encode_end_of_defs(w: &mut impl Write) -> Result<()> {
    write_tag(w, RESP_END_OF_DEFS)?;
    Ok(())
}

/// A handle to a running `pygclangindex` subprocess, from the core's side.
pub struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    /// Spawns a fresh worker subprocess. Respawning after a failure (§7) is
    /// just calling this again.
    pub fn spawn(exe: &Path) -> Result<Self> {
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        Ok(Worker { child, stdin, stdout })
    }

    /// Sends `Analyze(ci)` and returns a lazy iterator over fact responses,
    /// terminated by `EndOfDefs` (§9 "lazy streaming"). The protocol is
    /// turn-based — callers must drain the iterator (or hit an error)
    /// before issuing the next request.
    pub fn analyze<'a>(&'a mut self, ci: &CommandInfo) -> Result<FactStream<'a>> {
        encode_analyze(&mut self.stdin, ci)?;
        self.stdin.flush()?;
        Ok(FactStream { worker: self, file: ci.source_file.clone(), done: false })
    }

    /// Sends `Shutdown` and waits for the subprocess to exit.
    pub fn shutdown(mut self) -> Result<()> {
        encode_shutdown(&mut self.stdin)?;
        self.stdin.flush()?;
        self.child.wait()?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

/// Lazy iterator over one TU's fact responses (§9).
pub struct FactStream<'a> {
    worker: &'a mut Worker,
    file: String,
    done: bool,
}

impl<'a> Iterator for FactStream<'a> {
    type Item = Result<WorkerFact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let tag = match read_tag(&mut self.worker.stdout) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return Some(Err(PygmalionError::WorkerDied {
                    pid: self.worker.pid(),
                    file: self.file.clone(),
                }));
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        let result = match tag {
            RESP_FOUND_DEF => DefInfo::decode(&mut self.worker.stdout).map(WorkerFact::Def),
            RESP_FOUND_INCLUSION => Inclusion::decode(&mut self.worker.stdout).map(WorkerFact::Inclusion),
            RESP_FOUND_OVERRIDE => Override::decode(&mut self.worker.stdout).map(WorkerFact::Override),
            RESP_FOUND_CALL_EDGE => CallEdge::decode(&mut self.worker.stdout).map(WorkerFact::CallEdge),
            RESP_FOUND_REFERENCE => Reference::decode(&mut self.worker.stdout).map(WorkerFact::Reference),
            RESP_END_OF_DEFS => {
                self.done = true;
                return None;
            }
            other => {
                self.done = true;
                return Some(Err(PygmalionError::ProtocolDesync {
                    context: "worker response tag".to_string(),
                    detail: format!("unknown tag {other}"),
                }));
            }
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Location, SourceRange};

    #[test]
    fn request_roundtrip_analyze() {
        let ci = CommandInfo {
            source_file: "a.cpp".into(),
            working_dir: "/proj".into(),
            command: "/usr/bin/c++".into(),
            args: vec!["-I.".into()],
            last_indexed_epoch_secs: 1,
        };
        let mut buf = Vec::new();
        encode_analyze(&mut buf, &ci).unwrap();
        let mut slice = buf.as_slice();
        match decode_request(&mut slice).unwrap() {
            Some(WorkerRequest::Analyze(got)) => assert_eq!(got, ci),
            _ => panic!("expected Analyze"),
        }
    }

    #[test]
    fn request_roundtrip_shutdown() {
        let mut buf = Vec::new();
        encode_shutdown(&mut buf).unwrap();
        let mut slice = buf.as_slice();
        assert!(matches!(decode_request(&mut slice).unwrap(), Some(WorkerRequest::Shutdown)));
    }

    #[test]
    fn decode_request_on_empty_input_is_clean_eof() {
        let mut slice: &[u8] = &[];
        assert!(decode_request(&mut slice).unwrap().is_none());
    }

    #[test]
    fn response_stream_mixed_facts_then_end() {
        let def = DefInfo {
            usr: "usr_a".into(),
            name: "a".into(),
            location: Location { file: "f.cpp".into(), line: 1, col: 1 },
            kind: "FunctionDecl".into(),
        };
        let inc = Inclusion { includer: "f.cpp".into(), included: "f.hpp".into(), direct: true };
        let edge = CallEdge { caller_usr: "usr_a".into(), callee_usr: "usr_b".into() };
        let ov = Override { defining_usr: "usr_a".into(), overridden_usr: "usr_base".into() };
        let r = Reference {
            range: SourceRange { file: "f.cpp".into(), line: 1, col: 1, end_line: 1, end_col: 2 },
            target_usr: "usr_a".into(),
        };

        let mut buf = Vec::new();
        encode_fact(&mut buf, &WorkerFact::Def(def.clone())).unwrap();
        encode_fact(&mut buf, &WorkerFact::Inclusion(inc.clone())).unwrap();
        encode_fact(&mut buf, &WorkerFact::Override(ov.clone())).unwrap();
        encode_fact(&mut buf, &WorkerFact::CallEdge(edge.clone())).unwrap();
        encode_fact(&mut buf, &WorkerFact::Reference(r.clone())).unwrap();
        encode_end_of_defs(&mut buf).unwrap();

        let mut slice = buf.as_slice();
        let mut found = Vec::new();
        loop {
            let tag = read_tag(&mut slice).unwrap();
            match tag {
                RESP_FOUND_DEF => found.push(WorkerFact::Def(DefInfo::decode(&mut slice).unwrap())),
                RESP_FOUND_INCLUSION => found.push(WorkerFact::Inclusion(Inclusion::decode(&mut slice).unwrap())),
                RESP_FOUND_OVERRIDE => found.push(WorkerFact::Override(Override::decode(&mut slice).unwrap())),
                RESP_FOUND_CALL_EDGE => found.push(WorkerFact::CallEdge(CallEdge::decode(&mut slice).unwrap())),
                RESP_FOUND_REFERENCE => found.push(WorkerFact::Reference(Reference::decode(&mut slice).unwrap())),
                RESP_END_OF_DEFS => break,
                _ => panic!("unexpected tag"),
            }
        }
        assert_eq!(found.len(), 5);
        assert_eq!(found[0], WorkerFact::Def(def));
        assert_eq!(found[4], WorkerFact::Reference(r));
    }
}
