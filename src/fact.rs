//! Typed fact records (§3) and their canonical binary wire serialization (§4.3).
//!
//! The same encoding is used to stream facts out of a semantic-index worker
//! (§4.6) and, conceptually, to describe what a store row holds — the store
//! itself (§store) persists hashes rather than raw text, but every fact it
//! accepts or returns passes through these record types first.
//!
//! Strings are length-prefixed (`u32` byte count of the encoded form,
//! big-endian) UTF-16 big-endian. Composite records serialize as the
//! concatenation of their fields in declaration order — no tags, no
//! padding, no length prefix on the record itself (the worker protocol's
//! outer framing, §worker, provides that).

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::PygmalionError;

/// A file + line + column point, used as both a definition site and a
/// cursor position for range-containment lookup (§4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

/// A source extent: `(file, line, col)` through `(file, endLine, endCol)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// `(sourceFile, workingDir, command, args[], lastIndexedEpochSeconds)` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub source_file: String,
    pub working_dir: String,
    pub command: String,
    pub args: Vec<String>,
    pub last_indexed_epoch_secs: u64,
}

/// `(includer, included, direct)` — one edge of the `#include` graph (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    pub includer: String,
    pub included: String,
    pub direct: bool,
}

/// `(usr, name, location, kind)` (§3). Primary key is `hash(usr)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefInfo {
    pub usr: String,
    pub name: String,
    pub location: Location,
    pub kind: String,
}

/// Directed edge `(definingUSR, overriddenUSR)`; also used for base-class
/// links (§3) since both relationships share the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub defining_usr: String,
    pub overridden_usr: String,
}

/// Directed edge `(callerUSR, calleeUSR)` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller_usr: String,
    pub callee_usr: String,
}

/// `(range, targetUSR)` (§3) — a reference occupies a source extent whose
/// target is a USR, not necessarily one for which a `DefInfo` already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub range: SourceRange,
    pub target_usr: String,
}

/// Writes a length-prefixed UTF-16BE string: a big-endian `u32` byte count
/// of the encoded UTF-16 units, followed by the units themselves.
pub fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let byte_len = (units.len() * 2) as u32;
    w.write_all(&byte_len.to_be_bytes())?;
    for unit in units {
        w.write_all(&unit.to_be_bytes())?;
    }
    Ok(())
}

/// Reads a string written by [`write_string`].
pub fn read_string(r: &mut impl Read) -> Result<String, PygmalionError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let byte_len = u32::from_be_bytes(len_buf) as usize;
    if byte_len % 2 != 0 {
        return Err(PygmalionError::ProtocolDesync {
            context: "string length".to_string(),
            detail: format!("odd byte length {byte_len} cannot hold whole UTF-16 units"),
        });
    }
    let mut units = vec![0u16; byte_len / 2];
    let mut byte_buf = vec![0u8; byte_len];
    r.read_exact(&mut byte_buf)?;
    for (i, chunk) in byte_buf.chunks_exact(2).enumerate() {
        units[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    String::from_utf16(&units).map_err(|e| PygmalionError::InvalidWireString(e.to_string()))
}

pub fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

pub fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

pub fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

pub fn write_bool(w: &mut impl Write, v: bool) -> io::Result<()> {
    w.write_all(&[v as u8])
}

pub fn read_bool(r: &mut impl Read) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

fn write_string_vec(w: &mut impl Write, items: &[String]) -> io::Result<()> {
    write_u32(w, items.len() as u32)?;
    for item in items {
        write_string(w, item)?;
    }
    Ok(())
}

fn read_string_vec(r: &mut impl Read) -> Result<Vec<String>, PygmalionError> {
    let count = read_u32(r)?;
    (0..count).map(|_| read_string(r)).collect()
}

impl Location {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.file)?;
        write_u32(w, self.line)?;
        write_u32(w, self.col)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(Location {
            file: read_string(r)?,
            line: read_u32(r)?,
            col: read_u32(r)?,
        })
    }
}

impl SourceRange {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.file)?;
        write_u32(w, self.line)?;
        write_u32(w, self.col)?;
        write_u32(w, self.end_line)?;
        write_u32(w, self.end_col)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(SourceRange {
            file: read_string(r)?,
            line: read_u32(r)?,
            col: read_u32(r)?,
            end_line: read_u32(r)?,
            end_col: read_u32(r)?,
        })
    }

    /// Does the degenerate containment predicate of §4.4 hold for `loc`?
    /// Pure function used both by the in-memory worker output check and by
    /// tests that pin down the single-line boundary-column behaviour.
    pub fn contains(&self, line: u32, col: u32) -> bool {
        if self.line + 1 <= self.end_line.saturating_sub(1) && line > self.line && line < self.end_line {
            return true;
        }
        if line == self.line && col >= self.col {
            return true;
        }
        if line == self.end_line && col <= self.end_col {
            return true;
        }
        false
    }
}

impl CommandInfo {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.source_file)?;
        write_string(w, &self.working_dir)?;
        write_string(w, &self.command)?;
        write_string_vec(w, &self.args)?;
        write_u64(w, self.last_indexed_epoch_secs)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(CommandInfo {
            source_file: read_string(r)?,
            working_dir: read_string(r)?,
            command: read_string(r)?,
            args: read_string_vec(r)?,
            last_indexed_epoch_secs: read_u64(r)?,
        })
    }
}

impl Inclusion {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.includer)?;
        write_string(w, &self.included)?;
        write_bool(w, self.direct)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(Inclusion {
            includer: read_string(r)?,
            included: read_string(r)?,
            direct: read_bool(r)?,
        })
    }
}

impl DefInfo {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.usr)?;
        write_string(w, &self.name)?;
        self.location.encode(w)?;
        write_string(w, &self.kind)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(DefInfo {
            usr: read_string(r)?,
            name: read_string(r)?,
            location: Location::decode(r)?,
            kind: read_string(r)?,
        })
    }
}

impl Override {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.defining_usr)?;
        write_string(w, &self.overridden_usr)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(Override {
            defining_usr: read_string(r)?,
            overridden_usr: read_string(r)?,
        })
    }
}

impl CallEdge {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        write_string(w, &self.caller_usr)?;
        write_string(w, &self.callee_usr)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(CallEdge {
            caller_usr: read_string(r)?,
            callee_usr: read_string(r)?,
        })
    }
}

impl Reference {
    pub fn encode(&self, w: &mut impl Write) -> Result<(), PygmalionError> {
        self.range.encode(w)?;
        write_string(w, &self.target_usr)?;
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> Result<Self, PygmalionError> {
        Ok(Reference {
            range: SourceRange::decode(r)?,
            target_usr: read_string(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T, E, D>(value: &T, encode: E, decode: D)
    where
        T: PartialEq + std::fmt::Debug,
        E: Fn(&T, &mut Vec<u8>) -> Result<(), PygmalionError>,
        D: Fn(&mut &[u8]) -> Result<T, PygmalionError>,
    {
        let mut buf = Vec::new();
        encode(value, &mut buf).unwrap();
        let mut slice = buf.as_slice();
        let decoded = decode(&mut slice).unwrap();
        assert_eq!(value, &decoded);
        assert!(slice.is_empty(), "decode should consume exactly the encoded bytes");
    }

    #[test]
    fn string_roundtrip_ascii_and_unicode() {
        for s in ["", "main.cpp", "caf\u{e9}.hpp", "\u{1F600}"] {
            let mut buf = Vec::new();
            write_string(&mut buf, s).unwrap();
            let mut slice = buf.as_slice();
            assert_eq!(read_string(&mut slice).unwrap(), s);
        }
    }

    #[test]
    fn def_info_roundtrip() {
        let def = DefInfo {
            usr: "c:@F@main".to_string(),
            name: "main".to_string(),
            location: Location { file: "f.cpp".to_string(), line: 1, col: 5 },
            kind: "FunctionDecl".to_string(),
        };
        roundtrip(&def, |v, buf| v.encode(buf), |r| DefInfo::decode(r));
    }

    #[test]
    fn command_info_roundtrip_with_args() {
        let ci = CommandInfo {
            source_file: "a.cpp".to_string(),
            working_dir: "/proj".to_string(),
            command: "/usr/bin/c++".to_string(),
            args: vec!["-I.".to_string(), "-DFOO=1".to_string()],
            last_indexed_epoch_secs: 12345,
        };
        roundtrip(&ci, |v, buf| v.encode(buf), |r| CommandInfo::decode(r));
    }

    #[test]
    fn reference_roundtrip() {
        let r = Reference {
            range: SourceRange { file: "f.cpp".to_string(), line: 1, col: 18, end_line: 1, end_col: 21 },
            target_usr: "c:@v@var".to_string(),
        };
        roundtrip(&r, |v, buf| v.encode(buf), |rr| Reference::decode(rr));
    }

    #[test]
    fn range_contains_single_line_boundary_columns() {
        // S1: "int var = 0; int main(){return var;}" — `var` spans cols 18..21 on line 1.
        let range = SourceRange { file: "f.cpp".to_string(), line: 1, col: 18, end_line: 1, end_col: 21 };
        assert!(range.contains(1, 18));
        assert!(range.contains(1, 21));
        assert!(range.contains(1, 19));
        assert!(!range.contains(1, 17));
        assert!(!range.contains(1, 22));
        assert!(!range.contains(2, 18));
    }

    #[test]
    fn range_contains_interior_line_unconditionally() {
        let range = SourceRange { file: "f.cpp".to_string(), line: 1, col: 1, end_line: 5, end_col: 1 };
        assert!(range.contains(3, 9999));
        assert!(range.contains(1, 1));
        assert!(!range.contains(1, 0));
        assert!(range.contains(5, 1));
        assert!(!range.contains(5, 2));
    }
}
