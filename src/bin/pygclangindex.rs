//! `pygclangindex` — the semantic-index worker binary (§4.6, SPEC_FULL §2).
//!
//! A deliberately simple heuristic lexical scanner over the translation
//! unit's text, standing in for a real libclang-backed semantic analyzer
//! (out of scope for this exercise — see DESIGN.md). It recognizes:
//!   - `#include "x"` / `#include <x>` directives → `Inclusion` facts
//!     (`direct = true`; this scanner does not follow transitive includes).
//!   - top-level `ident ... name(...) {` function definitions → `DefInfo`
//!     facts, with a synthesized USR derived from the file and name.
//!   - `identifier(` call sites inside a function body → `CallEdge` facts
//!     from the enclosing function's USR to a USR synthesized the same way
//!     as a definition's, on the (best-effort, frequently wrong for
//!     overloaded or cross-TU names) assumption the callee is defined in
//!     the same file.
//!
//! Speaks the worker wire protocol (§worker) over its own stdin/stdout in
//! a strict request/response turn: read `Analyze` or `Shutdown`, and for
//! `Analyze` stream zero or more facts followed by `EndOfDefs` before
//! reading the next request.

use std::io::{self, BufReader, BufWriter, Write};

use pygmalion::fact::{CallEdge, CommandInfo, DefInfo, Inclusion, Location};
use pygmalion::worker::{decode_request, encode_end_of_defs, encode_fact, WorkerFact, WorkerRequest};

fn synthesize_usr(file: &str, name: &str) -> String {
    format!("c:@{}@F@{}", file, name)
}

/// One recognized top-level function definition.
struct FoundFunction {
    name: String,
    line: u32,
    col: u32,
    body_start_line_idx: usize,
}

/// Scans `text` for function-definition headers: an identifier followed by
/// `(...)` and then `{` (ignoring intervening whitespace/newlines), not
/// preceded by another `(` on the same logical statement (a crude filter
/// against call expressions). Declarations ending in `;` are skipped.
fn find_functions(lines: &[&str]) -> Vec<FoundFunction> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.is_empty() {
            continue;
        }
        if let Some(paren) = line.find('(') {
            if !line[..paren].ends_with(|c: char| c.is_alphanumeric() || c == '_') {
                continue;
            }
            let name_end = paren;
            let name_start = line[..name_end]
                .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                .map(|i| i + 1)
                .unwrap_or(0);
            let name = &line[name_start..name_end];
            if name.is_empty() || name == "if" || name == "for" || name == "while" || name == "switch" {
                continue;
            }
            let close = match line[paren..].find(')') {
                Some(p) => paren + p,
                None => continue,
            };
            let after = line[close + 1..].trim_start();
            let trailing_brace = after.starts_with('{') || after.is_empty();
            if !trailing_brace || line.trim_end().ends_with(';') {
                continue;
            }
            out.push(FoundFunction {
                name: name.to_string(),
                line: idx as u32 + 1,
                col: name_start as u32 + 1,
                body_start_line_idx: idx,
            });
        }
    }
    out
}

/// Scans the body lines following a function's header for `identifier(`
/// call sites, stopping at the matching closing brace counted by a simple
/// depth counter (heuristic: does not understand strings/comments).
fn find_calls(lines: &[&str], body_start_line_idx: usize) -> Vec<String> {
    let mut depth: i64 = 0;
    let mut seen_open = false;
    let mut calls = Vec::new();
    for line in &lines[body_start_line_idx..] {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if seen_open {
            let mut chars = line.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                if c == '(' && i > 0 {
                    let before = &line[..i];
                    let name_end = i;
                    let name_start = before
                        .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .map(|p| p + 1)
                        .unwrap_or(0);
                    let name = &before[name_start..name_end];
                    let keyword = matches!(name, "if" | "for" | "while" | "switch" | "return" | "sizeof" | "" );
                    if !keyword {
                        calls.push(name.to_string());
                    }
                }
            }
        }
        if seen_open && depth <= 0 {
            break;
        }
    }
    calls
}

fn analyze(ci: &CommandInfo, w: &mut impl Write) -> io::Result<()> {
    let text = std::fs::read_to_string(&ci.source_file).unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();

    for line in lines.iter() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#include") {
            let rest = rest.trim_start();
            let included = if let Some(stripped) = rest.strip_prefix('"') {
                stripped.split('"').next().map(|s| s.to_string())
            } else if let Some(stripped) = rest.strip_prefix('<') {
                stripped.split('>').next().map(|s| s.to_string())
            } else {
                None
            };
            if let Some(included) = included {
                let fact = WorkerFact::Inclusion(Inclusion {
                    includer: ci.source_file.clone(),
                    included,
                    direct: true,
                });
                encode_fact(w, &fact).map_err(to_io_error)?;
            }
        }
    }

    let functions = find_functions(&lines);
    for func in &functions {
        let usr = synthesize_usr(&ci.source_file, &func.name);
        let def = WorkerFact::Def(DefInfo {
            usr: usr.clone(),
            name: func.name.clone(),
            location: Location { file: ci.source_file.clone(), line: func.line, col: func.col },
            kind: "FunctionDecl".to_string(),
        });
        encode_fact(w, &def).map_err(to_io_error)?;

        for callee_name in find_calls(&lines, func.body_start_line_idx) {
            let callee_usr = synthesize_usr(&ci.source_file, &callee_name);
            let edge = WorkerFact::CallEdge(CallEdge { caller_usr: usr.clone(), callee_usr });
            encode_fact(w, &edge).map_err(to_io_error)?;
        }
    }

    encode_end_of_defs(w).map_err(to_io_error)
}

fn to_io_error(e: pygmalion::PygmalionError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn main() {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    loop {
        let request = match decode_request(&mut reader) {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                eprintln!("pygclangindex: protocol error: {e}");
                std::process::exit(1);
            }
        };

        match request {
            WorkerRequest::Analyze(ci) => {
                if let Err(e) = analyze(&ci, &mut writer) {
                    eprintln!("pygclangindex: analysis error for {}: {e}", ci.source_file);
                }
                let _ = writer.flush();
            }
            WorkerRequest::Shutdown => break,
        }
    }
}
