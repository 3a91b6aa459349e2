//! Embedded SQL store: schema, tuning, and fact upsert/query primitives
//! (§4.2, §4.4).
//!
//! The store is the only component that touches the on-disk `.pygmalion.sqlite`
//! file, and — per the concurrency model (§5) — is only ever driven from the
//! scheduler's single writer thread. Every hot-path statement goes through
//! `rusqlite`'s own cached-statement machinery (`Connection::prepare_cached`)
//! rather than a hand-rolled cache: rusqlite already owns the
//! prepare-once/rebind-many/finalize-on-drop lifecycle this component needs,
//! and a self-referential cache struct would fight the borrow checker for no
//! benefit (see DESIGN.md).

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PygmalionError, Result};
use crate::fact::{CallEdge, CommandInfo, DefInfo, Inclusion, Location, Override, Reference, SourceRange};
use crate::hash::hash_str;
use crate::paths::{clean_path, directory_prefix};
use crate::SCHEMA_VERSION;

/// Hash key for a file path: every file-identifying column (`Files`,
/// `SourceFiles.FileHash`, `Inclusions`, `Definitions.FileHash`,
/// `Refs.FileHash`) is keyed on the *normalized* path, not the raw text a
/// caller happened to pass in. Without this, `./src/a.cpp` and `src/a.cpp`
/// hash to different keys even though `getSimilarCommandInfo`'s directory
/// match (§4.4, §9) assumes one normalized form — applying normalization
/// only on the query side (as `directory_prefix` always did) is not enough
/// if the stored text was never normalized on the way in.
fn file_hash(path: &str) -> i64 {
    hash_str(&clean_path(path))
}

/// An open store handle. Not `Sync` — callers must confine it to one thread
/// (the writer thread, §4.5); `get_*` operations are read-only and safe to
/// call outside a transaction (§4.4).
pub struct Store {
    conn: Connection,
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS Metadata (Key TEXT PRIMARY KEY, Value TEXT NOT NULL);

CREATE TABLE IF NOT EXISTS Files (Hash INTEGER PRIMARY KEY, Text TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS Paths (Hash INTEGER PRIMARY KEY, Text TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS BuildCommands (Hash INTEGER PRIMARY KEY, Text TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS BuildArgs (Hash INTEGER PRIMARY KEY, Text TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS Kinds (Hash INTEGER PRIMARY KEY, Text TEXT NOT NULL);

CREATE TABLE IF NOT EXISTS SourceFiles (
    FileHash INTEGER PRIMARY KEY,
    WorkingDirHash INTEGER NOT NULL,
    CommandHash INTEGER NOT NULL,
    LastIndexed INTEGER NOT NULL
);

-- Normalizes CommandInfo.args (an ordered list) against the BuildArgs dictionary.
CREATE TABLE IF NOT EXISTS SourceFileArgs (
    FileHash INTEGER NOT NULL,
    Ord INTEGER NOT NULL,
    ArgHash INTEGER NOT NULL,
    PRIMARY KEY (FileHash, Ord)
);

CREATE TABLE IF NOT EXISTS Inclusions (
    IncluderHash INTEGER NOT NULL,
    IncludedHash INTEGER NOT NULL,
    Direct INTEGER NOT NULL,
    PRIMARY KEY (IncluderHash, IncludedHash)
);
CREATE INDEX IF NOT EXISTS IdxInclusionsIncluded ON Inclusions (IncludedHash);

CREATE TABLE IF NOT EXISTS Definitions (
    UsrHash INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    Usr TEXT NOT NULL,
    FileHash INTEGER NOT NULL,
    Line INTEGER NOT NULL,
    Col INTEGER NOT NULL,
    KindHash INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS IdxDefinitionsFile ON Definitions (FileHash);

CREATE TABLE IF NOT EXISTS Overrides (
    DefiningUsrHash INTEGER NOT NULL,
    OverriddenUsrHash INTEGER NOT NULL,
    PRIMARY KEY (DefiningUsrHash, OverriddenUsrHash)
);
CREATE INDEX IF NOT EXISTS IdxOverridesOverridden ON Overrides (OverriddenUsrHash);

CREATE TABLE IF NOT EXISTS Callers (
    CallerUsrHash INTEGER NOT NULL,
    CalleeUsrHash INTEGER NOT NULL,
    PRIMARY KEY (CallerUsrHash, CalleeUsrHash)
);
CREATE INDEX IF NOT EXISTS IdxCallersCallee ON Callers (CalleeUsrHash);

CREATE TABLE IF NOT EXISTS Refs (
    FileHash INTEGER NOT NULL,
    Line INTEGER NOT NULL,
    Col INTEGER NOT NULL,
    EndLine INTEGER NOT NULL,
    EndCol INTEGER NOT NULL,
    RefUsrHash INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS IdxRefsFile ON Refs (FileHash, Line, EndLine);
CREATE INDEX IF NOT EXISTS IdxRefsTarget ON Refs (RefUsrHash);
";

impl Store {
    /// Open (creating if absent) the store file at `path`, apply pragma
    /// tuning, ensure the schema exists, and check the schema version.
    /// Any failure here is a fatal-startup error (§7) — callers should log
    /// and exit rather than retry, except for the historical open-connection
    /// retry policy (§7) which callers may layer on top of this function.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA_SQL)?;
        check_or_set_schema_version(&conn)?;
        Ok(Store { conn })
    }

    /// In-memory store, used by tests and by `pygclangindex`'s dry-run mode.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA_SQL)?;
        check_or_set_schema_version(&conn)?;
        Ok(Store { conn })
    }

    fn with_transaction<R>(&mut self, f: impl FnOnce(&rusqlite::Transaction) -> rusqlite::Result<R>) -> Result<R> {
        let tx = self.conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn intern(tx: &rusqlite::Transaction, table: &str, text: &str) -> rusqlite::Result<i64> {
        let h = hash_str(text);
        tx.prepare_cached(&format!("INSERT OR IGNORE INTO {table} (Hash, Text) VALUES (?1, ?2)"))?
            .execute(params![h, text])?;
        Ok(h)
    }

    // ---- C4 update operations -------------------------------------------------

    /// `updateSourceFile(ci)` (§4.4): atomic across the dictionary inserts and
    /// the `SourceFiles`/`SourceFileArgs` upsert.
    pub fn update_source_file(&mut self, ci: &CommandInfo) -> Result<()> {
        self.with_transaction(|tx| {
            let file_hash = Self::intern(tx, "Files", &clean_path(&ci.source_file))?;
            let dir_hash = Self::intern(tx, "Paths", &ci.working_dir)?;
            let cmd_hash = Self::intern(tx, "BuildCommands", &ci.command)?;

            tx.prepare_cached(
                "INSERT INTO SourceFiles (FileHash, WorkingDirHash, CommandHash, LastIndexed)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(FileHash) DO UPDATE SET
                   WorkingDirHash = excluded.WorkingDirHash,
                   CommandHash = excluded.CommandHash,
                   LastIndexed = excluded.LastIndexed",
            )?
            .execute(params![file_hash, dir_hash, cmd_hash, ci.last_indexed_epoch_secs as i64])?;

            tx.prepare_cached("DELETE FROM SourceFileArgs WHERE FileHash = ?1")?
                .execute(params![file_hash])?;
            for (ord, arg) in ci.args.iter().enumerate() {
                let arg_hash = Self::intern(tx, "BuildArgs", arg)?;
                tx.prepare_cached(
                    "INSERT INTO SourceFileArgs (FileHash, Ord, ArgHash) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![file_hash, ord as i64, arg_hash])?;
            }
            Ok(())
        })
    }

    /// `updateInclusion(inc)` (§4.4).
    pub fn update_inclusion(&mut self, inc: &Inclusion) -> Result<()> {
        self.with_transaction(|tx| {
            let includer = Self::intern(tx, "Files", &clean_path(&inc.includer))?;
            let included = Self::intern(tx, "Files", &clean_path(&inc.included))?;
            tx.prepare_cached(
                "INSERT INTO Inclusions (IncluderHash, IncludedHash, Direct) VALUES (?1, ?2, ?3)
                 ON CONFLICT(IncluderHash, IncludedHash) DO UPDATE SET Direct = excluded.Direct",
            )?
            .execute(params![includer, included, inc.direct])?;
            Ok(())
        })
    }

    /// `updateDef(def)` (§4.4).
    pub fn update_def(&mut self, def: &DefInfo) -> Result<()> {
        self.with_transaction(|tx| {
            let file_hash = Self::intern(tx, "Files", &clean_path(&def.location.file))?;
            let kind_hash = Self::intern(tx, "Kinds", &def.kind)?;
            let usr_hash = hash_str(&def.usr);
            tx.prepare_cached(
                "INSERT INTO Definitions (UsrHash, Name, Usr, FileHash, Line, Col, KindHash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(UsrHash) DO UPDATE SET
                   Name = excluded.Name, Usr = excluded.Usr, FileHash = excluded.FileHash,
                   Line = excluded.Line, Col = excluded.Col, KindHash = excluded.KindHash",
            )?
            .execute(params![
                usr_hash, def.name, def.usr, file_hash, def.location.line, def.location.col, kind_hash
            ])?;
            Ok(())
        })
    }

    /// `updateOverride(ov)` (§4.4). Edge upsert; also encodes base-class links.
    pub fn update_override(&mut self, ov: &Override) -> Result<()> {
        let defining = hash_str(&ov.defining_usr);
        let overridden = hash_str(&ov.overridden_usr);
        self.conn.prepare_cached(
            "INSERT OR REPLACE INTO Overrides (DefiningUsrHash, OverriddenUsrHash) VALUES (?1, ?2)",
        )?
        .execute(params![defining, overridden])?;
        Ok(())
    }

    /// `updateCaller(c)` (§4.4). `(Caller, Callee)` pairs are unique (invariant 4).
    pub fn update_caller(&mut self, edge: &CallEdge) -> Result<()> {
        let caller = hash_str(&edge.caller_usr);
        let callee = hash_str(&edge.callee_usr);
        self.conn.prepare_cached(
            "INSERT OR REPLACE INTO Callers (CallerUsrHash, CalleeUsrHash) VALUES (?1, ?2)",
        )?
        .execute(params![caller, callee])?;
        Ok(())
    }

    /// `updateReference(ref)` (§4.4).
    pub fn update_reference(&mut self, r: &Reference) -> Result<()> {
        self.with_transaction(|tx| {
            let file_hash = Self::intern(tx, "Files", &clean_path(&r.range.file))?;
            let target_hash = hash_str(&r.target_usr);
            tx.prepare_cached(
                "INSERT INTO Refs (FileHash, Line, Col, EndLine, EndCol, RefUsrHash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![file_hash, r.range.line, r.range.col, r.range.end_line, r.range.end_col, target_hash])?;
            Ok(())
        })
    }

    /// `insertFileAndCheck(sf) -> bool` (§4.4): `true` iff this was the first
    /// time `sf` was seen. Used to dedupe worker dispatch.
    pub fn insert_file_and_check(&mut self, file: &str) -> Result<bool> {
        let cleaned = clean_path(file);
        let h = hash_str(&cleaned);
        let changed = self.conn.prepare_cached("INSERT OR IGNORE INTO Files (Hash, Text) VALUES (?1, ?2)")?
            .execute(params![h, cleaned])?;
        Ok(changed == 1)
    }

    /// `resetMetadata(sf)` (§4.4): called once per TU before replaying its
    /// new facts, so that a re-index does not accumulate stale inclusions,
    /// references, or definitions for that file. Call-edges and overrides
    /// are intentionally untouched (§3 lifecycle, §9 open question).
    pub fn reset_metadata(&mut self, file: &str) -> Result<()> {
        let file_hash = file_hash(file);
        self.with_transaction(|tx| {
            tx.prepare_cached("DELETE FROM Inclusions WHERE IncluderHash = ?1")?
                .execute(params![file_hash])?;
            tx.prepare_cached("DELETE FROM Refs WHERE FileHash = ?1")?
                .execute(params![file_hash])?;
            tx.prepare_cached("DELETE FROM Definitions WHERE FileHash = ?1")?
                .execute(params![file_hash])?;
            Ok(())
        })
    }

    // ---- C4 query operations ----------------------------------------------

    fn command_info_for_file_hash(&self, file_hash: i64, reported_source_file: &str) -> Result<Option<CommandInfo>> {
        let row: Option<(i64, i64, i64)> = self
            .conn
            .prepare_cached("SELECT WorkingDirHash, CommandHash, LastIndexed FROM SourceFiles WHERE FileHash = ?1")?
            .query_row(params![file_hash], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;
        let Some((dir_hash, cmd_hash, last_indexed)) = row else { return Ok(None) };

        let working_dir: String = self
            .conn
            .prepare_cached("SELECT Text FROM Paths WHERE Hash = ?1")?
            .query_row(params![dir_hash], |r| r.get(0))?;
        let command: String = self
            .conn
            .prepare_cached("SELECT Text FROM BuildCommands WHERE Hash = ?1")?
            .query_row(params![cmd_hash], |r| r.get(0))?;

        let mut args_stmt = self.conn.prepare_cached(
            "SELECT BuildArgs.Text FROM SourceFileArgs
             JOIN BuildArgs ON BuildArgs.Hash = SourceFileArgs.ArgHash
             WHERE SourceFileArgs.FileHash = ?1 ORDER BY SourceFileArgs.Ord",
        )?;
        let args = args_stmt
            .query_map(params![file_hash], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(CommandInfo {
            source_file: reported_source_file.to_string(),
            working_dir,
            command,
            args,
            last_indexed_epoch_secs: last_indexed as u64,
        }))
    }

    /// `getCommandInfo(sf) -> Option<CommandInfo>` (§4.4): exact-file lookup.
    pub fn get_command_info(&self, file: &str) -> Result<Option<CommandInfo>> {
        self.command_info_for_file_hash(file_hash(file), file)
    }

    /// `getSimilarCommandInfo(sf) -> Option<CommandInfo>` (§4.4): sibling-directory
    /// fallback. "Arbitrary match" among candidates is the documented behaviour.
    pub fn get_similar_command_info(&self, file: &str) -> Result<Option<CommandInfo>> {
        let prefix = directory_prefix(file);
        let pattern = format!("{prefix}%");
        let candidate: Option<(i64, String)> = self
            .conn
            .prepare_cached(
                "SELECT Files.Hash, Files.Text FROM Files
                 JOIN SourceFiles ON SourceFiles.FileHash = Files.Hash
                 WHERE Files.Text LIKE ?1 ESCAPE '\\' LIMIT 1",
            )?
            .query_row(params![pattern], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        match candidate {
            Some((file_hash, _text)) => self.command_info_for_file_hash(file_hash, file),
            None => Ok(None),
        }
    }

    fn def_info_from_row(&self, usr_hash: i64, name: String, usr: String, file_hash: i64, line: u32, col: u32, kind_hash: i64) -> Result<DefInfo> {
        let _ = usr_hash;
        let file: String = self
            .conn
            .prepare_cached("SELECT Text FROM Files WHERE Hash = ?1")?
            .query_row(params![file_hash], |r| r.get(0))?;
        let kind: String = self
            .conn
            .prepare_cached("SELECT Text FROM Kinds WHERE Hash = ?1")?
            .query_row(params![kind_hash], |r| r.get(0))?;
        Ok(DefInfo { usr, name, location: Location { file, line, col }, kind })
    }

    /// `getDefinition(usr) -> Option<DefInfo>` (§4.4).
    pub fn get_definition(&self, usr: &str) -> Result<Option<DefInfo>> {
        let usr_hash = hash_str(usr);
        let row: Option<(String, String, i64, u32, u32, i64)> = self
            .conn
            .prepare_cached("SELECT Name, Usr, FileHash, Line, Col, KindHash FROM Definitions WHERE UsrHash = ?1")?
            .query_row(params![usr_hash], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })
            .optional()?;
        match row {
            Some((name, usr_text, file_hash, line, col, kind_hash)) => {
                Ok(Some(self.def_info_from_row(usr_hash, name, usr_text, file_hash, line, col, kind_hash)?))
            }
            None => Ok(None),
        }
    }

    /// `getIncluders(sf) -> [CommandInfo]` (§4.4): all TUs that (transitively)
    /// include `sf`, per the `Inclusions` edges the worker already flattened.
    pub fn get_includers(&self, file: &str) -> Result<Vec<CommandInfo>> {
        let included_hash = file_hash(file);
        let mut stmt = self.conn.prepare_cached(
            "SELECT Files.Hash, Files.Text FROM Inclusions
             JOIN Files ON Files.Hash = Inclusions.IncluderHash
             JOIN SourceFiles ON SourceFiles.FileHash = Inclusions.IncluderHash
             WHERE Inclusions.IncludedHash = ?1",
        )?;
        let includers = stmt
            .query_map(params![included_hash], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(includers.len());
        for (file_hash, text) in includers {
            if let Some(ci) = self.command_info_for_file_hash(file_hash, &text)? {
                out.push(ci);
            }
        }
        Ok(out)
    }

    fn defs_via_edge(&self, table: &str, key_col: &str, target_col: &str, usr: &str) -> Result<Vec<DefInfo>> {
        let usr_hash = hash_str(usr);
        let sql = format!(
            "SELECT d.UsrHash, d.Name, d.Usr, d.FileHash, d.Line, d.Col, d.KindHash
             FROM {table} e JOIN Definitions d ON d.UsrHash = e.{target_col}
             WHERE e.{key_col} = ?1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![usr_hash], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, i64>(3)?, r.get::<_, u32>(4)?, r.get::<_, u32>(5)?, r.get::<_, i64>(6)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(uh, name, usr_text, file_hash, line, col, kind_hash)| {
                self.def_info_from_row(uh, name, usr_text, file_hash, line, col, kind_hash)
            })
            .collect()
    }

    /// `getCallers(usr) -> [DefInfo]` (§4.4): missing endpoints dropped (invariant 1).
    pub fn get_callers(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.defs_via_edge("Callers", "CalleeUsrHash", "CallerUsrHash", usr)
    }

    /// `getCallees(usr) -> [DefInfo]` (§4.4).
    pub fn get_callees(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.defs_via_edge("Callers", "CallerUsrHash", "CalleeUsrHash", usr)
    }

    /// `getBases(usr) -> [DefInfo]` (§4.4): the methods/classes `usr` overrides.
    pub fn get_bases(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.defs_via_edge("Overrides", "DefiningUsrHash", "OverriddenUsrHash", usr)
    }

    /// `getOverriders(usr) -> [DefInfo]` (§4.4): the methods that override `usr`.
    pub fn get_overriders(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.defs_via_edge("Overrides", "OverriddenUsrHash", "DefiningUsrHash", usr)
    }

    /// `getReferences(usr) -> [SourceRange]` (§4.4): inverse index.
    pub fn get_references(&self, usr: &str) -> Result<Vec<SourceRange>> {
        let usr_hash = hash_str(usr);
        let mut stmt = self.conn.prepare_cached(
            "SELECT Files.Text, Refs.Line, Refs.Col, Refs.EndLine, Refs.EndCol
             FROM Refs JOIN Files ON Files.Hash = Refs.FileHash
             WHERE Refs.RefUsrHash = ?1",
        )?;
        let rows = stmt
            .query_map(params![usr_hash], |r| {
                Ok(SourceRange {
                    file: r.get(0)?,
                    line: r.get(1)?,
                    col: r.get(2)?,
                    end_line: r.get(3)?,
                    end_col: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All `SourceFiles` rows, for the `compile_commands.json` exporter
    /// (§6, SPEC_FULL §4.11). Read-only, safe outside a transaction.
    pub fn get_all_command_infos(&self) -> Result<Vec<CommandInfo>> {
        let rows: Vec<(i64, String)> = self
            .conn
            .prepare_cached("SELECT Files.Hash, Files.Text FROM SourceFiles JOIN Files ON Files.Hash = SourceFiles.FileHash")?
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (file_hash, text) in rows {
            if let Some(ci) = self.command_info_for_file_hash(file_hash, &text)? {
                out.push(ci);
            }
        }
        Ok(out)
    }

    /// `getReferenced(loc) -> [DefInfo]` (§4.4): range-containment lookup.
    /// Interior lines match unconditionally; boundary lines bound by column.
    pub fn get_referenced(&self, file: &str, line: u32, col: u32) -> Result<Vec<DefInfo>> {
        let file_hash = file_hash(file);
        let mut stmt = self.conn.prepare_cached(
            "SELECT d.UsrHash, d.Name, d.Usr, d.FileHash, d.Line, d.Col, d.KindHash
             FROM Refs r JOIN Definitions d ON d.UsrHash = r.RefUsrHash
             WHERE r.FileHash = ?1
               AND ((?2 BETWEEN r.Line + 1 AND r.EndLine - 1)
                    OR (?2 = r.Line AND ?3 >= r.Col)
                    OR (?2 = r.EndLine AND ?3 <= r.EndCol))",
        )?;
        let rows = stmt
            .query_map(params![file_hash, line, col], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, i64>(3)?, r.get::<_, u32>(4)?, r.get::<_, u32>(5)?, r.get::<_, i64>(6)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(uh, name, usr_text, file_hash, l, c, kind_hash)| {
                self.def_info_from_row(uh, name, usr_text, file_hash, l, c, kind_hash)
            })
            .collect()
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
    conn.pragma_update(None, "page_size", 4096)?;
    conn.pragma_update(None, "cache_size", -40_000)?; // ~40 MiB, negative = KiB
    Ok(())
}

fn check_or_set_schema_version(conn: &Connection) -> Result<()> {
    let existing: Option<String> = conn
        .prepare_cached("SELECT Value FROM Metadata WHERE Key = 'schemaVersion'")?
        .query_row([], |r| r.get(0))
        .optional()?;
    match existing {
        Some(v) => {
            let parsed = parse_version(&v);
            if parsed != Some(SCHEMA_VERSION) {
                let (major, minor) = parsed.unwrap_or((-1, -1));
                return Err(PygmalionError::SchemaVersionMismatch(
                    major, minor, SCHEMA_VERSION.0, SCHEMA_VERSION.1,
                ));
            }
        }
        None => {
            let value = format!("{}.{}", SCHEMA_VERSION.0, SCHEMA_VERSION.1);
            conn.prepare_cached("INSERT INTO Metadata (Key, Value) VALUES ('schemaVersion', ?1)")?
                .execute(params![value])?;
            conn.prepare_cached("INSERT OR IGNORE INTO Metadata (Key, Value) VALUES ('tool', 'pygmalion')")?
                .execute([])?;
        }
    }
    Ok(())
}

fn parse_version(s: &str) -> Option<(i64, i64)> {
    let mut parts = s.splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_info(file: &str) -> CommandInfo {
        CommandInfo {
            source_file: file.to_string(),
            working_dir: "/proj".to_string(),
            command: "/usr/bin/c++".to_string(),
            args: vec!["-I.".to_string(), "-std=c++20".to_string()],
            last_indexed_epoch_secs: 100,
        }
    }

    #[test]
    fn open_in_memory_sets_schema_version() {
        let store = Store::open_in_memory().unwrap();
        let v: String = store
            .conn
            .query_row("SELECT Value FROM Metadata WHERE Key = 'schemaVersion'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, "0.8");
    }

    #[test]
    fn reopen_with_matching_version_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sqlite");
        {
            Store::open(&path).unwrap();
        }
        Store::open(&path).unwrap();
    }

    #[test]
    fn reopen_with_mismatched_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            apply_pragmas(&conn).unwrap();
            conn.execute_batch(SCHEMA_SQL).unwrap();
            conn.execute("INSERT INTO Metadata (Key, Value) VALUES ('schemaVersion', '0.7')", []).unwrap();
        }
        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, PygmalionError::SchemaVersionMismatch(0, 7, 0, 8)));
    }

    #[test]
    fn update_and_get_command_info_roundtrips() {
        let mut store = Store::open_in_memory().unwrap();
        let ci = command_info("a.cpp");
        store.update_source_file(&ci).unwrap();
        let got = store.get_command_info("a.cpp").unwrap().unwrap();
        assert_eq!(got, ci);
    }

    #[test]
    fn non_canonical_insert_path_is_queryable_in_canonical_form() {
        // A command observed with a `./`-prefixed path must still be found
        // (and still drive the similar-command fallback) when later queried
        // by its canonical form, and vice versa — insert and query must
        // normalize to the same key.
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("./src/a.cpp")).unwrap();
        let got = store.get_command_info("src/a.cpp").unwrap().unwrap();
        assert_eq!(got.command, "/usr/bin/c++");

        let similar = store.get_similar_command_info("src/b.cpp").unwrap().unwrap();
        assert_eq!(similar.source_file, "src/b.cpp");
    }

    #[test]
    fn get_command_info_miss_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_command_info("nope.cpp").unwrap(), None);
    }

    #[test]
    fn insert_file_and_check_reports_only_first_insertion() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.insert_file_and_check("a.cpp").unwrap());
        assert!(!store.insert_file_and_check("a.cpp").unwrap());
    }

    #[test]
    fn scenario_s2_callers_and_callees() {
        // S2: void a(){b();} void b(){}
        let mut store = Store::open_in_memory().unwrap();
        let def_a = DefInfo { usr: "usr_a".into(), name: "a".into(), location: Location { file: "f.cpp".into(), line: 1, col: 6 }, kind: "FunctionDecl".into() };
        let def_b = DefInfo { usr: "usr_b".into(), name: "b".into(), location: Location { file: "f.cpp".into(), line: 1, col: 21 }, kind: "FunctionDecl".into() };
        store.update_def(&def_a).unwrap();
        store.update_def(&def_b).unwrap();
        store.update_caller(&CallEdge { caller_usr: "usr_a".into(), callee_usr: "usr_b".into() }).unwrap();

        let callees = store.get_callees("usr_a").unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].usr, "usr_b");

        let callers = store.get_callers("usr_b").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].usr, "usr_a");
    }

    #[test]
    fn call_edge_pairs_are_unique_under_repeated_updates() {
        let mut store = Store::open_in_memory().unwrap();
        let edge = CallEdge { caller_usr: "usr_a".into(), callee_usr: "usr_b".into() };
        let def_b = DefInfo { usr: "usr_b".into(), name: "b".into(), location: Location { file: "f.cpp".into(), line: 1, col: 1 }, kind: "FunctionDecl".into() };
        store.update_def(&def_b).unwrap();
        store.update_caller(&edge).unwrap();
        store.update_caller(&edge).unwrap();
        store.update_caller(&edge).unwrap();
        assert_eq!(store.get_callees("usr_a").unwrap().len(), 1);
    }

    #[test]
    fn scenario_s4_similar_command_fallback() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("src/a.cpp")).unwrap();
        let got = store.get_similar_command_info("src/b.cpp").unwrap().unwrap();
        assert_eq!(got.source_file, "src/b.cpp");
        assert_eq!(got.command, "/usr/bin/c++");
        assert_eq!(got.args, vec!["-I.".to_string(), "-std=c++20".to_string()]);
    }

    #[test]
    fn scenario_s3_includer_fallback() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("a.cpp")).unwrap();
        store.update_inclusion(&Inclusion { includer: "a.cpp".into(), included: "h.hpp".into(), direct: true }).unwrap();

        assert_eq!(store.get_command_info("h.hpp").unwrap(), None);

        let includers = store.get_includers("h.hpp").unwrap();
        assert_eq!(includers.len(), 1);
        assert_eq!(includers[0].source_file, "a.cpp");
    }

    #[test]
    fn scenario_s5_reset_semantics_drop_stale_defs_and_refs_but_not_edges() {
        let mut store = Store::open_in_memory().unwrap();
        let def = DefInfo { usr: "usr_gone".into(), name: "gone".into(), location: Location { file: "t.cpp".into(), line: 2, col: 1 }, kind: "FunctionDecl".into() };
        store.update_def(&def).unwrap();
        store.update_reference(&Reference {
            range: SourceRange { file: "t.cpp".into(), line: 2, col: 1, end_line: 2, end_col: 4 },
            target_usr: "usr_gone".into(),
        }).unwrap();
        store.update_caller(&CallEdge { caller_usr: "usr_other".into(), callee_usr: "usr_gone".into() }).unwrap();

        store.reset_metadata("t.cpp").unwrap();

        assert_eq!(store.get_definition("usr_gone").unwrap(), None);
        assert!(store.get_references("usr_gone").unwrap().is_empty());
        // Call edges are not file-keyed and persist (documented limitation).
        let raw: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM Callers WHERE CalleeUsrHash = ?1", params![hash_str("usr_gone")], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, 1);
    }

    #[test]
    fn scenario_s1_def_at_cursor() {
        // int var = 0; int main(){return var;}
        let mut store = Store::open_in_memory().unwrap();
        store.update_def(&DefInfo {
            usr: "usr_var".into(), name: "var".into(),
            location: Location { file: "f.cpp".into(), line: 1, col: 5 },
            kind: "VarDecl".into(),
        }).unwrap();
        store.update_reference(&Reference {
            range: SourceRange { file: "f.cpp".into(), line: 1, col: 18, end_line: 1, end_col: 21 },
            target_usr: "usr_var".into(),
        }).unwrap();

        let found = store.get_referenced("f.cpp", 1, 18).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "var");
        assert_eq!(found[0].kind, "VarDecl");
        assert_eq!(found[0].location, Location { file: "f.cpp".into(), line: 1, col: 5 });
    }

    #[test]
    fn bases_and_overriders_are_symmetric() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_def(&DefInfo { usr: "child".into(), name: "Child::m".into(), location: Location { file: "f.cpp".into(), line: 1, col: 1 }, kind: "CXXMethod".into() }).unwrap();
        store.update_def(&DefInfo { usr: "parent".into(), name: "Base::m".into(), location: Location { file: "f.cpp".into(), line: 2, col: 1 }, kind: "CXXMethod".into() }).unwrap();
        store.update_override(&Override { defining_usr: "child".into(), overridden_usr: "parent".into() }).unwrap();

        assert_eq!(store.get_bases("child").unwrap()[0].usr, "parent");
        assert_eq!(store.get_overriders("parent").unwrap()[0].usr, "child");
    }

    #[test]
    fn get_all_command_infos_returns_every_source_file() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("a.cpp")).unwrap();
        store.update_source_file(&command_info("b.cpp")).unwrap();
        let mut all = store.get_all_command_infos().unwrap();
        all.sort_by(|a, b| a.source_file.cmp(&b.source_file));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_file, "a.cpp");
        assert_eq!(all[1].source_file, "b.cpp");
    }

    #[test]
    fn dangling_edge_endpoints_are_silently_dropped() {
        let mut store = Store::open_in_memory().unwrap();
        // usr_callee has no Definition row yet (invariant 1).
        store.update_caller(&CallEdge { caller_usr: "usr_caller".into(), callee_usr: "usr_callee".into() }).unwrap();
        assert!(store.get_callees("usr_caller").unwrap().is_empty());
    }
}
