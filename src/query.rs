//! Query surface (§4.7): thin translation from client intents to store
//! operations via the scheduler's query channel. Every operation here is a
//! one-line forward except `compile_flags_for_file`, the only non-trivial
//! one (§4.7).

use crate::error::Result;
use crate::fact::{CommandInfo, DefInfo, SourceRange};
use crate::scheduler::SchedulerHandle;

/// A handle to the query surface. Cheap to construct — it's just a
/// `SchedulerHandle` with friendlier, client-facing method names matching
/// the CLI subcommands of §6.
pub struct QuerySurface {
    handle: SchedulerHandle,
}

impl QuerySurface {
    pub fn new(handle: SchedulerHandle) -> Self {
        QuerySurface { handle }
    }

    /// `definition <file> <line> <col>` (§6): what symbol is at this cursor?
    /// Backed by the range-containment lookup (§4.4 `getReferenced`).
    pub fn definition_at(&self, file: &str, line: u32, col: u32) -> Result<Vec<DefInfo>> {
        self.handle.get_referenced(file, line, col)
    }

    pub fn callers(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.handle.get_callers(usr)
    }

    pub fn callees(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.handle.get_callees(usr)
    }

    pub fn bases(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.handle.get_bases(usr)
    }

    pub fn overrides(&self, usr: &str) -> Result<Vec<DefInfo>> {
        self.handle.get_overriders(usr)
    }

    pub fn references(&self, usr: &str) -> Result<Vec<SourceRange>> {
        self.handle.get_references(usr)
    }

    /// `compile-flags <file>` (§4.7): tries `getCommandInfo`, falls back to
    /// `getIncluders` (the first one found), then `getSimilarCommandInfo`.
    /// Returns whichever lookup succeeded first.
    pub fn compile_flags_for_file(&self, file: &str) -> Result<Option<CommandInfo>> {
        if let Some(ci) = self.handle.get_command_info(file)? {
            return Ok(Some(ci));
        }
        let includers = self.handle.get_includers(file)?;
        if let Some(first) = includers.into_iter().next() {
            return Ok(Some(first));
        }
        self.handle.get_similar_command_info(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{CallEdge, Inclusion, Location};
    use crate::store::Store;

    fn command_info(file: &str) -> CommandInfo {
        CommandInfo {
            source_file: file.to_string(),
            working_dir: "/proj".to_string(),
            command: "/usr/bin/c++".to_string(),
            args: vec!["-I.".to_string()],
            last_indexed_epoch_secs: 1,
        }
    }

    #[test]
    fn compile_flags_exact_match_wins() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("a.cpp")).unwrap();
        let handle = crate::scheduler::spawn(store);
        let surface = QuerySurface::new(handle.clone());

        let ci = surface.compile_flags_for_file("a.cpp").unwrap().unwrap();
        assert_eq!(ci.source_file, "a.cpp");
        handle.shutdown();
    }

    #[test]
    fn compile_flags_falls_back_to_includer_scenario_s3() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("a.cpp")).unwrap();
        store.update_inclusion(&Inclusion { includer: "a.cpp".into(), included: "h.hpp".into(), direct: true }).unwrap();
        let handle = crate::scheduler::spawn(store);
        let surface = QuerySurface::new(handle.clone());

        let ci = surface.compile_flags_for_file("h.hpp").unwrap().unwrap();
        assert_eq!(ci.command, "/usr/bin/c++");
        handle.shutdown();
    }

    #[test]
    fn compile_flags_falls_back_to_similar_command_scenario_s4() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&command_info("src/a.cpp")).unwrap();
        let handle = crate::scheduler::spawn(store);
        let surface = QuerySurface::new(handle.clone());

        let ci = surface.compile_flags_for_file("src/b.cpp").unwrap().unwrap();
        assert_eq!(ci.source_file, "src/b.cpp");
        assert_eq!(ci.command, "/usr/bin/c++");
        handle.shutdown();
    }

    #[test]
    fn compile_flags_total_miss_is_none() {
        let store = Store::open_in_memory().unwrap();
        let handle = crate::scheduler::spawn(store);
        let surface = QuerySurface::new(handle.clone());

        assert_eq!(surface.compile_flags_for_file("nope.cpp").unwrap(), None);
        handle.shutdown();
    }

    #[test]
    fn callers_and_callees_forward_to_store() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_def(&DefInfo { usr: "a".into(), name: "a".into(), location: Location { file: "f.cpp".into(), line: 1, col: 1 }, kind: "FunctionDecl".into() }).unwrap();
        store.update_def(&DefInfo { usr: "b".into(), name: "b".into(), location: Location { file: "f.cpp".into(), line: 2, col: 1 }, kind: "FunctionDecl".into() }).unwrap();
        store.update_caller(&CallEdge { caller_usr: "a".into(), callee_usr: "b".into() }).unwrap();
        let handle = crate::scheduler::spawn(store);
        let surface = QuerySurface::new(handle.clone());

        assert_eq!(surface.callees("a").unwrap()[0].usr, "b");
        assert_eq!(surface.callers("b").unwrap()[0].usr, "a");
        handle.shutdown();
    }
}
