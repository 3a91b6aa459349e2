//! `compile_commands.json` exporter (§4.11, C12).
//!
//! Produces the JSON array documented in §6: one object per known source
//! file with `directory`, `command`, and `file` keys, in the shape clang
//! tooling (and every IDE that shells out to it) expects.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::fact::CommandInfo;
use crate::scheduler::SchedulerHandle;

#[derive(Debug, Serialize)]
struct CompileCommandEntry {
    directory: String,
    command: String,
    file: String,
}

impl From<&CommandInfo> for CompileCommandEntry {
    fn from(ci: &CommandInfo) -> Self {
        let mut command = ci.command.clone();
        for arg in &ci.args {
            command.push(' ');
            command.push_str(arg);
        }
        CompileCommandEntry {
            directory: ci.working_dir.clone(),
            command,
            file: ci.source_file.clone(),
        }
    }
}

/// Builds the exported JSON array from every `SourceFiles` row currently
/// known to the store.
pub fn build(handle: &SchedulerHandle) -> Result<Vec<u8>> {
    let infos = handle.get_all_command_infos()?;
    let entries: Vec<CompileCommandEntry> = infos.iter().map(CompileCommandEntry::from).collect();
    let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| crate::error::PygmalionError::ProtocolDesync {
        context: "serializing compile_commands.json".to_string(),
        detail: e.to_string(),
    })?;
    Ok(bytes)
}

/// Writes the exported database to `path` (conventionally
/// `<project_root>/compile_commands.json`). Called both from
/// `pygmalion --index-export` and automatically after a
/// `ResetMetadata`+replay sequence when `compilationDatabase` is set (§4.11).
pub fn write_to(handle: &SchedulerHandle, path: &Path) -> Result<()> {
    let bytes = build(handle)?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn ci(file: &str) -> CommandInfo {
        CommandInfo {
            source_file: file.to_string(),
            working_dir: "/proj".to_string(),
            command: "/usr/bin/c++".to_string(),
            args: vec!["-I.".to_string(), "-DFOO".to_string()],
            last_indexed_epoch_secs: 1,
        }
    }

    #[test]
    fn builds_one_entry_per_source_file_with_joined_args() {
        let mut store = Store::open_in_memory().unwrap();
        store.update_source_file(&ci("a.cpp")).unwrap();
        store.update_source_file(&ci("b.cpp")).unwrap();
        let handle = crate::scheduler::spawn(store);

        let bytes = build(&handle).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        let files: Vec<&str> = arr.iter().map(|e| e["file"].as_str().unwrap()).collect();
        assert!(files.contains(&"a.cpp"));
        assert!(files.contains(&"b.cpp"));
        let entry = arr.iter().find(|e| e["file"] == "a.cpp").unwrap();
        assert_eq!(entry["command"], "/usr/bin/c++ -I. -DFOO");
        assert_eq!(entry["directory"], "/proj");

        handle.shutdown();
    }

    #[test]
    fn empty_store_exports_empty_array() {
        let store = Store::open_in_memory().unwrap();
        let handle = crate::scheduler::spawn(store);
        let bytes = build(&handle).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 0);
        handle.shutdown();
    }

    #[test]
    fn write_to_creates_file_on_disk() {
        let store = Store::open_in_memory().unwrap();
        let handle = crate::scheduler::spawn(store);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compile_commands.json");

        write_to(&handle, &path).unwrap();
        assert!(path.exists());

        handle.shutdown();
    }
}
