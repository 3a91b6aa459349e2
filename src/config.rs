//! YAML configuration loader (§6, SPEC_FULL §4.8).
//!
//! `.pygmalion.conf` is optional; a missing file is not an error (all
//! defaults apply), but a present-and-malformed file is a fatal startup
//! error of the same class as a DB-open failure (§7).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PygmalionError, Result};

/// Recognized `logLevel` values (§6), collapsing the syslog-style vocabulary
/// onto `tracing::Level` in [`crate::logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// `.pygmalion.conf` (§6). Every field has a documented default, applied
/// when the key is absent from the YAML document or the file itself is
/// absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command template; `$(args)` expands to CLI args (appended if
    /// absent), `$(projectroot)` to the project root.
    pub make: String,
    /// `0` means one worker per core.
    #[serde(rename = "indexingThreads")]
    pub indexing_threads: u32,
    /// Auto-regenerate `compile_commands.json` after indexing.
    #[serde(rename = "compilationDatabase")]
    pub compilation_database: bool,
    /// Auto-regenerate ctags after indexing.
    pub tags: bool,
    #[serde(rename = "logLevel")]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            make: "make".to_string(),
            indexing_threads: 4,
            compilation_database: false,
            tags: false,
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Loads `<project_root>/.pygmalion.conf`. Returns the all-defaults
    /// config if the file does not exist; propagates a parse error if it
    /// exists but is not valid YAML matching this shape.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(crate::CONFIG_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => serde_yaml::from_str(&text).map_err(|source| PygmalionError::ConfigParse {
                path: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Materializes the `make` template into an actual command line,
    /// expanding `$(args)` and `$(projectroot)` (SPEC_FULL §4.8). If
    /// `$(args)` is absent from the template, `extra_args` is appended
    /// instead, per §6's "appended if absent" rule.
    pub fn materialize_make_command(&self, project_root: &Path, extra_args: &[String]) -> String {
        let root = project_root.display().to_string();
        let args_joined = extra_args.join(" ");
        let had_args_placeholder = self.make.contains("$(args)");

        let mut command = self
            .make
            .replace("$(projectroot)", &root)
            .replace("$(args)", &args_joined);

        if !had_args_placeholder && !args_joined.is_empty() {
            command.push(' ');
            command.push_str(&args_joined);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.make, "make");
        assert_eq!(cfg.indexing_threads, 4);
        assert!(!cfg.compilation_database);
        assert!(!cfg.tags);
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".pygmalion.conf"), "indexingThreads: 8\n").unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.indexing_threads, 8);
        assert_eq!(cfg.make, "make");
    }

    #[test]
    fn full_file_overrides_all_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".pygmalion.conf"),
            "make: \"ninja $(args)\"\nindexingThreads: 0\ncompilationDatabase: true\ntags: true\nlogLevel: debug\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.make, "ninja $(args)");
        assert_eq!(cfg.indexing_threads, 0);
        assert!(cfg.compilation_database);
        assert!(cfg.tags);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn malformed_yaml_is_a_config_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".pygmalion.conf"), "indexingThreads: [not, a, number]\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, PygmalionError::ConfigParse { .. }));
    }

    #[test]
    fn unknown_log_level_is_rejected_at_parse_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".pygmalion.conf"), "logLevel: verbose\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, PygmalionError::ConfigParse { .. }));
    }

    #[test]
    fn materialize_expands_projectroot_and_appends_missing_args() {
        let cfg = Config::default();
        let root = Path::new("/proj");
        let cmd = cfg.materialize_make_command(root, &["-j8".to_string()]);
        assert_eq!(cmd, "make -j8");
    }

    #[test]
    fn materialize_substitutes_args_placeholder_in_place() {
        let mut cfg = Config::default();
        cfg.make = "make $(args) -C $(projectroot)".to_string();
        let cmd = cfg.materialize_make_command(Path::new("/proj"), &["-j8".to_string()]);
        assert_eq!(cmd, "make -j8 -C /proj");
    }
}
