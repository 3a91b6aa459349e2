//! Core fact store, request scheduler, and query surface for the Pygmalion
//! code-intelligence daemon.
//!
//! This crate is shared by all five executables in the suite (`pygd`,
//! `pygmalion`, `pygscan`, `pygmake`, `pygclangindex`); it owns the on-disk
//! schema, the wire formats, and the concurrency model that every other
//! piece of the system has to agree with.

pub mod config;
pub mod error;
pub mod export;
pub mod fact;
pub mod hash;
pub mod logging;
pub mod paths;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod worker;

pub use error::{PygmalionError, Result};

/// Schema version this build requires. A store file whose `Metadata` row
/// records a different version is rejected at open time (§7, fatal startup).
pub const SCHEMA_VERSION: (i64, i64) = (0, 8);

/// Default store file name, relative to the project root.
pub const STORE_FILE_NAME: &str = ".pygmalion.sqlite";

/// Default daemon socket name, relative to the project root.
pub const SOCKET_FILE_NAME: &str = ".pygmalion.sock";

/// Default config file name, relative to the project root.
pub const CONFIG_FILE_NAME: &str = ".pygmalion.conf";
