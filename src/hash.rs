//! Stable 64-bit content hashing for textual keys (§4.1).
//!
//! Every string that enters the store — file paths, USRs, command lines,
//! individual arguments, definition kinds — is keyed by this hash rather
//! than by the text itself, so that the dictionary tables (`Paths`,
//! `BuildCommands`, `BuildArgs`, `Kinds`) and the fact tables can join on a
//! fixed-width integer instead of repeated string comparison.
//!
//! The hash is deterministic across runs and processes (fixed seed), which
//! is required: the CLI client, `pygscan`, and `pygclangindex` all hash the
//! same strings independently and must agree with the daemon on the
//! resulting key without any shared in-memory state.

use twox_hash::XxHash64;
use std::hash::Hasher;

/// Fixed seed so that `hash` is stable across process restarts and across
/// the different executables in the suite. Not a cryptographic secret —
/// any fixed value works, this one has no special meaning.
const SEED: u64 = 0x5079_676d_616c_696f; // "Pygmalio" in ASCII, truncated to 64 bits

/// Hash arbitrary bytes to a 64-bit value, then reinterpret as signed.
///
/// Truncation to `i64` is permitted because the store treats the value as
/// opaque (§4.1) — never as a quantity, only as a join key. Collisions are
/// tolerated at the theoretical level; implementers needing user-visible
/// identity must use the original text column, not this hash.
pub fn hash(bytes: &[u8]) -> i64 {
    let mut hasher = XxHash64::with_seed(SEED);
    hasher.write(bytes);
    hasher.finish() as i64
}

/// Convenience wrapper for the common case of hashing a `&str`.
pub fn hash_str(s: &str) -> i64 {
    hash(s.as_bytes())
}
