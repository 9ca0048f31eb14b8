//! Thin wrapper around an optional `.ini` file used to override protocol
//! timeouts and the log level without touching CLI arguments. Missing file,
//! missing section, or a value that fails to parse are all treated as "no
//! override" rather than a hard error — CLI flags and built-in defaults
//! always work even if `pbft.ini` was never written.

use std::fmt::Debug;
use std::str::FromStr;
use tini::Ini;

/// Loads `path` if present, returning `None` otherwise. Used as the starting
/// point for `section2var`; callers that want a hard failure on a missing
/// file should call `Ini::from_file` directly.
pub fn load(path: &str) -> Option<Ini> {
    Ini::from_file(path).ok()
}

/// Reads `[sec] key` from an already-loaded ini file and parses it as `T`.
/// Returns `None` on a missing key or a value that fails to parse.
pub fn section2var<T>(ini: &Ini, sec: &str, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Debug,
{
    let raw: String = ini.get(sec, key)?;
    raw.parse().ok()
}
