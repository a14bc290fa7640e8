//! Environment variable loading.

use std::env;
use std::str::FromStr;

/// Read a non-empty environment variable.
pub(super) fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable.
///
/// Unset or empty is `Ok(None)`; a value that fails to parse is an error
/// naming the variable.
pub(super) fn parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: '{raw}' ({e})")),
        None => Ok(None),
    }
}
