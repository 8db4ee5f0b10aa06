//! Typed environment-variable lookups with defaults.
//!
//! Tunables are read once at first use by the process-wide lazies that
//! consume them. A value that fails to parse is logged and replaced by the
//! default rather than aborting the process.

use std::str::FromStr;

fn parse_or_default<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, %default, "unparseable env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read an unsigned integer from the environment.
pub fn u64_var(name: &str, default: u64) -> u64 {
    parse_or_default(name, default)
}

/// Read a `usize` from the environment.
pub fn usize_var(name: &str, default: usize) -> usize {
    parse_or_default(name, default)
}

/// Read a boolean from the environment. Accepts `1`/`0`, `true`/`false`,
/// `yes`/`no` (case-insensitive).
pub fn bool_var(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                tracing::warn!(var = name, value = %raw, default, "unparseable boolean env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}
