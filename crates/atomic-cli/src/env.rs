//! Environment configuration.
//!
//! Absent keys are permitted: appends then produce unsigned atomics, which
//! verification flags as warnings.

use std::path::PathBuf;

pub const SIGNING_KEY_ENV: &str = "SIGNING_KEY_HEX";
pub const PUBLIC_KEY_ENV: &str = "PUBLIC_KEY_HEX";
pub const LEDGER_PATH_ENV: &str = "LEDGER_PATH";

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn signing_key_hex() -> Option<String> {
    non_empty(SIGNING_KEY_ENV)
}

pub fn public_key_hex() -> Option<String> {
    non_empty(PUBLIC_KEY_ENV)
}

pub fn ledger_path() -> Option<PathBuf> {
    non_empty(LEDGER_PATH_ENV).map(PathBuf::from)
}
