//! Typed environment variable lookups
//!
//! Unset variables fall back to a default. A variable that is set but cannot be
//! parsed is an error rather than a silent fallback.

use crate::error::{CommonError, Result};
use std::env::VarError;
use std::str::FromStr;

/// Read a variable, returning `None` when it is unset or empty
pub fn var(key: &str) -> Result<Option<String>> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(CommonError::NotUnicode(key.to_string())),
    }
}

/// Read a string variable with a default
pub fn string_or(key: &str, default: &str) -> Result<String> {
    Ok(var(key)?.unwrap_or_else(|| default.to_string()))
}

/// Parse a variable with a default
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key)? {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CommonError::invalid_value(key, raw.as_str(), e)),
        None => Ok(default),
    }
}
