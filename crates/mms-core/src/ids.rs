//! Identifier validation and generation.
//!
//! Org, repo, branch and lock ids become path segments of minted IRIs, so they
//! are restricted to a conservative character set.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::defaults::ID_MAX_LEN;
use crate::error::{Error, Result};

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid id regex"));

/// Validate a user-chosen resource id.
///
/// Ids must:
/// - Not be empty
/// - Not exceed [`ID_MAX_LEN`] characters
/// - Start with an ASCII letter or digit
/// - Contain only ASCII alphanumerics, `_`, `.` and `-`
///
/// # Examples
///
/// ```
/// use mms_core::ids::validate_id;
///
/// assert!(validate_id("org", "acme").is_ok());
/// assert!(validate_id("branch", "feature-1.2").is_ok());
/// assert!(validate_id("repo", "").is_err());
/// assert!(validate_id("repo", "../x").is_err());
/// ```
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidInput(format!("{} id cannot be empty", kind)));
    }

    if id.len() > ID_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "{} id exceeds {} character limit: {} characters",
            kind,
            ID_MAX_LEN,
            id.len()
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(Error::InvalidInput(format!(
            "{} id '{}' contains invalid characters. Only alphanumerics, '_', '.' and '-' allowed",
            kind, id
        )));
    }

    Ok(())
}

/// Mint a new request-unique transaction id (UUIDv7, time-ordered).
pub fn new_transaction_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mint an id for server-named resources (commits, snapshots, graphs).
pub fn new_resource_id() -> String {
    Uuid::new_v4().simple().to_string()
}
