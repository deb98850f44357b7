//! Profiler error types.
//!
//! The profiler's record and query paths never fail: disabled or missing
//! sites yield neutral answers. The only fallible operation is profile
//! import, which parses an externally supplied string.

use thiserror::Error;

/// Errors produced while importing a serialized type profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile string is not valid serialized profile data.
    #[error("malformed profile data: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The profile was produced by an incompatible snapshot version.
    #[error("unsupported profile version: {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}
