//! Platform-wide error taxonomy.
//!
//! Every user-facing operation in the platform resolves to one of the kinds
//! below. The numeric code is what an HTTP surface would serialize; the core
//! itself never speaks HTTP, it only classifies.
//!
//! Two rules hold everywhere:
//!
//! - Upstream 5xx payloads are never relayed verbatim; they collapse to
//!   [`Error::Internal`] so load balancers upstream of the caller do not
//!   misread a dependency failure as a node failure.
//! - Authorization failures use code 401 uniformly, for missing login and for
//!   insufficient role alike.

use thiserror::Error;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the activity and messaging core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Client-correctable input problem: bad id shape, missing body,
    /// timestamp in the future, out-of-range enum.
    #[error("{0}")]
    Validation(String),

    /// Missing login or insufficient role. Used for both unauthenticated and
    /// forbidden cases.
    #[error("{0}")]
    Unauthorized(String),

    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A true uniqueness conflict that escaped internal retry.
    #[error("{0}")]
    Conflict(String),

    /// Datastore failures, transform failures, invalid payloads from
    /// external services.
    #[error("{0}")]
    Internal(String),

    /// Lock unavailable, backpressure. Retried internally; surfaced as
    /// internal once retries are exhausted.
    #[error("{0}")]
    Transient(String),
}

impl Error {
    /// Create a validation error (code 400).
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an authorization error (code 401).
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a not-found error (code 404).
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error (code 409).
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an internal error (code 500).
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Numeric code an HTTP surface would attach to this error.
    ///
    /// Transient errors report 500: by the time one reaches a caller the
    /// internal retries are exhausted.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) | Self::Transient(_) => 500,
        }
    }

    /// Whether retrying the operation may succeed without caller changes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(Error::validation("x").code(), 400);
        assert_eq!(Error::unauthorized("x").code(), 401);
        assert_eq!(Error::not_found("x").code(), 404);
        assert_eq!(Error::conflict("x").code(), 409);
        assert_eq!(Error::internal("x").code(), 500);
        assert_eq!(Error::transient("x").code(), 500);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::transient("lock held").is_retryable());
        assert!(!Error::internal("boom").is_retryable());
        assert!(!Error::conflict("dup").is_retryable());
    }

    #[test]
    fn display_is_the_message() {
        assert_eq!(Error::validation("body is empty").to_string(), "body is empty");
    }
}
