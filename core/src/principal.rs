//! Principal identifiers and resource references.
//!
//! All identifiers in the platform are opaque strings. Principals (users and
//! groups) follow the shape `u:<tenant>:<key>` / `g:<tenant>:<key>`; the
//! newtype here only parses out the pieces the core needs for routing, the
//! tenant alias and the user/group discrimination, and otherwise treats the
//! id as opaque.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user or group principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Wrap a raw principal id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the id is not of the form
    /// `u:<tenant>:<key>` or `g:<tenant>:<key>`.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let mut parts = raw.splitn(3, ':');
        let kind = parts.next().unwrap_or_default();
        let tenant = parts.next().unwrap_or_default();
        let key = parts.next().unwrap_or_default();
        if !matches!(kind, "u" | "g") || tenant.is_empty() || key.is_empty() {
            return Err(Error::validation(format!("invalid principal id: {raw}")));
        }
        Ok(Self(raw))
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tenant alias segment of the id.
    #[must_use]
    pub fn tenant_alias(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Whether this principal is a user.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.0.starts_with("u:")
    }

    /// Whether this principal is a group.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.0.starts_with("g:")
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrincipalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A typed reference to any platform resource (content, discussion, meeting,
/// folder, user, group, …).
///
/// The pair is what the routing layers key on; whether the id resolves to an
/// actual entity is the owning module's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// The registered object type, e.g. `"discussion"` or `"user"`.
    pub resource_type: String,
    /// The opaque resource id.
    pub resource_id: String,
}

impl ResourceRef {
    /// Create a resource reference.
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_group_ids() {
        let u = PrincipalId::parse("u:cam:abc123").expect("user id should parse");
        assert!(u.is_user());
        assert!(!u.is_group());
        assert_eq!(u.tenant_alias(), "cam");

        let g = PrincipalId::parse("g:oxford:staff").expect("group id should parse");
        assert!(g.is_group());
        assert_eq!(g.tenant_alias(), "oxford");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "u:", "u:cam", "x:cam:abc", "cam:abc", "u::abc"] {
            assert!(PrincipalId::parse(bad).is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn resource_ref_display() {
        let r = ResourceRef::new("discussion", "d:cam:xyz");
        assert_eq!(r.to_string(), "discussion:d:cam:xyz");
    }
}
