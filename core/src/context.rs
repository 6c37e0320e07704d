//! Per-request execution context.
//!
//! Every operation entering the core carries a [`Context`]: the tenant the
//! request arrived on and the authenticated principal, if any. Background
//! work (collectors, queue workers) runs under an administrative context for
//! the tenant it is processing.

use crate::error::{Error, Result};
use crate::principal::PrincipalId;
use serde::{Deserialize, Serialize};

/// The execution context of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Alias of the tenant the request arrived on.
    pub tenant_alias: String,
    /// The authenticated principal; `None` for anonymous requests.
    pub principal: Option<PrincipalId>,
}

impl Context {
    /// Context for an authenticated principal.
    pub fn authenticated(tenant_alias: impl Into<String>, principal: PrincipalId) -> Self {
        Self {
            tenant_alias: tenant_alias.into(),
            principal: Some(principal),
        }
    }

    /// Context for an anonymous request.
    pub fn anonymous(tenant_alias: impl Into<String>) -> Self {
        Self {
            tenant_alias: tenant_alias.into(),
            principal: None,
        }
    }

    /// Whether a principal is logged in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// The authenticated user principal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the context is anonymous or the
    /// principal is a group.
    pub fn require_user(&self) -> Result<&PrincipalId> {
        match &self.principal {
            Some(p) if p.is_user() => Ok(p),
            Some(_) => Err(Error::unauthorized("a user principal is required")),
            None => Err(Error::unauthorized("authentication required")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    #[test]
    fn require_user_accepts_users_only() {
        let user = PrincipalId::parse("u:cam:alice").expect("valid principal");
        let group = PrincipalId::parse("g:cam:staff").expect("valid principal");

        assert!(Context::authenticated("cam", user).require_user().is_ok());
        assert!(Context::authenticated("cam", group).require_user().is_err());
        assert!(Context::anonymous("cam").require_user().is_err());
    }
}
