//! Tenants and the tenant directory oracle.
//!
//! The platform is multi-tenant: every principal and resource belongs to
//! exactly one tenant, identified by a stable alias and reachable under one
//! or more hosts. The core never owns tenant CRUD; it consumes a read-mostly
//! [`TenantDirectory`] that the hosting application keeps warm.

use serde::{Deserialize, Serialize};

/// Visibility stance of a tenant towards the rest of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantPrivacy {
    /// Content may propagate to interacting tenants.
    Public,
    /// Content never leaves the tenant.
    Private,
}

/// A tenant of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable alias, e.g. `"cam"`. Appears inside principal ids.
    pub alias: String,
    /// Human-readable name.
    pub display_name: String,
    /// Canonical host the tenant is served under, e.g. `"cam.collegium.org"`.
    pub host: String,
    /// Privacy stance.
    pub privacy: TenantPrivacy,
}

impl Tenant {
    /// Whether cross-tenant delivery out of this tenant is permitted at all.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self.privacy, TenantPrivacy::Private)
    }
}

/// Read-mostly directory of tenants.
///
/// Lookups are synchronous: implementations are expected to be in-memory
/// caches refreshed out-of-band, the way the hosting application already
/// maintains its tenant table. The URL rewriter and the propagation filter
/// both sit on hot paths and must not suspend per lookup.
pub trait TenantDirectory: Send + Sync {
    /// Resolve a tenant by alias.
    fn tenant(&self, alias: &str) -> Option<Tenant>;

    /// Whether `host` is a host of any known local tenant.
    ///
    /// Drives URL rewriting: absolute links to local hosts become
    /// root-relative, unknown hosts are left intact.
    fn is_local_host(&self, host: &str) -> bool;

    /// Whether content may flow between the two tenants.
    ///
    /// Same-alias always interacts. Distinct tenants interact only when
    /// neither side is private.
    fn tenants_interact(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (self.tenant(a), self.tenant(b)) {
            (Some(ta), Some(tb)) => !ta.is_private() && !tb.is_private(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedDirectory(HashMap<String, Tenant>);

    impl TenantDirectory for FixedDirectory {
        fn tenant(&self, alias: &str) -> Option<Tenant> {
            self.0.get(alias).cloned()
        }

        fn is_local_host(&self, host: &str) -> bool {
            self.0.values().any(|t| t.host == host)
        }
    }

    fn tenant(alias: &str, privacy: TenantPrivacy) -> Tenant {
        Tenant {
            alias: alias.to_string(),
            display_name: alias.to_uppercase(),
            host: format!("{alias}.example.org"),
            privacy,
        }
    }

    fn directory() -> FixedDirectory {
        let mut map = HashMap::new();
        map.insert("cam".to_string(), tenant("cam", TenantPrivacy::Public));
        map.insert("oxford".to_string(), tenant("oxford", TenantPrivacy::Public));
        map.insert("vault".to_string(), tenant("vault", TenantPrivacy::Private));
        FixedDirectory(map)
    }

    #[test]
    fn same_tenant_always_interacts() {
        let dir = directory();
        assert!(dir.tenants_interact("vault", "vault"));
    }

    #[test]
    fn private_tenant_blocks_interaction() {
        let dir = directory();
        assert!(dir.tenants_interact("cam", "oxford"));
        assert!(!dir.tenants_interact("cam", "vault"));
        assert!(!dir.tenants_interact("vault", "oxford"));
    }

    #[test]
    fn unknown_tenant_never_interacts() {
        let dir = directory();
        assert!(!dir.tenants_interact("cam", "ghost"));
    }
}
