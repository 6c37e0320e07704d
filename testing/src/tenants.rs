//! In-memory tenant directory.

use collegium_core::tenant::{Tenant, TenantDirectory, TenantPrivacy};
use std::collections::HashMap;
use std::sync::RwLock;

/// Fixed tenant table for tests.
#[derive(Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl InMemoryTenantDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a public tenant served under `<alias>.example.org`.
    #[must_use]
    pub fn with_tenant(self, alias: &str) -> Self {
        self.with_tenant_full(alias, &format!("{alias}.example.org"), TenantPrivacy::Public)
    }

    /// Add a tenant with an explicit host and privacy.
    #[must_use]
    pub fn with_tenant_full(self, alias: &str, host: &str, privacy: TenantPrivacy) -> Self {
        self.insert(Tenant {
            alias: alias.to_string(),
            display_name: alias.to_string(),
            host: host.to_string(),
            privacy,
        });
        self
    }

    /// Insert or replace a tenant.
    pub fn insert(&self, tenant: Tenant) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.insert(tenant.alias.clone(), tenant);
        }
    }
}

impl TenantDirectory for InMemoryTenantDirectory {
    fn tenant(&self, alias: &str) -> Option<Tenant> {
        self.tenants.read().ok()?.get(alias).cloned()
    }

    fn is_local_host(&self, host: &str) -> bool {
        self.tenants
            .read()
            .map(|tenants| tenants.values().any(|t| t.host == host))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_resolve_to_locality() {
        let dir = InMemoryTenantDirectory::new()
            .with_tenant("cam")
            .with_tenant_full("vault", "vault.internal", TenantPrivacy::Private);

        assert!(dir.is_local_host("cam.example.org"));
        assert!(dir.is_local_host("vault.internal"));
        assert!(!dir.is_local_host("elsewhere.com"));
        assert!(dir.tenant("cam").is_some());
        assert!(dir.tenant("nope").is_none());
    }

    #[test]
    fn privacy_flows_through_interaction_check() {
        let dir = InMemoryTenantDirectory::new()
            .with_tenant("cam")
            .with_tenant("oxford")
            .with_tenant_full("vault", "vault.internal", TenantPrivacy::Private);

        assert!(dir.tenants_interact("cam", "oxford"));
        assert!(!dir.tenants_interact("cam", "vault"));
    }
}
