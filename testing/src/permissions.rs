//! Static permissions oracle.

use collegium_core::Result;
use collegium_core::access::PermissionsOracle;
use collegium_core::principal::{PrincipalId, ResourceRef};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::RwLock;

/// Permissions oracle with a fixed answer, plus optional per-pair grants.
///
/// `allow_all(true)` grants everything; `allow_all(false)` denies everything
/// except pairs added with [`StaticPermissionsOracle::grant`].
pub struct StaticPermissionsOracle {
    default_allow: bool,
    grants: RwLock<HashSet<(String, String)>>,
}

impl StaticPermissionsOracle {
    /// Oracle answering `allow` for every question.
    #[must_use]
    pub fn allow_all(allow: bool) -> Self {
        Self {
            default_allow: allow,
            grants: RwLock::new(HashSet::new()),
        }
    }

    /// Grant a specific principal view access to a specific resource.
    pub fn grant(&self, principal: &PrincipalId, resource: &ResourceRef) {
        if let Ok(mut grants) = self.grants.write() {
            grants.insert((principal.as_str().to_string(), resource.resource_id.clone()));
        }
    }
}

impl PermissionsOracle for StaticPermissionsOracle {
    fn can_view<'a>(
        &'a self,
        principal: Option<&'a PrincipalId>,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if self.default_allow {
                return Ok(true);
            }
            let Some(principal) = principal else {
                return Ok(false);
            };
            let granted = self
                .grants
                .read()
                .map(|grants| {
                    grants.contains(&(
                        principal.as_str().to_string(),
                        resource.resource_id.clone(),
                    ))
                })
                .unwrap_or(false);
            Ok(granted)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    #[tokio::test]
    async fn deny_all_honors_explicit_grants() {
        let oracle = StaticPermissionsOracle::allow_all(false);
        let alice = PrincipalId::parse("u:cam:alice").expect("valid");
        let doc = ResourceRef::new("discussion", "d:cam:doc1");

        assert!(!oracle.can_view(Some(&alice), &doc).await.expect("oracle"));
        oracle.grant(&alice, &doc);
        assert!(oracle.can_view(Some(&alice), &doc).await.expect("oracle"));
        assert!(!oracle.can_view(None, &doc).await.expect("oracle"));
    }
}
