//! The permissions oracle.
//!
//! The core does not enforce authorization policy; it consumes an oracle the
//! hosting application implements against its own membership and roles
//! libraries. The oracle is asked exactly two questions: may a principal view
//! a resource, and which principals hold a role on it.

use crate::error::Result;
use crate::principal::{PrincipalId, ResourceRef};
use futures::future::BoxFuture;

/// Authorization oracle consumed by push subscription checks and the
/// invitation accept pipeline.
///
/// Uses explicit [`BoxFuture`] returns so the oracle can be shared as
/// `Arc<dyn PermissionsOracle>` across connection handlers.
pub trait PermissionsOracle: Send + Sync {
    /// Whether the principal may view the resource.
    ///
    /// Anonymous access passes `None`.
    fn can_view<'a>(
        &'a self,
        principal: Option<&'a PrincipalId>,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<bool>>;
}
