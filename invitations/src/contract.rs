//! The member-update contract each resource type implements.
//!
//! The invitation pipeline is resource-type-agnostic: it computes and
//! applies member changes through this contract and never touches a
//! membership table itself. The two-phase shape is what makes the accept
//! atomic: every resource validates before any resource commits.

use crate::model::InvitationRole;
use collegium_core::Result;
use collegium_core::principal::{PrincipalId, ResourceRef};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// One computed membership change, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChange {
    /// The resource whose membership changes.
    pub resource: ResourceRef,
    /// The principal gaining the role.
    pub principal: PrincipalId,
    /// The granted role.
    pub role: InvitationRole,
    /// The role the principal held before, if any.
    pub previous_role: Option<InvitationRole>,
}

/// Member updates for one resource type.
pub trait MemberUpdateContract: Send + Sync {
    /// Validate the change and compute its effect. Must not mutate
    /// anything: a failure here aborts the whole accept before any resource
    /// commits.
    fn prepare<'a>(
        &'a self,
        resource: &'a ResourceRef,
        principal: &'a PrincipalId,
        role: InvitationRole,
    ) -> BoxFuture<'a, Result<MemberChange>>;

    /// Apply a previously prepared change.
    fn commit<'a>(&'a self, change: &'a MemberChange) -> BoxFuture<'a, Result<()>>;
}
