//! Invitation model.

use collegium_core::principal::{PrincipalId, ResourceRef};
use collegium_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// The role an invitation grants, weakest first; repeated invites keep the
/// strongest role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationRole {
    /// Read access.
    Viewer,
    /// Participation.
    Member,
    /// Full control.
    Manager,
}

impl InvitationRole {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Member => "member",
            Self::Manager => "manager",
        }
    }
}

/// A pending role grant for an email address on one resource.
///
/// Primary key `(email, resource id)`; a per-email token indexes every
/// pending invitation of that address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// The invited resource.
    pub resource: ResourceRef,
    /// The invited email address.
    pub email: String,
    /// The granted role.
    pub role: InvitationRole,
    /// Who sent the invitation.
    pub inviter_user_id: PrincipalId,
    /// The accept token shared by all of this email's invitations.
    pub token: String,
    /// Creation timestamp, milliseconds.
    pub created: i64,
}

impl Invitation {
    /// The stable hash identifying this invitation in events.
    #[must_use]
    pub fn hash(&self) -> String {
        format!("{}#{}", self.email, self.resource.resource_id)
    }
}

/// Check an email address shape: local part, `@`, domain with a dot.
///
/// # Errors
///
/// Returns [`Error::Validation`] for anything else.
pub fn validate_email(email: &str) -> Result<()> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || email.contains(' ') {
        return Err(Error::validation(format!("invalid email address: {email}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_order_weakest_first() {
        assert!(InvitationRole::Viewer < InvitationRole::Member);
        assert!(InvitationRole::Member < InvitationRole::Manager);
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("alice@cam.example.org").is_ok());
        for bad in ["", "alice", "@x.org", "alice@", "alice@nodot", "a b@x.org"] {
            assert!(validate_email(bad).is_err(), "should reject {bad:?}");
        }
    }
}
