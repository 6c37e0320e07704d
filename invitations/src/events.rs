//! Invitation domain events.

use crate::contract::MemberChange;
use crate::model::Invitation;
use collegium_core::principal::PrincipalId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Events announced by the invitation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InvitationEvent {
    /// An invitation was created or upgraded.
    Created {
        /// The stored invitation.
        invitation: Invitation,
    },
    /// A token was accepted and every pending invitation of its email was
    /// consumed.
    ///
    /// Resource-type listeners use this to update their member libraries
    /// and to post the dedicated invitation-accept activity; the generic
    /// share activity is suppressed for these grants.
    Accepted {
        /// The email whose invitations were consumed.
        email: String,
        /// The principal the email resolved to.
        principal: PrincipalId,
        /// Stable hashes of the consumed invitations.
        invitation_hashes: Vec<String>,
        /// The applied change per resource id.
        member_changes_by_resource: HashMap<String, MemberChange>,
        /// The inviters involved, by principal id.
        inviters_by_id: HashMap<String, PrincipalId>,
    },
}
