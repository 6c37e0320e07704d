//! # Collegium Invitations
//!
//! Email-keyed pending role grants, bridging invitations into member
//! updates across any resource type.
//!
//! An invitation parks a role for an email address on a resource until the
//! address resolves to a principal. Accepting a token applies every pending
//! invitation of that email at once: member changes are computed through
//! each resource type's [`MemberUpdateContract`], validated across the
//! board, applied, and only then are the invitations consumed. A failing
//! resource aborts the whole accept with nothing consumed and nothing
//! granted.
//!
//! Listeners observe [`InvitationEvent::Accepted`] to update their member
//! libraries and post the dedicated invitation-accept activity (the generic
//! share activity is suppressed for accepted invitations). Cross-node
//! fan-out rides the `invitation-accept` task queue; the worker re-emits
//! the event locally and is idempotent under at-least-once delivery.

pub mod contract;
pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use contract::{MemberChange, MemberUpdateContract};
pub use events::InvitationEvent;
pub use model::{Invitation, InvitationRole};
pub use service::InvitationService;
pub use store::InvitationStore;

/// Queue carrying accept fan-out tasks.
pub const INVITATION_ACCEPT_QUEUE: &str = "invitation-accept";
