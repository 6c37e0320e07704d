//! Invitation storage abstraction.
//!
//! Rows keyed by `(email, resource id)` plus a secondary `token → email`
//! index. An accepted batch is deleted together with its token index.

use crate::model::Invitation;
use collegium_core::Result;
use futures::future::BoxFuture;

/// Storage operations for invitations.
pub trait InvitationStore: Send + Sync {
    /// Insert or replace an invitation by `(email, resource id)`.
    fn upsert(&self, invitation: &Invitation) -> BoxFuture<'_, Result<()>>;

    /// Fetch one invitation.
    fn get(&self, email: &str, resource_id: &str)
    -> BoxFuture<'_, Result<Option<Invitation>>>;

    /// Every pending invitation of an email.
    fn by_email(&self, email: &str) -> BoxFuture<'_, Result<Vec<Invitation>>>;

    /// Register the token of an email.
    fn put_token(&self, token: &str, email: &str) -> BoxFuture<'_, Result<()>>;

    /// Resolve a token to its email.
    fn email_for_token(&self, token: &str) -> BoxFuture<'_, Result<Option<String>>>;

    /// The existing token of an email, if one was issued.
    fn token_for_email(&self, email: &str) -> BoxFuture<'_, Result<Option<String>>>;

    /// Delete a consumed batch: the listed invitations and the email's
    /// token index, as one operation.
    fn delete_accepted(
        &self,
        email: &str,
        resource_ids: &[String],
        token: &str,
    ) -> BoxFuture<'_, Result<()>>;
}
