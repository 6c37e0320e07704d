//! In-memory invitation store and contracts for tests.

use crate::contract::{MemberChange, MemberUpdateContract};
use crate::model::{Invitation, InvitationRole};
use crate::store::InvitationStore;
use collegium_core::principal::{PrincipalId, ResourceRef};
use collegium_core::{Error, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// [`InvitationStore`] backed by maps.
#[derive(Default)]
pub struct InMemoryInvitationStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// `(email, resource id)` → invitation.
    invitations: HashMap<(String, String), Invitation>,
    /// token → email.
    tokens: HashMap<String, String>,
}

impl InMemoryInvitationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored invitations.
    pub async fn invitation_count(&self) -> usize {
        self.state.lock().await.invitations.len()
    }
}

impl InvitationStore for InMemoryInvitationStore {
    fn upsert(&self, invitation: &Invitation) -> BoxFuture<'_, Result<()>> {
        let invitation = invitation.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.invitations.insert(
                (invitation.email.clone(), invitation.resource.resource_id.clone()),
                invitation,
            );
            Ok(())
        })
    }

    fn get(&self, email: &str, resource_id: &str) -> BoxFuture<'_, Result<Option<Invitation>>> {
        let key = (email.to_string(), resource_id.to_string());
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.invitations.get(&key).cloned())
        })
    }

    fn by_email(&self, email: &str) -> BoxFuture<'_, Result<Vec<Invitation>>> {
        let email = email.to_string();
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut invitations: Vec<Invitation> = state
                .invitations
                .values()
                .filter(|i| i.email == email)
                .cloned()
                .collect();
            invitations.sort_by(|a, b| a.resource.resource_id.cmp(&b.resource.resource_id));
            Ok(invitations)
        })
    }

    fn put_token(&self, token: &str, email: &str) -> BoxFuture<'_, Result<()>> {
        let token = token.to_string();
        let email = email.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.tokens.insert(token, email);
            Ok(())
        })
    }

    fn email_for_token(&self, token: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let token = token.to_string();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.tokens.get(&token).cloned())
        })
    }

    fn token_for_email(&self, email: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let email = email.to_string();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .tokens
                .iter()
                .find(|(_, e)| **e == email)
                .map(|(token, _)| token.clone()))
        })
    }

    fn delete_accepted(
        &self,
        email: &str,
        resource_ids: &[String],
        token: &str,
    ) -> BoxFuture<'_, Result<()>> {
        let email = email.to_string();
        let resource_ids = resource_ids.to_vec();
        let token = token.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            for resource_id in &resource_ids {
                state.invitations.remove(&(email.clone(), resource_id.clone()));
            }
            state.tokens.remove(&token);
            Ok(())
        })
    }
}

/// A contract that records commits in a shared member table.
#[derive(Default)]
pub struct RecordingContract {
    /// `(resource id, principal)` → role.
    pub members: Mutex<HashMap<(String, String), InvitationRole>>,
}

impl RecordingContract {
    /// Create an empty contract.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The role granted on a resource, if any.
    pub async fn role_of(&self, resource_id: &str, principal: &PrincipalId) -> Option<InvitationRole> {
        self.members
            .lock()
            .await
            .get(&(resource_id.to_string(), principal.as_str().to_string()))
            .copied()
    }
}

impl MemberUpdateContract for RecordingContract {
    fn prepare<'a>(
        &'a self,
        resource: &'a ResourceRef,
        principal: &'a PrincipalId,
        role: InvitationRole,
    ) -> BoxFuture<'a, Result<MemberChange>> {
        Box::pin(async move {
            let previous_role = self.role_of(&resource.resource_id, principal).await;
            Ok(MemberChange {
                resource: resource.clone(),
                principal: principal.clone(),
                role,
                previous_role,
            })
        })
    }

    fn commit<'a>(&'a self, change: &'a MemberChange) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.members.lock().await.insert(
                (
                    change.resource.resource_id.clone(),
                    change.principal.as_str().to_string(),
                ),
                change.role,
            );
            Ok(())
        })
    }
}

/// A contract whose preparation always fails; partial-failure tests use it.
pub struct FailingContract;

impl MemberUpdateContract for FailingContract {
    fn prepare<'a>(
        &'a self,
        resource: &'a ResourceRef,
        _principal: &'a PrincipalId,
        _role: InvitationRole,
    ) -> BoxFuture<'a, Result<MemberChange>> {
        let resource = resource.clone();
        Box::pin(async move {
            Err(Error::conflict(format!(
                "membership of {resource} is frozen"
            )))
        })
    }

    fn commit<'a>(&'a self, _change: &'a MemberChange) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}
