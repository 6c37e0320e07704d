//! The invitation service: invite and accept.

use crate::contract::{MemberChange, MemberUpdateContract};
use crate::events::InvitationEvent;
use crate::model::{Invitation, InvitationRole, validate_email};
use crate::store::InvitationStore;
use collegium_core::context::Context;
use collegium_core::emitter::Emitter;
use collegium_core::principal::{PrincipalId, ResourceRef};
use collegium_core::queue::{QueuedTask, TaskQueue};
use collegium_core::{Error, Result, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The accept fan-out payload parked on [`crate::INVITATION_ACCEPT_QUEUE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptFanOut {
    /// The accepted email.
    pub email: String,
    /// The accepting principal.
    pub principal: PrincipalId,
    /// Stable hashes of the consumed invitations.
    pub invitation_hashes: Vec<String>,
    /// The applied change per resource id.
    pub member_changes_by_resource: HashMap<String, MemberChange>,
    /// The inviters involved, by principal id.
    pub inviters_by_id: HashMap<String, PrincipalId>,
}

/// Email-keyed pending role grants with a resource-type-agnostic accept
/// pipeline.
pub struct InvitationService {
    store: Arc<dyn InvitationStore>,
    queue: Arc<dyn TaskQueue>,
    emitter: Arc<Emitter<InvitationEvent>>,
    contracts: RwLock<HashMap<String, Arc<dyn MemberUpdateContract>>>,
}

impl InvitationService {
    /// Assemble the service.
    #[must_use]
    pub fn new(store: Arc<dyn InvitationStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            emitter: Arc::new(Emitter::new("invitations")),
            contracts: RwLock::new(HashMap::new()),
        }
    }

    /// The event emitter; listeners register at startup.
    #[must_use]
    pub fn emitter(&self) -> &Arc<Emitter<InvitationEvent>> {
        &self.emitter
    }

    /// Register the member-update contract of a resource type. Startup
    /// wiring only; the last registration wins.
    pub fn register_contract(
        &self,
        resource_type: impl Into<String>,
        contract: Arc<dyn MemberUpdateContract>,
    ) {
        if let Ok(mut contracts) = self.contracts.write() {
            contracts.insert(resource_type.into(), contract);
        }
    }

    /// Invite an email address to a resource.
    ///
    /// Upserts by `(email, resource)`: a repeated invite keeps the
    /// strongest role and the email keeps its existing token, so invites
    /// are idempotent upgrades.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed email,
    /// [`Error::Unauthorized`] for an anonymous context.
    pub async fn invite(
        &self,
        ctx: &Context,
        resource: &ResourceRef,
        email: &str,
        role: InvitationRole,
    ) -> Result<Invitation> {
        let inviter = ctx.require_user()?.clone();
        validate_email(email)?;
        let email = email.to_lowercase();

        let existing = self.store.get(&email, &resource.resource_id).await?;
        let role = existing
            .as_ref()
            .map_or(role, |invitation| invitation.role.max(role));

        let token = match self.store.token_for_email(&email).await? {
            Some(token) => token,
            None => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                self.store.put_token(&token, &email).await?;
                token
            }
        };

        let invitation = Invitation {
            resource: resource.clone(),
            email,
            role,
            inviter_user_id: inviter,
            token,
            created: existing.map_or_else(now_millis, |i| i.created),
        };
        self.store.upsert(&invitation).await?;

        metrics::counter!("invitations.created").increment(1);
        tracing::info!(
            resource = %invitation.resource,
            role = invitation.role.as_str(),
            "invitation stored"
        );

        let errors = self
            .emitter
            .emit(InvitationEvent::Created {
                invitation: invitation.clone(),
            })
            .await;
        for error in errors {
            tracing::warn!(%error, "invitation-created listener failed");
        }
        Ok(invitation)
    }

    /// Accept a token on behalf of a principal.
    ///
    /// Resolves the token's email, prepares a member change for every
    /// pending invitation through its resource type's contract, commits
    /// them all, deletes the consumed invitations together with the token
    /// index, and announces [`InvitationEvent::Accepted`] locally and on the
    /// fan-out queue.
    ///
    /// Any preparation failure aborts the whole accept: nothing is granted
    /// and nothing is consumed.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or already-consumed token,
    /// [`Error::Internal`] when a resource type has no registered contract.
    pub async fn accept(&self, token: &str, principal: &PrincipalId) -> Result<Vec<MemberChange>> {
        let email = self
            .store
            .email_for_token(token)
            .await?
            .ok_or_else(|| Error::not_found("unknown invitation token"))?;
        let invitations = self.store.by_email(&email).await?;
        if invitations.is_empty() {
            return Err(Error::not_found("no pending invitations for token"));
        }

        // Phase one: every change validates before anything commits.
        let mut prepared: Vec<(Arc<dyn MemberUpdateContract>, MemberChange)> = Vec::new();
        for invitation in &invitations {
            let contract = self.contract_for(&invitation.resource.resource_type)?;
            let change = contract
                .prepare(&invitation.resource, principal, invitation.role)
                .await?;
            prepared.push((contract, change));
        }

        // Phase two: commit everything.
        for (contract, change) in &prepared {
            contract.commit(change).await?;
        }

        // Phase three: consume the batch.
        let resource_ids: Vec<String> = invitations
            .iter()
            .map(|i| i.resource.resource_id.clone())
            .collect();
        self.store
            .delete_accepted(&email, &resource_ids, token)
            .await?;

        let changes: Vec<MemberChange> =
            prepared.into_iter().map(|(_, change)| change).collect();
        let member_changes_by_resource: HashMap<String, MemberChange> = changes
            .iter()
            .map(|change| (change.resource.resource_id.clone(), change.clone()))
            .collect();
        let inviters_by_id: HashMap<String, PrincipalId> = invitations
            .iter()
            .map(|i| (i.inviter_user_id.as_str().to_string(), i.inviter_user_id.clone()))
            .collect();
        let fan_out = AcceptFanOut {
            email: email.clone(),
            principal: principal.clone(),
            invitation_hashes: invitations.iter().map(Invitation::hash).collect(),
            member_changes_by_resource,
            inviters_by_id,
        };

        metrics::counter!("invitations.accepted").increment(changes.len() as u64);
        tracing::info!(
            principal = %principal,
            resources = changes.len(),
            "invitations accepted"
        );

        let task = QueuedTask::from_payload("invitation/accepted", &fan_out)?;
        if let Err(error) = self.queue.enqueue(crate::INVITATION_ACCEPT_QUEUE, &task).await {
            tracing::warn!(%error, "accept fan-out enqueue failed");
        }

        let errors = self.emitter.emit(fan_out_event(fan_out)).await;
        for error in errors {
            tracing::warn!(%error, "invitation-accepted listener failed");
        }
        Ok(changes)
    }

    fn contract_for(&self, resource_type: &str) -> Result<Arc<dyn MemberUpdateContract>> {
        self.contracts
            .read()
            .ok()
            .and_then(|contracts| contracts.get(resource_type).cloned())
            .ok_or_else(|| {
                Error::internal(format!(
                    "no member-update contract registered for resource type {resource_type}"
                ))
            })
    }
}

/// Build the local event from a fan-out payload; the accept worker uses the
/// same conversion.
#[must_use]
pub fn fan_out_event(fan_out: AcceptFanOut) -> InvitationEvent {
    InvitationEvent::Accepted {
        email: fan_out.email,
        principal: fan_out.principal,
        invitation_hashes: fan_out.invitation_hashes,
        member_changes_by_resource: fan_out.member_changes_by_resource,
        inviters_by_id: fan_out.inviters_by_id,
    }
}
