//! The activity router: from one posted seed to the set of recipient
//! streams it must land in.
//!
//! Routing walks the seed's activity-type registration: each stream spec
//! names the roles and associations that yield candidate recipients, then
//! every role entity's propagation rules gate each candidate. Surviving
//! routes are de-duplicated, bucketized by a hash of the recipient id and
//! parked on the bucket's pending queue; a collection trigger rides the
//! bucket's task queue so a collector picks the work up promptly.

use crate::model::{ActivitySeed, PersistentActivityEntity, RoutedActivity, StreamType};
use crate::registry::{ActivityRegistry, PropagationRule, Role, StreamRouterSpec};
use crate::store::ActivityStore;
use collegium_core::config::ActivityConfig;
use collegium_core::principal::PrincipalId;
use collegium_core::queue::{QueuedTask, TaskQueue};
use collegium_core::tenant::TenantDirectory;
use collegium_core::{Error, Result, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Queue name of a collection bucket.
#[must_use]
pub fn activity_bucket_queue(bucket: u32) -> String {
    format!("activity-bucket-{bucket}")
}

/// Payload of a collection trigger task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectTrigger {
    /// The bucket with fresh pending routes.
    pub bucket: u32,
}

/// Hash partition of a recipient id.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Modulo keeps the value in u32 range
pub fn bucket_for(recipient: &PrincipalId, buckets: u32) -> u32 {
    (fnv1a(recipient.as_str()) % u64::from(buckets.max(1))) as u32
}

/// FNV-1a, the stable cheap hash for partitioning.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

/// One role entity with its resolved propagation state.
struct EntityGate {
    entity: PersistentActivityEntity,
    rules: Vec<PropagationRule>,
    /// Pre-resolved membership sets for `Association`/`Followers` rules.
    association_members: HashMap<String, HashSet<String>>,
}

impl EntityGate {
    /// Whether any of the entity's rules admits the candidate.
    fn admits(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        tenants: &dyn TenantDirectory,
    ) -> bool {
        self.rules.iter().any(|rule| match rule {
            PropagationRule::All => true,
            PropagationRule::SelfOnly => recipient.as_str() == self.entity.id,
            PropagationRule::Tenant => recipient.tenant_alias() == self.entity.tenant_alias,
            PropagationRule::InteractingTenants => {
                tenants.tenants_interact(recipient.tenant_alias(), &self.entity.tenant_alias)
            }
            PropagationRule::Association(name) => self
                .association_members
                .get(name)
                .is_some_and(|members| members.contains(recipient.as_str())),
            PropagationRule::Followers => self
                .association_members
                .get("followers")
                .is_some_and(|members| members.contains(recipient.as_str())),
            PropagationRule::Routes(routes) => routes
                .iter()
                .any(|(id, st)| id == recipient.as_str() && *st == stream_type),
        })
    }
}

/// Resolves posted seeds into per-recipient routes.
pub struct ActivityRouter {
    registry: Arc<ActivityRegistry>,
    store: Arc<dyn ActivityStore>,
    queue: Arc<dyn TaskQueue>,
    tenants: Arc<dyn TenantDirectory>,
    config: ActivityConfig,
}

impl ActivityRouter {
    /// Assemble the router from its backends.
    #[must_use]
    pub fn new(
        registry: Arc<ActivityRegistry>,
        store: Arc<dyn ActivityStore>,
        queue: Arc<dyn TaskQueue>,
        tenants: Arc<dyn TenantDirectory>,
        config: ActivityConfig,
    ) -> Self {
        Self {
            registry,
            store,
            queue,
            tenants,
            config,
        }
    }

    /// Post an activity seed. Returns the number of routes parked.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an unregistered activity/object type or a
    /// future `published`; store and association failures propagate.
    pub async fn post_activity(&self, seed: ActivitySeed) -> Result<usize> {
        if seed.published > now_millis() {
            return Err(Error::validation("activity published in the future"));
        }
        let definition = self
            .registry
            .activity_type(&seed.activity_type)
            .ok_or_else(|| {
                Error::validation(format!("unregistered activity type: {}", seed.activity_type))
            })?;

        let actor = self.produce(&seed.actor).await?;
        let object = match &seed.object {
            Some(resource) => Some(self.produce(resource).await?),
            None => None,
        };
        let target = match &seed.target {
            Some(resource) => Some(self.produce(resource).await?),
            None => None,
        };

        // One gate per referenced role entity; every gate must admit a
        // candidate for the route to survive.
        let mut gates = vec![self.gate(&actor).await?];
        if let Some(entity) = &object {
            gates.push(self.gate(entity).await?);
        }
        if let Some(entity) = &target {
            gates.push(self.gate(entity).await?);
        }

        // Candidate expansion, de-duplicated on (recipient, stream).
        let mut routes: HashMap<(PrincipalId, StreamType), bool> = HashMap::new();
        for (stream_type, spec) in &definition.streams {
            let candidates = self
                .expand_stream(spec, &actor, object.as_ref(), target.as_ref())
                .await?;
            for recipient in candidates {
                // Notification and email streams exist only for users.
                if matches!(stream_type, StreamType::Notification | StreamType::Email)
                    && !recipient.is_user()
                {
                    continue;
                }
                if !gates
                    .iter()
                    .all(|gate| gate.admits(&recipient, *stream_type, self.tenants.as_ref()))
                {
                    continue;
                }
                routes.insert((recipient, *stream_type), spec.transient);
            }
        }

        let mut touched_buckets = HashSet::new();
        let route_count = routes.len();
        for ((recipient_id, stream_type), transient) in routes {
            let bucket = bucket_for(&recipient_id, self.config.number_of_processing_buckets);
            let route = RoutedActivity {
                recipient_id,
                stream_type,
                transient,
                seed: seed.clone(),
                actor: actor.clone(),
                object: object.clone(),
                target: target.clone(),
            };
            self.store.append_pending(bucket, &route).await?;
            touched_buckets.insert(bucket);
        }

        for bucket in touched_buckets {
            let task = QueuedTask::from_payload("activity/collect", &CollectTrigger { bucket })?;
            if let Err(error) = self
                .queue
                .enqueue(&activity_bucket_queue(bucket), &task)
                .await
            {
                // The poller will still drain the bucket on its next tick.
                tracing::warn!(%error, bucket, "collection trigger enqueue failed");
            }
        }

        metrics::counter!("activity.routed").increment(route_count as u64);
        tracing::debug!(
            activity_type = %seed.activity_type,
            routes = route_count,
            "activity routed"
        );
        Ok(route_count)
    }

    /// Materialize one seed resource through its registered producer.
    async fn produce(
        &self,
        resource: &crate::model::ActivitySeedResource,
    ) -> Result<PersistentActivityEntity> {
        let entity_type = self
            .registry
            .entity_type(&resource.resource_type)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unregistered object type: {}",
                    resource.resource_type
                ))
            })?;
        entity_type.produce(resource.clone()).await
    }

    /// Build the propagation gate of one role entity, pre-resolving the
    /// association memberships its rules name.
    async fn gate(&self, entity: &PersistentActivityEntity) -> Result<EntityGate> {
        let entity_type = self
            .registry
            .entity_type(&entity.object_type)
            .ok_or_else(|| {
                Error::internal(format!(
                    "produced entity has unregistered object type: {}",
                    entity.object_type
                ))
            })?;
        let rules = entity_type.propagation(entity.clone()).await?;

        let mut association_members: HashMap<String, HashSet<String>> = HashMap::new();
        for rule in &rules {
            let name = match rule {
                PropagationRule::Association(name) => name.as_str(),
                PropagationRule::Followers => "followers",
                _ => continue,
            };
            if association_members.contains_key(name) {
                continue;
            }
            let members = match entity_type.association(name) {
                Some(association) => association(entity.clone())
                    .await?
                    .into_iter()
                    .map(|p| p.as_str().to_string())
                    .collect(),
                None => HashSet::new(),
            };
            association_members.insert(name.to_string(), members);
        }

        Ok(EntityGate {
            entity: entity.clone(),
            rules,
            association_members,
        })
    }

    /// Expand one stream spec into candidate recipients.
    async fn expand_stream(
        &self,
        spec: &StreamRouterSpec,
        actor: &PersistentActivityEntity,
        object: Option<&PersistentActivityEntity>,
        target: Option<&PersistentActivityEntity>,
    ) -> Result<Vec<PrincipalId>> {
        let mut recipients = Vec::new();
        for role in &spec.roles {
            let entity = match role {
                Role::Actor => Some(actor),
                Role::Object => object,
                Role::Target => target,
            };
            let Some(entity) = entity else { continue };
            let Some(entity_type) = self.registry.entity_type(&entity.object_type) else {
                continue;
            };
            for name in &spec.associations {
                match entity_type.association(name) {
                    Some(association) => {
                        recipients.extend(association(entity.clone()).await?);
                    }
                    None => {
                        tracing::debug!(
                            object_type = %entity.object_type,
                            association = %name,
                            "association not registered for role entity"
                        );
                    }
                }
            }
        }
        Ok(recipients)
    }
}
