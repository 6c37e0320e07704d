//! The activity entity registry: pluggable polymorphism over domain entity
//! kinds.
//!
//! Each registered `object_type` carries a vtable of functions (a producer,
//! two transformers, a propagation function and named associations) that the
//! router and aggregator dispatch through at post time. Each registered
//! activity type carries its grouping tuples and per-stream router specs.
//!
//! The registry is per-process and written once at startup. Registration is
//! idempotent; the last registration of a name wins.

use crate::model::{
    ActivitySeedResource, Format, PersistentActivityEntity, StreamType, Visibility,
};
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Materializes a persistent entity from a seed resource, using the
/// pre-fetched `resource_data` when present or looking the entity up by id.
pub type ProducerFn = Arc<
    dyn Fn(ActivitySeedResource) -> BoxFuture<'static, Result<PersistentActivityEntity>>
        + Send
        + Sync,
>;

/// Projects persistent entities into one serialization format.
pub type TransformerFn = Arc<
    dyn Fn(Vec<PersistentActivityEntity>) -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync,
>;

/// Yields the propagation rules constraining who may receive an activity
/// referencing the entity.
pub type PropagationFn = Arc<
    dyn Fn(PersistentActivityEntity) -> BoxFuture<'static, Result<Vec<PropagationRule>>>
        + Send
        + Sync,
>;

/// Maps an entity to a set of related principal ids (its members, its
/// managers, its message contributors, …).
pub type AssociationFn = Arc<
    dyn Fn(PersistentActivityEntity) -> BoxFuture<'static, Result<Vec<PrincipalId>>> + Send + Sync,
>;

/// A rule constraining delivery of an activity that references an entity.
#[derive(Clone)]
pub enum PropagationRule {
    /// Anyone may receive it.
    All,
    /// Only principals in the named association.
    Association(String),
    /// Only the explicitly listed `(resource id, stream)` routes.
    Routes(Vec<(String, StreamType)>),
    /// Only the entity itself.
    SelfOnly,
    /// Only followers of the entity (the `followers` association).
    Followers,
    /// Only principals of the entity's own tenant.
    Tenant,
    /// Only principals of tenants the entity's tenant interacts with.
    InteractingTenants,
}

impl std::fmt::Debug for PropagationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Association(name) => write!(f, "association:{name}"),
            Self::Routes(routes) => write!(f, "routes:{}", routes.len()),
            Self::SelfOnly => f.write_str("self"),
            Self::Followers => f.write_str("followers"),
            Self::Tenant => f.write_str("tenant"),
            Self::InteractingTenants => f.write_str("interacting-tenants"),
        }
    }
}

/// The vtable registered for one `object_type`.
#[derive(Clone)]
pub struct EntityType {
    producer: ProducerFn,
    activitystreams_transformer: TransformerFn,
    internal_transformer: TransformerFn,
    propagation: PropagationFn,
    associations: HashMap<String, AssociationFn>,
}

impl EntityType {
    /// Start building a vtable around a producer.
    #[must_use]
    pub fn builder(producer: ProducerFn) -> EntityTypeBuilder {
        EntityTypeBuilder {
            producer,
            activitystreams_transformer: None,
            internal_transformer: None,
            propagation: None,
            associations: HashMap::new(),
        }
    }

    /// Materialize the entity behind a seed resource.
    pub fn produce(
        &self,
        resource: ActivitySeedResource,
    ) -> BoxFuture<'static, Result<PersistentActivityEntity>> {
        (self.producer)(resource)
    }

    /// Project entities into the requested format.
    pub fn transform(
        &self,
        format: Format,
        entities: Vec<PersistentActivityEntity>,
    ) -> BoxFuture<'static, Result<Vec<Value>>> {
        match format {
            Format::ActivityStreams => (self.activitystreams_transformer)(entities),
            Format::Internal => (self.internal_transformer)(entities),
        }
    }

    /// Resolve the entity's propagation rules.
    pub fn propagation(
        &self,
        entity: PersistentActivityEntity,
    ) -> BoxFuture<'static, Result<Vec<PropagationRule>>> {
        (self.propagation)(entity)
    }

    /// Look up a named association.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<&AssociationFn> {
        self.associations.get(name)
    }
}

/// Builder for an [`EntityType`] vtable.
pub struct EntityTypeBuilder {
    producer: ProducerFn,
    activitystreams_transformer: Option<TransformerFn>,
    internal_transformer: Option<TransformerFn>,
    propagation: Option<PropagationFn>,
    associations: HashMap<String, AssociationFn>,
}

impl EntityTypeBuilder {
    /// Set the wire-format transformer.
    #[must_use]
    pub fn activitystreams_transformer(mut self, transformer: TransformerFn) -> Self {
        self.activitystreams_transformer = Some(transformer);
        self
    }

    /// Set the internal-format transformer.
    #[must_use]
    pub fn internal_transformer(mut self, transformer: TransformerFn) -> Self {
        self.internal_transformer = Some(transformer);
        self
    }

    /// Set the propagation function.
    #[must_use]
    pub fn propagation(mut self, propagation: PropagationFn) -> Self {
        self.propagation = Some(propagation);
        self
    }

    /// Register a named association.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>, f: AssociationFn) -> Self {
        self.associations.insert(name.into(), f);
        self
    }

    /// Finish the vtable.
    ///
    /// Unset transformers fall back to [`transformers::activitystreams_default`]
    /// / [`transformers::internal_default`]; unset propagation falls back to
    /// visibility-driven rules ([`propagation::by_visibility`]).
    #[must_use]
    pub fn build(self) -> EntityType {
        EntityType {
            producer: self.producer,
            activitystreams_transformer: self
                .activitystreams_transformer
                .unwrap_or_else(transformers::activitystreams_default),
            internal_transformer: self
                .internal_transformer
                .unwrap_or_else(transformers::internal_default),
            propagation: self.propagation.unwrap_or_else(propagation::by_visibility),
            associations: self.associations,
        }
    }
}

/// Which roles participate in a grouping tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupBySpec {
    /// Group on the actor entity.
    pub actor: bool,
    /// Group on the object entity.
    pub object: bool,
    /// Group on the target entity.
    pub target: bool,
}

impl GroupBySpec {
    /// Tuple keyed on every role: no two distinct activities collapse.
    pub const ALL_ROLES: Self = Self {
        actor: true,
        object: true,
        target: true,
    };
}

/// The roles of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The acting entity.
    Actor,
    /// The acted-on entity.
    Object,
    /// The context entity.
    Target,
}

/// How one stream of an activity type routes.
#[derive(Clone)]
pub struct StreamRouterSpec {
    /// Which roles contribute association lookups.
    pub roles: Vec<Role>,
    /// Which associations of those roles yield recipients.
    pub associations: Vec<String>,
    /// Transient streams are pushed live and never persisted.
    pub transient: bool,
}

impl StreamRouterSpec {
    /// Route via the given roles and associations, persisted.
    #[must_use]
    pub fn new(roles: Vec<Role>, associations: Vec<&str>) -> Self {
        Self {
            roles,
            associations: associations.into_iter().map(String::from).collect(),
            transient: false,
        }
    }

    /// Mark the stream transient.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Registration of one activity type.
#[derive(Clone)]
pub struct ActivityTypeDefinition {
    /// The activity type name.
    pub activity_type: String,
    /// Grouping tuples; each yields an independent aggregate.
    pub group_by: Vec<GroupBySpec>,
    /// Per-stream routing.
    pub streams: HashMap<StreamType, StreamRouterSpec>,
}

impl ActivityTypeDefinition {
    /// Definition with no grouping (every activity stands alone) and no
    /// streams.
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            group_by: Vec::new(),
            streams: HashMap::new(),
        }
    }

    /// Add a grouping tuple.
    #[must_use]
    pub fn group_by(mut self, spec: GroupBySpec) -> Self {
        self.group_by.push(spec);
        self
    }

    /// Add a stream router.
    #[must_use]
    pub fn stream(mut self, stream_type: StreamType, spec: StreamRouterSpec) -> Self {
        self.streams.insert(stream_type, spec);
        self
    }
}

/// The per-process registry of entity types and activity types.
///
/// Written once at startup, read on every post. Lookups are synchronous;
/// the lock is never held across an await.
#[derive(Default)]
pub struct ActivityRegistry {
    entity_types: RwLock<HashMap<String, Arc<EntityType>>>,
    activity_types: RwLock<HashMap<String, Arc<ActivityTypeDefinition>>>,
}

impl ActivityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Last registration of a name wins.
    pub fn register_entity_type(&self, object_type: impl Into<String>, entity_type: EntityType) {
        let object_type = object_type.into();
        if let Ok(mut types) = self.entity_types.write() {
            if types
                .insert(object_type.clone(), Arc::new(entity_type))
                .is_some()
            {
                tracing::info!(object_type, "entity type re-registered, previous dropped");
            }
        }
    }

    /// Register an activity type. Last registration of a name wins.
    pub fn register_activity_type(&self, definition: ActivityTypeDefinition) {
        if let Ok(mut types) = self.activity_types.write() {
            if types
                .insert(definition.activity_type.clone(), Arc::new(definition))
                .is_some()
            {
                tracing::info!("activity type re-registered, previous dropped");
            }
        }
    }

    /// Look up an entity type by `object_type`.
    #[must_use]
    pub fn entity_type(&self, object_type: &str) -> Option<Arc<EntityType>> {
        self.entity_types.read().ok()?.get(object_type).cloned()
    }

    /// Look up an activity type definition.
    #[must_use]
    pub fn activity_type(&self, activity_type: &str) -> Option<Arc<ActivityTypeDefinition>> {
        self.activity_types.read().ok()?.get(activity_type).cloned()
    }
}

/// Stock transformers.
pub mod transformers {
    use super::{Arc, PersistentActivityEntity, TransformerFn, Value};

    /// Wire-format projection: `objectType`, `id` and the entity's public
    /// projection fields.
    #[must_use]
    pub fn activitystreams_default() -> TransformerFn {
        Arc::new(|entities: Vec<PersistentActivityEntity>| {
            Box::pin(async move {
                Ok(entities
                    .into_iter()
                    .map(|e| {
                        let mut map = serde_json::Map::new();
                        map.insert("objectType".to_string(), Value::String(e.object_type));
                        map.insert("id".to_string(), Value::String(e.id));
                        for (k, v) in e.extra {
                            map.insert(k, v);
                        }
                        Value::Object(map)
                    })
                    .collect())
            })
        })
    }

    /// Internal projection: the full persistent entity, visibility and
    /// tenant included.
    #[must_use]
    pub fn internal_default() -> TransformerFn {
        Arc::new(|entities: Vec<PersistentActivityEntity>| {
            Box::pin(async move {
                entities
                    .into_iter()
                    .map(|e| {
                        serde_json::to_value(&e).map_err(|err| {
                            collegium_core::Error::internal(format!(
                                "entity serialization failed: {err}"
                            ))
                        })
                    })
                    .collect()
            })
        })
    }
}

/// Stock propagation functions.
pub mod propagation {
    use super::{Arc, PropagationFn, PropagationRule, Visibility};

    /// Visibility-driven rules: public entities propagate to interacting
    /// tenants, logged-in entities to their own tenant, private entities to
    /// their members and themselves.
    #[must_use]
    pub fn by_visibility() -> PropagationFn {
        Arc::new(|entity| {
            Box::pin(async move {
                Ok(match entity.visibility {
                    Visibility::Public => vec![PropagationRule::InteractingTenants],
                    Visibility::LoggedIn => vec![PropagationRule::Tenant],
                    Visibility::Private => vec![
                        PropagationRule::Association("members".to_string()),
                        PropagationRule::SelfOnly,
                    ],
                })
            })
        })
    }
}

/// Stock associations.
pub mod associations {
    use super::{Arc, AssociationFn, PrincipalId, Value};

    /// The entity itself, when its id is a principal id.
    #[must_use]
    pub fn entity_self() -> AssociationFn {
        Arc::new(|entity| {
            Box::pin(async move { Ok(PrincipalId::parse(entity.id).into_iter().collect()) })
        })
    }

    /// Principal ids read from a JSON array field of the entity projection,
    /// e.g. `members`, `managers` or `message-contributors`.
    #[must_use]
    pub fn from_field(field: &'static str) -> AssociationFn {
        Arc::new(move |entity| {
            Box::pin(async move {
                let Some(Value::Array(values)) = entity.extra.get(field) else {
                    return Ok(Vec::new());
                };
                Ok(values
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|raw| PrincipalId::parse(raw).ok())
                    .collect())
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use crate::model::Visibility;

    fn stub_producer() -> ProducerFn {
        Arc::new(|resource: ActivitySeedResource| {
            Box::pin(async move {
                Ok(PersistentActivityEntity::new(
                    resource.resource_type,
                    resource.resource_id,
                    "cam",
                    Visibility::Public,
                ))
            })
        })
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = ActivityRegistry::new();
        registry.register_entity_type("meeting", EntityType::builder(stub_producer()).build());
        registry.register_entity_type("meeting", EntityType::builder(stub_producer()).build());

        let looked_up = registry.entity_type("meeting").expect("registered");
        let entity = looked_up
            .produce(ActivitySeedResource::new("meeting", "m:cam:1"))
            .await
            .expect("produce");
        assert_eq!(entity.id, "m:cam:1");
        assert!(registry.entity_type("unknown").is_none());
    }

    #[tokio::test]
    async fn default_transformers_project_both_formats() {
        let entity = PersistentActivityEntity::new("user", "u:cam:alice", "cam", Visibility::Private)
            .with_field("displayName", Value::String("Alice".to_string()));

        let wire = (transformers::activitystreams_default())(vec![entity.clone()])
            .await
            .expect("transform");
        assert_eq!(wire[0]["objectType"], "user");
        assert_eq!(wire[0]["displayName"], "Alice");
        assert!(wire[0].get("visibility").is_none());

        let internal = (transformers::internal_default())(vec![entity])
            .await
            .expect("transform");
        assert_eq!(internal[0]["visibility"], "private");
    }

    #[tokio::test]
    async fn field_association_extracts_principals() {
        let entity = PersistentActivityEntity::new("meeting", "m:cam:1", "cam", Visibility::Private)
            .with_field(
                "members",
                serde_json::json!(["u:cam:alice", "g:cam:staff", "not-a-principal"]),
            );

        let members = (associations::from_field("members"))(entity)
            .await
            .expect("association");
        let ids: Vec<&str> = members.iter().map(PrincipalId::as_str).collect();
        assert_eq!(ids, vec!["u:cam:alice", "g:cam:staff"]);
    }
}
