//! Activity data model: seeds, persistent entities and stream entries.

use collegium_core::principal::PrincipalId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The named channels a recipient principal owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// The general activity feed.
    Activity,
    /// The notification tray; users only.
    Notification,
    /// The email digest feed.
    Email,
    /// Live message/chat delivery.
    Message,
}

impl StreamType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Notification => "notification",
            Self::Email => "email",
            Self::Message => "message",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "activity" => Some(Self::Activity),
            "notification" => Some(Self::Notification),
            "email" => Some(Self::Email),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization views of an activity entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// The wire format handed to external consumers.
    ActivityStreams,
    /// The full internal projection, visibility included.
    Internal,
}

impl Format {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityStreams => "activitystreams",
            Self::Internal => "internal",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "activitystreams" => Some(Self::ActivityStreams),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Every registered format.
    pub const ALL: [Self; 2] = [Self::ActivityStreams, Self::Internal];
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility of a persistent entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone, cross-tenant included.
    Public,
    /// Any authenticated principal of an interacting tenant.
    LoggedIn,
    /// Direct members only.
    Private,
}

/// One role of a posted activity before entity materialization.
///
/// `resource_data` optionally carries the pre-fetched entity so the producer
/// can skip its lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySeedResource {
    /// The registered object type of the resource.
    pub resource_type: String,
    /// The opaque resource id.
    pub resource_id: String,
    /// Pre-fetched entity, if the caller already had it in hand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<Value>,
}

impl ActivitySeedResource {
    /// Reference a resource by type and id.
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            resource_data: None,
        }
    }

    /// Attach the pre-fetched entity.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.resource_data = Some(data);
        self
    }
}

/// A posted activity before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySeed {
    /// The registered activity type, e.g. `"meeting-share"`.
    pub activity_type: String,
    /// The verb, e.g. `"share"`.
    pub verb: String,
    /// Publication timestamp, milliseconds.
    pub published: i64,
    /// Who acted.
    pub actor: ActivitySeedResource,
    /// What was acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<ActivitySeedResource>,
    /// Where it happened / who it was aimed at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ActivitySeedResource>,
}

impl ActivitySeed {
    /// Seed with an actor only.
    pub fn new(
        activity_type: impl Into<String>,
        verb: impl Into<String>,
        published: i64,
        actor: ActivitySeedResource,
    ) -> Self {
        Self {
            activity_type: activity_type.into(),
            verb: verb.into(),
            published,
            actor,
            object: None,
            target: None,
        }
    }

    /// Attach the object role.
    #[must_use]
    pub fn with_object(mut self, object: ActivitySeedResource) -> Self {
        self.object = Some(object);
        self
    }

    /// Attach the target role.
    #[must_use]
    pub fn with_target(mut self, target: ActivitySeedResource) -> Self {
        self.target = Some(target);
        self
    }
}

/// The output of a registered producer: an entity ready for routing and
/// rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentActivityEntity {
    /// The registered object type.
    pub object_type: String,
    /// The opaque entity id.
    pub id: String,
    /// Alias of the tenant the entity belongs to.
    pub tenant_alias: String,
    /// Visibility of the entity.
    pub visibility: Visibility,
    /// Object-type-specific projection used by transformers and
    /// associations.
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl PersistentActivityEntity {
    /// Create an entity with an empty projection.
    pub fn new(
        object_type: impl Into<String>,
        id: impl Into<String>,
        tenant_alias: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
            tenant_alias: tenant_alias.into(),
            visibility,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a projection field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// One role slot of a materialized stream entry: a single entity, or the
/// ordered de-duplicated collection an aggregate collapsed into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEntryEntity {
    /// Exactly one entity in this role.
    Single(Value),
    /// Multiple collapsed entities, insertion-ordered.
    Collection {
        /// The collapsed entities.
        entities: Vec<Value>,
    },
}

impl StreamEntryEntity {
    /// Number of entities in the slot.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Collection { entities } => entities.len(),
        }
    }

    /// Whether the slot is empty (a degenerate collection).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collapse a transformed entity list into a slot.
    #[must_use]
    pub fn from_entities(mut entities: Vec<Value>) -> Self {
        if entities.len() == 1 {
            Self::Single(entities.remove(0))
        } else {
            Self::Collection { entities }
        }
    }
}

/// The aggregated unit stored per `(recipient, stream, format)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Stable id of this entry; survives merges.
    pub activity_id: String,
    /// The activity type.
    pub activity_type: String,
    /// The verb.
    pub verb: String,
    /// Publication timestamp of the newest merged seed.
    pub published: i64,
    /// Actor slot.
    pub actor: StreamEntryEntity,
    /// Object slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<StreamEntryEntity>,
    /// Target slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StreamEntryEntity>,
    /// Unseen deliverable units on the recipient's stream at materialization
    /// time.
    pub num_new_activities: i64,
}

/// A route expanded by the router, parked in a bucket's pending queue until
/// a collection cycle drains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedActivity {
    /// Who receives the activity.
    pub recipient_id: PrincipalId,
    /// Which of the recipient's streams it lands in.
    pub stream_type: StreamType,
    /// Transient streams are delivered live and never persisted.
    pub transient: bool,
    /// The originating seed.
    pub seed: ActivitySeed,
    /// Materialized actor entity.
    pub actor: PersistentActivityEntity,
    /// Materialized object entity.
    pub object: Option<PersistentActivityEntity>,
    /// Materialized target entity.
    pub target: Option<PersistentActivityEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_type_round_trips() {
        for st in [
            StreamType::Activity,
            StreamType::Notification,
            StreamType::Email,
            StreamType::Message,
        ] {
            assert_eq!(StreamType::parse(st.as_str()), Some(st));
        }
        assert_eq!(StreamType::parse("nope"), None);
    }

    #[test]
    fn format_round_trips() {
        for f in Format::ALL {
            assert_eq!(Format::parse(f.as_str()), Some(f));
        }
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn entry_entity_collapses_singletons() {
        let single = StreamEntryEntity::from_entities(vec![serde_json::json!({"id": "a"})]);
        assert!(matches!(single, StreamEntryEntity::Single(_)));
        assert_eq!(single.len(), 1);

        let coll = StreamEntryEntity::from_entities(vec![
            serde_json::json!({"id": "a"}),
            serde_json::json!({"id": "b"}),
        ]);
        assert!(matches!(coll, StreamEntryEntity::Collection { .. }));
        assert_eq!(coll.len(), 2);
    }
}
