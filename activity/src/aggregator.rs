//! The activity aggregator: collapsing routed activities into per-recipient
//! stream entries.
//!
//! Within a recipient's stream, activities sharing a grouping key merge into
//! one aggregate while the aggregate stays inside its window: idle for at
//! most `aggregateIdleExpiry`, alive for at most `aggregateMaxExpiry`. A
//! merge unions the non-keyed role entities into insertion-ordered,
//! id-de-duplicated collections and does not count as new activity; a fresh
//! aggregate counts one new deliverable unit. A seed matching several
//! grouping tuples feeds each tuple's aggregate independently, and each
//! counts as its own unit.
//!
//! After a batch, materialized entries are persisted per format with the
//! activity TTL and fanned out to the registered delivery sinks.

use crate::model::{
    Format, PersistentActivityEntity, RoutedActivity, StreamEntry, StreamEntryEntity, StreamType,
};
use crate::registry::{ActivityRegistry, GroupBySpec};
use crate::sinks::{Delivery, DeliverySink};
use crate::store::{ActivityStore, AggregateStatus};
use collegium_core::config::ActivityConfig;
use collegium_core::principal::PrincipalId;
use collegium_core::{Error, Result, now_millis};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Groups routed activities, materializes stream entries and drives the
/// delivery fan-out.
pub struct ActivityAggregator {
    registry: Arc<ActivityRegistry>,
    store: Arc<dyn ActivityStore>,
    config: ActivityConfig,
    sinks: RwLock<Vec<Arc<dyn DeliverySink>>>,
}

impl ActivityAggregator {
    /// Assemble the aggregator.
    #[must_use]
    pub fn new(
        registry: Arc<ActivityRegistry>,
        store: Arc<dyn ActivityStore>,
        config: ActivityConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Register a delivery sink. Startup wiring only.
    pub fn register_sink(&self, sink: Arc<dyn DeliverySink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }

    /// Process one collection batch.
    ///
    /// Returns the deliveries handed to the sinks. A malformed entry is
    /// logged and skipped, never stalling the batch; storage failures while
    /// persisting the batch do propagate.
    ///
    /// # Errors
    ///
    /// Storage failures during persistence or fan-out preparation.
    pub async fn aggregate_batch(&self, routes: Vec<RoutedActivity>) -> Result<Vec<Delivery>> {
        let now = now_millis();
        // Working aggregates of this cycle, so n seeds with one key produce
        // one persisted entry.
        let mut touched: HashMap<(PrincipalId, StreamType, String), AggregateStatus> =
            HashMap::new();
        let mut new_units: HashMap<(PrincipalId, StreamType), i64> = HashMap::new();
        let mut transient: Vec<RoutedActivity> = Vec::new();

        for route in routes {
            if route.transient {
                transient.push(route);
                continue;
            }
            if let Err(error) = self
                .absorb(&route, now, &mut touched, &mut new_units)
                .await
            {
                tracing::warn!(
                    %error,
                    recipient = %route.recipient_id,
                    stream = %route.stream_type,
                    activity_type = %route.seed.activity_type,
                    "pending entry skipped"
                );
            }
        }

        // Advance the unseen counters before materializing, so every entry
        // of this cycle observes the post-cycle count. Streams that only
        // merged keep their current count.
        let mut counters: HashMap<(PrincipalId, StreamType), i64> = HashMap::new();
        for (recipient, stream_type, _) in touched.keys() {
            let pair = (recipient.clone(), *stream_type);
            if counters.contains_key(&pair) {
                continue;
            }
            let current = self.store.get_stream_status(recipient, *stream_type).await?;
            let units = new_units.get(&pair).copied().unwrap_or(0);
            let next = current + units;
            if units > 0 {
                self.store
                    .set_stream_status(recipient, *stream_type, next)
                    .await?;
            }
            counters.insert(pair, next);
        }

        let mut deliveries: HashMap<(PrincipalId, StreamType), Delivery> = HashMap::new();
        for ((recipient, stream_type, _), status) in &touched {
            self.store.put_aggregate(status).await?;
            let num_new = counters
                .get(&(recipient.clone(), *stream_type))
                .copied()
                .unwrap_or(0);
            let expires_at = now.saturating_add(
                i64::try_from(self.config.activity_ttl.as_millis()).unwrap_or(i64::MAX),
            );

            let delivery = deliveries
                .entry((recipient.clone(), *stream_type))
                .or_insert_with(|| Delivery {
                    recipient_id: recipient.clone(),
                    stream_type: *stream_type,
                    entries: HashMap::new(),
                });
            for format in Format::ALL {
                let entry = self.materialize(status, format, num_new).await?;
                self.store
                    .put_stream_entry(recipient, *stream_type, format, &entry, expires_at)
                    .await?;
                delivery.entries.insert(format, entry);
            }
        }
        let mut deliveries: Vec<Delivery> = deliveries.into_values().collect();

        // Transient routes bypass aggregation and persistence entirely.
        for route in transient {
            match self.materialize_transient(&route).await {
                Ok(delivery) => deliveries.push(delivery),
                Err(error) => {
                    tracing::warn!(%error, recipient = %route.recipient_id, "transient entry skipped");
                }
            }
        }

        metrics::counter!("activity.aggregated").increment(deliveries.len() as u64);
        self.fan_out(&deliveries).await;
        Ok(deliveries)
    }

    /// Acknowledge a recipient's stream: the next matching activity starts a
    /// fresh aggregate and the unseen counter restarts from zero.
    ///
    /// # Errors
    ///
    /// Storage failures propagate.
    pub async fn reset_aggregation(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> Result<()> {
        self.store.delete_aggregates(recipient, stream_type).await?;
        self.store
            .set_stream_status(recipient, stream_type, 0)
            .await?;
        tracing::debug!(recipient = %recipient, stream = %stream_type, "aggregation reset");
        Ok(())
    }

    /// Newest-first page of a recipient's stream.
    ///
    /// # Errors
    ///
    /// Storage failures propagate.
    pub async fn read_stream(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        format: Format,
        limit: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.store
            .get_stream(recipient, stream_type, format, limit)
            .await
    }

    /// Fold one route into the cycle's working aggregates.
    async fn absorb(
        &self,
        route: &RoutedActivity,
        now: i64,
        touched: &mut HashMap<(PrincipalId, StreamType, String), AggregateStatus>,
        new_units: &mut HashMap<(PrincipalId, StreamType), i64>,
    ) -> Result<()> {
        let Some(definition) = self.registry.activity_type(&route.seed.activity_type) else {
            return Err(Error::internal(format!(
                "unregistered activity type in pending queue: {}",
                route.seed.activity_type
            )));
        };
        let specs = if definition.group_by.is_empty() {
            vec![GroupBySpec::ALL_ROLES]
        } else {
            definition.group_by.clone()
        };

        for spec in specs {
            let key = group_key(&route.seed.activity_type, spec, route);
            let slot = (route.recipient_id.clone(), route.stream_type, key.clone());

            let existing = match touched.get(&slot) {
                Some(working) => Some(working.clone()),
                None => {
                    self.store
                        .get_aggregate(&route.recipient_id, route.stream_type, &key)
                        .await?
                }
            };

            let status = match existing {
                Some(mut status) if self.is_alive(&status, now) => {
                    merge_role(&mut status.actors, &route.actor);
                    if let Some(object) = &route.object {
                        merge_role(&mut status.objects, object);
                    }
                    if let Some(target) = &route.target {
                        merge_role(&mut status.targets, target);
                    }
                    status.published = status.published.max(route.seed.published);
                    status.updated = now;
                    status
                }
                _ => {
                    // Fresh aggregate: either nothing existed or the window
                    // lapsed. Each fresh aggregate is one deliverable unit.
                    *new_units
                        .entry((route.recipient_id.clone(), route.stream_type))
                        .or_insert(0) += 1;
                    AggregateStatus {
                        recipient_id: route.recipient_id.clone(),
                        stream_type: route.stream_type,
                        group_key: key,
                        keyed_roles: spec,
                        activity_id: uuid::Uuid::new_v4().to_string(),
                        activity_type: route.seed.activity_type.clone(),
                        verb: route.seed.verb.clone(),
                        published: route.seed.published,
                        created: now,
                        updated: now,
                        actors: vec![route.actor.clone()],
                        objects: route.object.clone().into_iter().collect(),
                        targets: route.target.clone().into_iter().collect(),
                    }
                }
            };
            touched.insert(slot, status);
        }
        Ok(())
    }

    /// Whether an aggregate may still absorb activity.
    fn is_alive(&self, status: &AggregateStatus, now: i64) -> bool {
        let idle = i64::try_from(self.config.aggregate_idle_expiry.as_millis()).unwrap_or(i64::MAX);
        let max = i64::try_from(self.config.aggregate_max_expiry.as_millis()).unwrap_or(i64::MAX);
        now - status.updated <= idle && now - status.created <= max
    }

    /// Project an aggregate into a stream entry in one format.
    async fn materialize(
        &self,
        status: &AggregateStatus,
        format: Format,
        num_new: i64,
    ) -> Result<StreamEntry> {
        let actor = self.transform_slot(format, &status.actors).await?;
        let object = if status.objects.is_empty() {
            None
        } else {
            Some(self.transform_slot(format, &status.objects).await?)
        };
        let target = if status.targets.is_empty() {
            None
        } else {
            Some(self.transform_slot(format, &status.targets).await?)
        };
        Ok(StreamEntry {
            activity_id: status.activity_id.clone(),
            activity_type: status.activity_type.clone(),
            verb: status.verb.clone(),
            published: status.published,
            actor,
            object,
            target,
            num_new_activities: num_new,
        })
    }

    /// A transient route materializes straight from its seed, in every
    /// format, without touching storage.
    async fn materialize_transient(&self, route: &RoutedActivity) -> Result<Delivery> {
        let activity_id = uuid::Uuid::new_v4().to_string();
        let mut entries = HashMap::new();
        for format in Format::ALL {
            let actor = self
                .transform_slot(format, std::slice::from_ref(&route.actor))
                .await?;
            let object = match &route.object {
                Some(entity) => Some(self.transform_slot(format, std::slice::from_ref(entity)).await?),
                None => None,
            };
            let target = match &route.target {
                Some(entity) => Some(self.transform_slot(format, std::slice::from_ref(entity)).await?),
                None => None,
            };
            entries.insert(
                format,
                StreamEntry {
                    activity_id: activity_id.clone(),
                    activity_type: route.seed.activity_type.clone(),
                    verb: route.seed.verb.clone(),
                    published: route.seed.published,
                    actor,
                    object,
                    target,
                    num_new_activities: 1,
                },
            );
        }
        Ok(Delivery {
            recipient_id: route.recipient_id.clone(),
            stream_type: route.stream_type,
            entries,
        })
    }

    /// Transform one role's entities, preserving insertion order.
    async fn transform_slot(
        &self,
        format: Format,
        entities: &[PersistentActivityEntity],
    ) -> Result<StreamEntryEntity> {
        let mut values = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity_type = self
                .registry
                .entity_type(&entity.object_type)
                .ok_or_else(|| {
                    Error::internal(format!(
                        "stored entity has unregistered object type: {}",
                        entity.object_type
                    ))
                })?;
            values.extend(entity_type.transform(format, vec![entity.clone()]).await?);
        }
        Ok(StreamEntryEntity::from_entities(values))
    }

    /// Hand every delivery to every interested sink. Sink failures are
    /// logged, never propagated.
    async fn fan_out(&self, deliveries: &[Delivery]) {
        let sinks: Vec<Arc<dyn DeliverySink>> = match self.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for delivery in deliveries {
            for sink in &sinks {
                if !sink.handles(delivery.stream_type) {
                    continue;
                }
                if let Err(error) = sink.deliver(delivery).await {
                    tracing::warn!(
                        %error,
                        recipient = %delivery.recipient_id,
                        stream = %delivery.stream_type,
                        "delivery sink failed"
                    );
                }
            }
        }
    }
}

/// Grouping key: the activity type concatenated with the canonical ids of
/// the roles the tuple marks.
fn group_key(activity_type: &str, spec: GroupBySpec, route: &RoutedActivity) -> String {
    let mut key = activity_type.to_string();
    if spec.actor {
        key.push_str("#a:");
        key.push_str(&route.actor.id);
    }
    if spec.object {
        if let Some(object) = &route.object {
            key.push_str("#o:");
            key.push_str(&object.id);
        }
    }
    if spec.target {
        if let Some(target) = &route.target {
            key.push_str("#t:");
            key.push_str(&target.id);
        }
    }
    key
}

/// Union an entity into a role slot, keeping insertion order; an id already
/// present keeps its stored entity.
fn merge_role(slot: &mut Vec<PersistentActivityEntity>, entity: &PersistentActivityEntity) {
    if !slot.iter().any(|existing| existing.id == entity.id) {
        slot.push(entity.clone());
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use crate::model::{ActivitySeed, ActivitySeedResource, Visibility};

    fn route(recipient: &str) -> RoutedActivity {
        RoutedActivity {
            recipient_id: PrincipalId::parse(recipient).expect("valid principal"),
            stream_type: StreamType::Activity,
            transient: false,
            seed: ActivitySeed::new(
                "meeting-share",
                "share",
                1_000,
                ActivitySeedResource::new("user", "u:cam:alice"),
            ),
            actor: PersistentActivityEntity::new("user", "u:cam:alice", "cam", Visibility::Public),
            object: Some(PersistentActivityEntity::new(
                "meeting",
                "m:cam:1",
                "cam",
                Visibility::Private,
            )),
            target: None,
        }
    }

    #[test]
    fn group_key_reflects_the_tuple() {
        let r = route("u:cam:v");
        let by_object = group_key(
            "meeting-share",
            GroupBySpec {
                actor: false,
                object: true,
                target: false,
            },
            &r,
        );
        assert_eq!(by_object, "meeting-share#o:m:cam:1");

        let by_all = group_key("meeting-share", GroupBySpec::ALL_ROLES, &r);
        assert_eq!(by_all, "meeting-share#a:u:cam:alice#o:m:cam:1");
    }

    #[test]
    fn merge_role_unions_by_id_keeping_first() {
        let mut slot = vec![
            PersistentActivityEntity::new("user", "u:cam:alice", "cam", Visibility::Public)
                .with_field("displayName", serde_json::json!("Alice v1")),
        ];
        let duplicate =
            PersistentActivityEntity::new("user", "u:cam:alice", "cam", Visibility::Public)
                .with_field("displayName", serde_json::json!("Alice v2"));
        let fresh = PersistentActivityEntity::new("user", "u:cam:bob", "cam", Visibility::Public);

        merge_role(&mut slot, &duplicate);
        merge_role(&mut slot, &fresh);

        assert_eq!(slot.len(), 2);
        assert_eq!(
            slot[0].extra.get("displayName"),
            Some(&serde_json::json!("Alice v1")),
            "the already-stored entity wins a tie"
        );
        assert_eq!(slot[1].id, "u:cam:bob");
    }
}
