//! End-to-end routing, aggregation and collection flows on the in-memory
//! backends.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use collegium_activity::mocks::{CollectingSink, InMemoryActivityStore};
use collegium_activity::registry::{
    ActivityRegistry, ActivityTypeDefinition, EntityType, GroupBySpec, ProducerFn, Role,
    StreamRouterSpec, associations,
};
use collegium_activity::{
    ActivityAggregator, ActivityRouter, ActivitySeed, ActivitySeedResource, CollectionScheduler,
    Format, PersistentActivityEntity, StreamEntryEntity, StreamType, Visibility,
};
use collegium_core::config::{ActivityConfig, MqConfig};
use collegium_core::principal::PrincipalId;
use collegium_core::{now_millis, tenant::TenantPrivacy};
use collegium_testing::{InMemoryLockService, InMemoryTaskQueue, InMemoryTenantDirectory};
use serde_json::{Value, json};
use std::sync::Arc;

struct Harness {
    store: Arc<InMemoryActivityStore>,
    router: ActivityRouter,
    aggregator: Arc<ActivityAggregator>,
    scheduler: Arc<CollectionScheduler>,
    sink: Arc<CollectingSink>,
}

fn tenant_of(id: &str) -> String {
    id.split(':').nth(1).unwrap_or("cam").to_string()
}

fn build_registry() -> Arc<ActivityRegistry> {
    let registry = Arc::new(ActivityRegistry::new());

    let user_producer: ProducerFn = Arc::new(|res: ActivitySeedResource| {
        Box::pin(async move {
            Ok(PersistentActivityEntity::new(
                "user",
                res.resource_id.clone(),
                tenant_of(&res.resource_id),
                Visibility::Public,
            ))
        })
    });
    registry.register_entity_type(
        "user",
        EntityType::builder(user_producer)
            .association("self", associations::entity_self())
            .build(),
    );

    let meeting_producer: ProducerFn = Arc::new(|res: ActivitySeedResource| {
        Box::pin(async move {
            let mut entity = PersistentActivityEntity::new(
                "meeting",
                res.resource_id.clone(),
                tenant_of(&res.resource_id),
                Visibility::Private,
            );
            if let Some(Value::Object(map)) = res.resource_data {
                for (key, value) in map {
                    entity.extra.insert(key, value);
                }
            }
            Ok(entity)
        })
    });
    registry.register_entity_type(
        "meeting",
        EntityType::builder(meeting_producer)
            .association("members", associations::from_field("members"))
            .build(),
    );

    // Shares group per shared meeting: repeated shares of one meeting
    // collapse, shares of different meetings stay apart.
    registry.register_activity_type(
        ActivityTypeDefinition::new("meeting-share")
            .group_by(GroupBySpec {
                actor: false,
                object: true,
                target: false,
            })
            .stream(
                StreamType::Notification,
                StreamRouterSpec::new(vec![Role::Target], vec!["self"]),
            )
            .stream(
                StreamType::Activity,
                StreamRouterSpec::new(vec![Role::Object], vec!["members"]),
            ),
    );

    // A type with two grouping tuples: each tuple owns an aggregate.
    registry.register_activity_type(
        ActivityTypeDefinition::new("meeting-update")
            .group_by(GroupBySpec {
                actor: true,
                object: false,
                target: false,
            })
            .group_by(GroupBySpec {
                actor: false,
                object: true,
                target: false,
            })
            .stream(
                StreamType::Notification,
                StreamRouterSpec::new(vec![Role::Target], vec!["self"]),
            ),
    );

    registry
}

fn harness() -> Harness {
    let registry = build_registry();
    let store = Arc::new(InMemoryActivityStore::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    let locks = Arc::new(InMemoryLockService::new());
    let tenants = Arc::new(
        InMemoryTenantDirectory::new()
            .with_tenant("cam")
            .with_tenant_full("vault", "vault.internal", TenantPrivacy::Private),
    );
    let config = ActivityConfig::default().with_polling_frequency(None);

    let router = ActivityRouter::new(
        registry.clone(),
        store.clone(),
        queue.clone(),
        tenants.clone(),
        config.clone(),
    );
    let aggregator = Arc::new(ActivityAggregator::new(
        registry,
        store.clone(),
        config.clone(),
    ));
    let sink = Arc::new(CollectingSink::new());
    aggregator.register_sink(sink.clone());
    let scheduler = Arc::new(CollectionScheduler::new(
        aggregator.clone(),
        store.clone(),
        locks,
        queue,
        config,
        MqConfig::default(),
    ));

    Harness {
        store,
        router,
        aggregator,
        scheduler,
        sink,
    }
}

fn share(actor: &str, meeting: &str, members: &[&str], target: &str) -> ActivitySeed {
    ActivitySeed::new(
        "meeting-share",
        "share",
        now_millis(),
        ActivitySeedResource::new("user", actor),
    )
    .with_object(ActivitySeedResource::new("meeting", meeting).with_data(json!({
        "members": members
    })))
    .with_target(ActivitySeedResource::new("user", target))
}

fn principal(id: &str) -> PrincipalId {
    PrincipalId::parse(id).expect("valid principal")
}

#[tokio::test]
async fn three_shares_land_one_entry_per_recipient() {
    let h = harness();
    let members = ["u:cam:u", "u:cam:v", "u:cam:w", "u:cam:x"];

    for target in ["u:cam:v", "u:cam:w", "u:cam:x"] {
        h.router
            .post_activity(share("u:cam:u", "m:cam:standup", &members, target))
            .await
            .expect("post");
    }
    h.scheduler.collect_all().await;

    for recipient in ["u:cam:v", "u:cam:w", "u:cam:x"] {
        let entries = h
            .aggregator
            .read_stream(
                &principal(recipient),
                StreamType::Notification,
                Format::ActivityStreams,
                10,
            )
            .await
            .expect("read");
        assert_eq!(entries.len(), 1, "{recipient} sees exactly one entry");
        assert_eq!(entries[0].num_new_activities, 1);
        assert_eq!(entries[0].actor.len(), 1, "actor collection of size 1");
    }
}

#[tokio::test]
async fn identical_grouping_keys_collapse_within_one_cycle() {
    let h = harness();
    let members = ["u:cam:v", "u:cam:a1", "u:cam:a2", "u:cam:a3"];

    // Three different actors share the same meeting with v; one cycle.
    for actor in ["u:cam:a1", "u:cam:a2", "u:cam:a3"] {
        h.router
            .post_activity(share(actor, "m:cam:retro", &members, "u:cam:v"))
            .await
            .expect("post");
    }
    h.scheduler.collect_all().await;

    let v = principal("u:cam:v");
    let entries = h
        .aggregator
        .read_stream(&v, StreamType::Notification, Format::ActivityStreams, 10)
        .await
        .expect("read");
    assert_eq!(entries.len(), 1, "one aggregate for one grouping key");
    assert!(entries[0].num_new_activities <= 1);
    assert_eq!(entries[0].actor.len(), 3, "actors collapsed into a collection");
    assert!(matches!(
        entries[0].actor,
        StreamEntryEntity::Collection { .. }
    ));
}

#[tokio::test]
async fn acknowledgment_resets_the_new_counter() {
    let h = harness();
    let v = principal("u:cam:v");
    let members = ["u:cam:u", "u:cam:v"];

    h.router
        .post_activity(share("u:cam:u", "m:cam:one", &members, "u:cam:v"))
        .await
        .expect("post");
    h.scheduler.collect_all().await;
    h.aggregator
        .reset_aggregation(&v, StreamType::Notification)
        .await
        .expect("ack");

    // Two disjoint activities (different meetings) in one cycle.
    h.router
        .post_activity(share("u:cam:u", "m:cam:two", &members, "u:cam:v"))
        .await
        .expect("post");
    h.router
        .post_activity(share("u:cam:u", "m:cam:three", &members, "u:cam:v"))
        .await
        .expect("post");
    h.scheduler.collect_all().await;

    let entries = h
        .aggregator
        .read_stream(&v, StreamType::Notification, Format::ActivityStreams, 10)
        .await
        .expect("read");
    let newest = entries
        .iter()
        .find(|e| e.activity_type == "meeting-share" && e.num_new_activities == 2);
    assert!(
        newest.is_some(),
        "two disjoint activities after an ack count two new units"
    );

    // Aggregating activities, on the other hand, count one.
    h.aggregator
        .reset_aggregation(&v, StreamType::Notification)
        .await
        .expect("ack");
    h.router
        .post_activity(share("u:cam:a", "m:cam:four", &["u:cam:a", "u:cam:b", "u:cam:v"], "u:cam:v"))
        .await
        .expect("post");
    h.router
        .post_activity(share("u:cam:b", "m:cam:four", &["u:cam:a", "u:cam:b", "u:cam:v"], "u:cam:v"))
        .await
        .expect("post");
    h.scheduler.collect_all().await;

    let entries = h
        .aggregator
        .read_stream(&v, StreamType::Notification, Format::ActivityStreams, 10)
        .await
        .expect("read");
    let merged = entries
        .iter()
        .find(|e| e.actor.len() == 2)
        .expect("the two shares merged");
    assert_eq!(merged.num_new_activities, 1);
}

#[tokio::test]
async fn one_seed_matching_two_tuples_counts_two_units() {
    let h = harness();
    let v = principal("u:cam:v");

    let seed = ActivitySeed::new(
        "meeting-update",
        "update",
        now_millis(),
        ActivitySeedResource::new("user", "u:cam:u"),
    )
    .with_object(ActivitySeedResource::new("meeting", "m:cam:m1").with_data(json!({
        "members": ["u:cam:u", "u:cam:v"]
    })))
    .with_target(ActivitySeedResource::new("user", "u:cam:v"));

    h.router.post_activity(seed).await.expect("post");
    h.scheduler.collect_all().await;

    let keys = h.store.group_keys(&v, StreamType::Notification).await;
    assert_eq!(keys.len(), 2, "each tuple owns its own aggregate");

    let entries = h
        .aggregator
        .read_stream(&v, StreamType::Notification, Format::Internal, 10)
        .await
        .expect("read");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.num_new_activities == 2));
}

#[tokio::test]
async fn expired_aggregate_starts_fresh() {
    let h = harness();
    let v = principal("u:cam:v");
    let members = ["u:cam:u", "u:cam:v"];

    h.router
        .post_activity(share("u:cam:u", "m:cam:old", &members, "u:cam:v"))
        .await
        .expect("post");
    h.scheduler.collect_all().await;

    let keys = h.store.group_keys(&v, StreamType::Notification).await;
    let key = keys.first().expect("one aggregate");
    let stale = now_millis() - 4 * 60 * 60 * 1000;
    h.store
        .age_aggregate(&v, StreamType::Notification, key, stale, stale)
        .await;

    h.router
        .post_activity(share("u:cam:u", "m:cam:old", &members, "u:cam:v"))
        .await
        .expect("post");
    h.scheduler.collect_all().await;

    let entries = h
        .aggregator
        .read_stream(&v, StreamType::Notification, Format::ActivityStreams, 10)
        .await
        .expect("read");
    assert_eq!(entries.len(), 2, "idle expiry forces a fresh entry");
    assert_eq!(
        entries.iter().filter(|e| e.num_new_activities == 2).count(),
        1,
        "the fresh aggregate is the second deliverable unit"
    );
}

#[tokio::test]
async fn cross_tenant_delivery_respects_tenant_privacy() {
    let h = harness();

    // The target lives in a private tenant; the meeting's member gate
    // admits them but the user entities' interacting-tenants gate does not.
    let routed = h
        .router
        .post_activity(share(
            "u:cam:u",
            "m:cam:open",
            &["u:cam:u", "u:vault:spy"],
            "u:vault:spy",
        ))
        .await
        .expect("post");
    assert_eq!(routed, 0, "no route crosses into a private tenant");
}

#[tokio::test]
async fn notification_streams_exist_only_for_users() {
    let h = harness();

    let routed = h
        .router
        .post_activity(share(
            "u:cam:u",
            "m:cam:open",
            &["u:cam:u", "g:cam:staff"],
            "u:cam:u",
        ))
        .await
        .expect("post");

    // The activity stream route for the group survives, its notification
    // route does not exist in the first place; u got both streams.
    h.scheduler.collect_all().await;
    let group = principal("g:cam:staff");
    let group_notifications = h
        .aggregator
        .read_stream(&group, StreamType::Notification, Format::Internal, 10)
        .await
        .expect("read");
    assert!(group_notifications.is_empty());
    let group_activity = h
        .aggregator
        .read_stream(&group, StreamType::Activity, Format::Internal, 10)
        .await
        .expect("read");
    assert_eq!(group_activity.len(), 1);
    assert!(routed >= 2);
}

#[tokio::test]
async fn sinks_receive_materialized_deliveries() {
    let h = harness();
    h.router
        .post_activity(share(
            "u:cam:u",
            "m:cam:sync",
            &["u:cam:u", "u:cam:v"],
            "u:cam:v",
        ))
        .await
        .expect("post");
    h.scheduler.collect_all().await;

    let deliveries = h.sink.deliveries().await;
    assert!(!deliveries.is_empty());
    let to_v = deliveries
        .iter()
        .find(|d| {
            d.recipient_id.as_str() == "u:cam:v" && d.stream_type == StreamType::Notification
        })
        .expect("v's notification delivery");
    assert!(to_v.entries.contains_key(&Format::ActivityStreams));
    assert!(to_v.entries.contains_key(&Format::Internal));
}

#[tokio::test]
async fn queue_triggers_drive_collection_without_polling() {
    let h = harness();
    let handle = h.scheduler.start();
    assert!(handle.is_active());

    h.router
        .post_activity(share(
            "u:cam:u",
            "m:cam:fast",
            &["u:cam:u", "u:cam:v"],
            "u:cam:v",
        ))
        .await
        .expect("post");

    let v = principal("u:cam:v");
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        let entries = h
            .aggregator
            .read_stream(&v, StreamType::Notification, Format::Internal, 10)
            .await
            .expect("read");
        if !entries.is_empty() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "trigger-driven collection did not happen in time"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    handle.stop();
}

#[tokio::test]
async fn future_published_and_unknown_types_are_rejected() {
    let h = harness();

    let future = ActivitySeed::new(
        "meeting-share",
        "share",
        now_millis() + 60_000,
        ActivitySeedResource::new("user", "u:cam:u"),
    );
    assert_eq!(
        h.router
            .post_activity(future)
            .await
            .expect_err("future published")
            .code(),
        400
    );

    let unknown = ActivitySeed::new(
        "no-such-type",
        "x",
        now_millis(),
        ActivitySeedResource::new("user", "u:cam:u"),
    );
    assert_eq!(
        h.router
            .post_activity(unknown)
            .await
            .expect_err("unknown type")
            .code(),
        400
    );
}
