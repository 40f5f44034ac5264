use gismirror_devkit::payloads::DEFAULT_TIME_MS;
use gismirror_devkit::{EventPayloadBuilder, FeatureCall, HostPayloadBuilder, Op, StoreWrite, TestHarness};
use gismirror_kernel::config::EventLayout;
use gismirror_kernel::models::{EventKind, HostPayload, HostRecord};
use gismirror_kernel::reconcile::Outcome;
use serde_json::json;
use std::collections::BTreeMap;

fn by_severity() -> EventLayout {
    let layers: BTreeMap<i64, String> =
        [(0, "10"), (1, "11"), (2, "12")].into_iter().map(|(s, l)| (s, l.to_string())).collect();
    EventLayout::BySeverity { layers }
}

async fn harness_with_host(layout: EventLayout) -> TestHarness {
    let harness = TestHarness::with_layout(layout);
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").build()).await;
    harness.reset();
    harness
}

#[tokio::test]
async fn test_event_for_unknown_host_is_rejected() {
    let harness = TestHarness::new();
    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "ghost", "cpu").state(2, "CPU 99%").build()).await;
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert!(harness.features.calls().is_empty());
    assert_eq!(harness.store.write_count(), 0);
}

#[tokio::test]
async fn test_event_for_decommissioned_host_is_rejected() {
    let harness = harness_with_host(EventLayout::None).await;
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").decommissioned().build()).await;
    harness.reset();

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    assert!(matches!(outcome, Outcome::Rejected(_)));
    harness.assert_quiet().unwrap();
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let harness = harness_with_host(EventLayout::None).await;
    let outcomes = harness
        .send_events(vec![
            EventPayloadBuilder::new("AMS", "r1", "cpu").set_field("timestamp", json!("soon")).build(),
            EventPayloadBuilder::new("AMS", "r1", "cpu").without("event_state").build(),
            EventPayloadBuilder::new("AMS", "r1", "cpu").set_field("event_state", json!(-1)).build(),
        ])
        .await;
    assert_eq!(outcomes.count(|o| matches!(o, Outcome::Rejected(_))), 3);
    harness.assert_quiet().unwrap();
}

#[tokio::test]
async fn test_critical_service_moves_host_to_service_state() {
    let harness = harness_with_host(EventLayout::None).await;

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    assert_eq!(outcome, Outcome::Created);

    // fermeture de l'ancienne feature host puis nouvelle feature
    let calls = harness.features.calls();
    assert_eq!(calls.len(), 2);
    let FeatureCall::Update { attributes, .. } = &calls[0] else { panic!("expected update first") };
    assert_eq!(attributes["objectid"], 1);
    assert_eq!(attributes["endtime"], DEFAULT_TIME_MS);
    let FeatureCall::Add { attributes, layer, .. } = &calls[1] else { panic!("expected add second") };
    assert_eq!(layer, "0");
    assert_eq!(attributes["status"], 2);
    assert_eq!(attributes["giskleur"], 11);
    assert_eq!(attributes["type"], "SERVICE");
    assert_eq!(attributes["event_output"], "CPU 99%");
    assert_eq!(attributes["hwfamily"], "ASR");

    assert_eq!(
        harness.store_writes(),
        vec![
            StoreWrite::PutEvent { key: "AMS_r1_cpu".into() },
            StoreWrite::UpdateHost {
                key: "AMS_r1".into(),
                fields: vec!["status", "type", "giskleur", "event_output", "starttime", "objectId"],
            },
        ]
    );

    let host = harness.host("AMS", "r1").await.unwrap();
    assert_eq!(host.object_id, Some(2));
    assert_eq!(host.kind, EventKind::Service);
    assert_eq!(host.giskleur, 11);
}

#[tokio::test]
async fn test_replayed_event_has_no_side_effects() {
    let harness = harness_with_host(EventLayout::None).await;
    let event = EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build();
    harness.send_event(event.clone()).await;
    harness.reset();

    assert_eq!(harness.send_event(event).await, Outcome::Unchanged);
    harness.assert_quiet().unwrap();
}

#[tokio::test]
async fn test_output_change_alone_is_not_written() {
    let harness = harness_with_host(EventLayout::None).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(1, "CPU 85%").build()).await;
    harness.reset();

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(1, "CPU 86%").build()).await;
    assert_eq!(outcome, Outcome::Unchanged);
    harness.assert_quiet().unwrap();
    assert_eq!(harness.event("AMS", "r1", "cpu").await.unwrap().output, "CPU 85%");
}

#[tokio::test]
async fn test_host_warning_keeps_host_dominant() {
    let harness = harness_with_host(EventLayout::None).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "").state(1, "PING WARN").build()).await;

    let host = harness.host("AMS", "r1").await.unwrap();
    assert_eq!((host.status, host.kind), (1, EventKind::Host));
    assert_eq!(host.event_output, "PING WARN");
    assert_eq!(host.giskleur, 1);
}

#[tokio::test]
async fn test_state_change_patches_only_changed_fields() {
    let harness = harness_with_host(EventLayout::None).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "disk /var").state(1, "DISK 85%").build()).await;
    harness.reset();

    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "disk /var").state(2, "DISK 97%").build()).await;
    let event_writes = harness.store.writes_for("AMS_r1_disk var");
    assert_eq!(
        event_writes,
        vec![StoreWrite::UpdateEvent { key: "AMS_r1_disk var".into(), fields: vec!["output", "eventstate"] }]
    );
}

#[tokio::test]
async fn test_single_layer_updates_event_feature_in_place() {
    let harness = harness_with_host(EventLayout::Single { layer: "5".into() }).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 10%").build()).await;
    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!((stored.object_id, stored.layer.as_deref()), (Some(2), Some("5")));
    harness.reset();

    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(1, "CPU 85%").build()).await;
    harness.assert_remote_calls(Op::Delete, 0).unwrap();
    let event_update = harness
        .features
        .calls_of(Op::Update)
        .into_iter()
        .find(|c| c.layer() == "5")
        .unwrap();
    let attributes = event_update.attributes().unwrap();
    assert_eq!(attributes["objectid"], 2);
    assert_eq!(attributes["eventstate"], 1);
    assert_eq!(attributes["output"], "CPU 85%");
    assert!(!attributes.contains_key("sitename"));
}

#[tokio::test]
async fn test_severity_class_change_deletes_then_adds() {
    let harness = harness_with_host(by_severity()).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 10%").build()).await;
    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!((stored.object_id, stored.layer.as_deref()), (Some(2), Some("10")));
    harness.reset();

    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;

    let calls = harness.features.calls();
    assert_eq!(calls[0], FeatureCall::Delete { layer: "10".into(), object_id: 2 });
    assert_eq!(calls[1].op(), Op::Add);
    assert_eq!(calls[1].layer(), "12");

    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!((stored.object_id, stored.layer.as_deref()), (Some(3), Some("12")));
    assert_eq!(stored.eventstate, 2);
}

#[tokio::test]
async fn test_failed_add_after_delete_clears_feature_reference() {
    let harness = harness_with_host(by_severity()).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 10%").build()).await;
    harness.reset();
    harness.features.refuse_next(Op::Add);

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    assert!(matches!(outcome, Outcome::Failed(_)));

    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!(stored.object_id, None);
    assert_eq!(stored.layer, None);
    assert_eq!(stored.eventstate, 2);
}

#[tokio::test]
async fn test_failed_delete_writes_nothing_for_event() {
    let harness = harness_with_host(by_severity()).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 10%").build()).await;
    harness.reset();
    harness.features.refuse_next(Op::Delete);

    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    assert!(harness.store.writes_for("AMS_r1_cpu").is_empty());
    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!((stored.object_id, stored.eventstate), (Some(2), 0));
}

#[tokio::test]
async fn test_closed_event_of_previous_generation_is_recreated() {
    let harness = harness_with_host(EventLayout::None).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 10%").build()).await;
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").decommissioned().build()).await;
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").build()).await;
    harness.reset();

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(0, "CPU 12%").build()).await;
    assert_eq!(outcome, Outcome::Created);
    let stored = harness.event("AMS", "r1", "cpu").await.unwrap();
    assert_eq!(stored.endtime, None);
    assert_eq!(stored.output, "CPU 12%");
}

#[tokio::test]
async fn test_transition_of_host_without_feature_reference_fails() {
    let harness = TestHarness::new();
    let host = HostPayload::from_value(HostPayloadBuilder::new("AMS", "r1").build()).unwrap().normalize().unwrap();
    harness.store.seed_host(HostRecord::initial(&host, "Initial display", 0)).await.unwrap();

    let outcome = harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").state(2, "CPU 99%").build()).await;
    assert!(matches!(&outcome, Outcome::Failed(msg) if msg.contains("objectId")));

    // l'event est enregistré, le host garde son état faute de feature à fermer
    assert!(harness.features.calls().is_empty());
    assert_eq!(harness.store_writes(), vec![StoreWrite::PutEvent { key: "AMS_r1_cpu".into() }]);
    let stored = harness.host("AMS", "r1").await.unwrap();
    assert_eq!((stored.status, stored.kind), (0, EventKind::Host));
}
