use async_trait::async_trait;
use gismirror_devkit::{EventPayloadBuilder, FeatureCall, HostPayloadBuilder, MockFeatureService, Op, TestHarness};
use gismirror_kernel::config::EventLayout;
use gismirror_kernel::envelope::Batch;
use gismirror_kernel::featureservice::{Attributes, EditResult, FeatureError, FeatureService};
use gismirror_kernel::health::HealthTracker;
use gismirror_kernel::models::{HostKey, Point};
use gismirror_kernel::reconcile::{ReconcileSettings, Reconciler};
use gismirror_kernel::store::{DocumentStore, MemoryStore};
use gismirror_kernel::sweep::sweep_orphans;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_sweep_closes_only_unreferenced_features() {
    let harness = TestHarness::with_layout(EventLayout::Single { layer: "5".into() });
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").build()).await;
    harness.send_event(EventPayloadBuilder::new("AMS", "r1", "cpu").build()).await;
    harness.reset();

    // 1 = host, 2 = event cpu ; 40 et 41 ne sont référencés nulle part
    harness.features.set_open_features("0", vec![1, 40]).set_open_features("5", vec![2, 41]);

    let report = sweep_orphans(&harness.reconciler).await.unwrap();
    assert_eq!(report.closed["0"], vec![40]);
    assert_eq!(report.closed["5"], vec![41]);
    assert!(report.failed.is_empty());

    let updates = harness.features.calls_of(Op::Update);
    assert_eq!(updates.len(), 2);
    for call in &updates {
        // la géométrie de l'orphelin n'est pas touchée
        assert!(matches!(call, FeatureCall::Update { point: None, .. }));
        assert!(call.attributes().unwrap().contains_key("endtime"));
    }
    assert_eq!(harness.store.write_count(), 0);
    assert_eq!(harness.reconciler.health().get_health().orphans_closed, 2);
}

#[tokio::test]
async fn test_closed_records_do_not_protect_their_features() {
    let harness = TestHarness::new();
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").build()).await;
    harness.send_host(HostPayloadBuilder::new("AMS", "r1").decommissioned().build()).await;
    harness.reset();

    // la feature 1 est restée ouverte côté SIG malgré le décommissionnement
    harness.features.set_open_features("0", vec![1]);
    harness.features.refuse_next(Op::Update);

    let report = sweep_orphans(&harness.reconciler).await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(report.failed["0"], vec![1]);
}

/// Feature service dont la requête des features ouvertes reste suspendue
/// jusqu'à `release`, puis rend les objectIds ajoutés jusque-là.
#[derive(Clone, Default)]
struct SlowListing {
    inner: MockFeatureService,
    added: Arc<Mutex<Vec<i64>>>,
    listing: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl FeatureService for SlowListing {
    async fn add(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        let result = self.inner.add(point, attributes, layer).await?;
        if let Some(id) = result.object_id {
            self.added.lock().unwrap().push(id);
        }
        Ok(result)
    }

    async fn update(&self, point: Point, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.inner.update(point, attributes, layer).await
    }

    async fn update_attributes(&self, attributes: Attributes, layer: &str) -> Result<EditResult, FeatureError> {
        self.inner.update_attributes(attributes, layer).await
    }

    async fn delete(&self, object_id: i64, layer: &str) -> Result<EditResult, FeatureError> {
        self.inner.delete(object_id, layer).await
    }

    async fn open_object_ids(&self, _: &str) -> Result<Vec<i64>, FeatureError> {
        self.listing.notify_one();
        self.release.notified().await;
        Ok(self.added.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn test_host_created_during_sweep_keeps_its_feature() {
    let features = SlowListing::default();
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::new(features.clone()),
        ReconcileSettings { hosts_layer: "0".into(), events: EventLayout::None, initial_output: "Initial display".into() },
        HealthTracker::new(),
    ));

    let sweeper = reconciler.clone();
    let sweep = tokio::spawn(async move { sweep_orphans(&sweeper).await });
    features.listing.notified().await;

    let creator = reconciler.clone();
    let batch = tokio::spawn(async move {
        creator.process_batch(Batch::Hosts(vec![HostPayloadBuilder::new("AMS", "r1").build()])).await
    });

    // la création attend la fin du balayage
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!batch.is_finished());
    features.release.notify_one();

    let report = sweep.await.unwrap().unwrap();
    batch.await.unwrap();
    assert!(report.closed.is_empty());

    let host = store.get_host(&HostKey::new("AMS", "r1")).await.unwrap().unwrap();
    assert_eq!(host.object_id, Some(1));
    assert_eq!(host.endtime, None);
    assert!(features.inner.calls_of(Op::Update).is_empty());
}
