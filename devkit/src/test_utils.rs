/*!
Test Harness pour le moteur de réconciliation

Facilite l'écriture de tests avec:
- Un `Reconciler` monté sur `MockFeatureService` + `RecordingStore`
- L'envoi de lots host / event comme le ferait le point d'entrée push
- Des assertions sur les appels distants et les écritures store
*/

use crate::feature_stub::{MockFeatureService, Op};
use crate::recording_store::{RecordingStore, StoreWrite};
use anyhow::Result;
use gismirror_kernel::config::EventLayout;
use gismirror_kernel::envelope::Batch;
use gismirror_kernel::health::HealthTracker;
use gismirror_kernel::models::{EventKey, EventRecord, HostKey, HostRecord};
use gismirror_kernel::reconcile::{BatchReport, Outcome, ReconcileSettings, Reconciler};
use gismirror_kernel::store::DocumentStore;
use serde_json::Value;
use std::sync::Arc;

pub const HOSTS_LAYER: &str = "0";

/// Harness de test complet
pub struct TestHarness {
    pub features: MockFeatureService,
    pub store: RecordingStore,
    pub reconciler: Arc<Reconciler>,
}

impl TestHarness {
    /// Events conservés dans le store uniquement
    pub fn new() -> Self {
        Self::with_layout(EventLayout::None)
    }

    pub fn with_layout(events: EventLayout) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let features = MockFeatureService::new();
        let store = RecordingStore::new();
        let settings = ReconcileSettings {
            hosts_layer: HOSTS_LAYER.into(),
            events,
            initial_output: "Initial display".into(),
        };
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(features.clone()),
            settings,
            HealthTracker::new(),
        ));
        Self { features, store, reconciler }
    }

    pub async fn send_hosts(&self, hosts: Vec<Value>) -> BatchReport {
        self.reconciler.process_batch(Batch::Hosts(hosts)).await
    }

    pub async fn send_events(&self, events: Vec<Value>) -> BatchReport {
        self.reconciler.process_batch(Batch::Events(events)).await
    }

    /// Envoie un host seul et rend son issue
    pub async fn send_host(&self, host: Value) -> Outcome {
        single(self.send_hosts(vec![host]).await)
    }

    pub async fn send_event(&self, event: Value) -> Outcome {
        single(self.send_events(vec![event]).await)
    }

    pub async fn host(&self, sitename: &str, hostname: &str) -> Option<HostRecord> {
        self.store.get_host(&HostKey::new(sitename, hostname)).await.ok().flatten()
    }

    pub async fn event(&self, sitename: &str, hostname: &str, service: &str) -> Option<EventRecord> {
        self.store.get_event(&EventKey::new(sitename, hostname, service)).await.ok().flatten()
    }

    /// Oublie les appels et écritures déjà enregistrés (l'état du store est conservé)
    pub fn reset(&self) {
        self.features.clear();
        self.store.clear();
        log::info!("🧹 Test harness reset");
    }

    /// Aucun appel de mutation distant ni écriture store depuis le dernier reset
    pub fn assert_quiet(&self) -> Result<()> {
        let mutations = self.features.mutation_count();
        let writes = self.store.write_count();
        if mutations != 0 || writes != 0 {
            anyhow::bail!(
                "expected no side effects, got {} remote mutations {:?} and {} store writes {:?}",
                mutations,
                self.features.calls(),
                writes,
                self.store.writes()
            );
        }
        Ok(())
    }

    pub fn assert_remote_calls(&self, op: Op, expected: usize) -> Result<()> {
        let actual = self.features.count(op);
        if actual != expected {
            anyhow::bail!("expected {expected} {op:?} calls, got {actual}: {:?}", self.features.calls());
        }
        Ok(())
    }

    pub fn store_writes(&self) -> Vec<StoreWrite> {
        self.store.writes()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn single(report: BatchReport) -> Outcome {
    report
        .entries
        .into_iter()
        .next()
        .map(|e| e.outcome)
        .unwrap_or_else(|| Outcome::Failed("empty batch report".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::HostPayloadBuilder;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let harness = TestHarness::new();

        let outcome = harness.send_host(HostPayloadBuilder::new("AMS", "r1").build()).await;
        assert_eq!(outcome, Outcome::Created);
        harness.assert_remote_calls(Op::Add, 1).unwrap();
        assert_eq!(harness.store_writes(), vec![StoreWrite::PutHost { key: "AMS_r1".into() }]);

        harness.reset();
        harness.assert_quiet().unwrap();
        assert_eq!(harness.host("AMS", "r1").await.unwrap().object_id, Some(1));
    }
}
