//! Balayage des features orphelines : ouvertes côté SIG mais plus
//! référencées par aucun enregistrement ouvert du store (ajout distant
//! réussi suivi d'une écriture store perdue, par exemple).

use crate::featureservice::Attributes;
use crate::models::{now_ms, ENDTIME_FIELD, OBJECT_ID_FIELD};
use crate::reconcile::{ReconcileError, Reconciler};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// objectIds fermés, par couche
    pub closed: BTreeMap<String, Vec<i64>>,
    pub failed: BTreeMap<String, Vec<i64>>,
}

impl SweepReport {
    pub fn closed_count(&self) -> usize {
        self.closed.values().map(Vec::len).sum()
    }
}

pub async fn sweep_orphans(reconciler: &Reconciler) -> Result<SweepReport, ReconcileError> {
    let store = reconciler.store();
    let features = reconciler.features();
    let settings = reconciler.settings();

    // aucune entrée ne peut créer de feature pendant le balayage
    let _exclusive = reconciler.exclusive().await;

    let mut layers = vec![settings.hosts_layer.as_str()];
    layers.extend(settings.events.layers());
    layers.sort_unstable();
    layers.dedup();

    // features ouvertes côté SIG d'abord, store ensuite
    let mut open = Vec::with_capacity(layers.len());
    for layer in layers {
        open.push((layer, features.open_object_ids(layer).await?));
    }

    // objectIds référencés par des enregistrements ouverts, par couche
    let mut referenced: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for host in store.list_hosts().await? {
        if let (Some(id), None) = (host.object_id, host.endtime) {
            referenced.entry(settings.hosts_layer.clone()).or_default().insert(id);
        }
    }
    for event in store.list_events().await? {
        if let (Some(id), Some(layer), true) = (event.object_id, event.layer.clone(), event.is_open()) {
            referenced.entry(layer).or_default().insert(id);
        }
    }

    let mut report = SweepReport::default();
    let endtime = now_ms();
    for (layer, open) in open {
        let known = referenced.get(layer);
        let orphans: Vec<i64> = open
            .into_iter()
            .filter(|id| !known.is_some_and(|k| k.contains(id)))
            .collect();

        for object_id in orphans {
            let mut attributes = Attributes::new();
            attributes.insert(OBJECT_ID_FIELD.into(), Value::from(object_id));
            attributes.insert(ENDTIME_FIELD.into(), Value::from(endtime));
            match features.update_attributes(attributes, layer).await {
                Ok(result) if result.success => {
                    report.closed.entry(layer.to_string()).or_default().push(object_id);
                }
                Ok(result) => {
                    warn!("orphan {object_id} on layer {layer} not closed: {:?}", result.error);
                    report.failed.entry(layer.to_string()).or_default().push(object_id);
                }
                Err(e) => {
                    error!("orphan {object_id} on layer {layer} not closed: {e}");
                    report.failed.entry(layer.to_string()).or_default().push(object_id);
                }
            }
        }
    }

    reconciler.health().record_orphans_closed(report.closed_count() as u64);
    info!("sweep done: {} orphans closed", report.closed_count());
    Ok(report)
}

/// Balayage périodique ; `interval_secs == 0` désactive la tâche
pub fn spawn_sweeper(reconciler: Arc<Reconciler>, interval_secs: u64) {
    if interval_secs == 0 {
        info!("orphan sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // le premier tick est immédiat
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sweep_orphans(&reconciler).await {
                error!("orphan sweep failed: {e}");
            }
        }
    });
}
