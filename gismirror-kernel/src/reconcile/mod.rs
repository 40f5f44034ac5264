/**
 * RÉCONCILIATION - Moteur hosts / events vers la couche SIG
 *
 * RÔLE :
 * Pour chaque entrée d'un lot (host ou event), décider si une feature
 * distante doit être créée, mise à jour ou close, puis refléter le résultat
 * dans le store documentaire.
 *
 * FONCTIONNEMENT :
 * - Entrées traitées séquentiellement, chacune isolée : une erreur ou un
 *   panic n'interrompt jamais le lot
 * - Séquence lecture / diff / écriture sérialisée par clé host via
 *   `KeyedLocks` (un host et ses events partagent le même verrou)
 * - Appel distant d'abord, écriture store seulement si l'appel a réussi
 *   (sauf fermeture d'un host décommissionné)
 * - Chaque entrée tient le côté lecture de `sweep_gate` ; le balayage des
 *   orphelins tient le côté écriture et ne voit donc jamais une entrée en cours
 */

mod events;
mod hosts;

use crate::config::{EventLayout, KernelConfig};
use crate::envelope::Batch;
use crate::featureservice::{EditResult, FeatureError, FeatureService};
use crate::health::HealthTracker;
use crate::models::{HostKey, ValidationError};
use crate::state::KeyedLocks;
use crate::store::{DocumentStore, StoreError};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("host {0} is not active")]
    HostNotActive(HostKey),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("{operation} refused by feature service: {message}")]
    Refused { operation: &'static str, message: String },
    #[error("{0} carries no objectId")]
    MissingObjectId(String),
}

impl ReconcileError {
    /// Entrée refusée en amont de toute écriture (journalisée en info)
    pub fn is_rejection(&self) -> bool {
        matches!(self, ReconcileError::Validation(_) | ReconcileError::HostNotActive(_))
    }
}

/// Issue d'une entrée de lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Closed,
    Unchanged,
    Rejected(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub hosts_layer: String,
    pub events: EventLayout,
    pub initial_output: String,
}

impl From<&KernelConfig> for ReconcileSettings {
    fn from(cfg: &KernelConfig) -> Self {
        Self {
            hosts_layer: cfg.layers.hosts.clone(),
            events: cfg.layers.events.clone(),
            initial_output: cfg.initial_output.0.clone(),
        }
    }
}

#[derive(Clone, Copy)]
enum EntryKind {
    Host,
    Event,
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    features: Arc<dyn FeatureService>,
    settings: ReconcileSettings,
    locks: KeyedLocks,
    sweep_gate: RwLock<()>,
    health: HealthTracker,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        features: Arc<dyn FeatureService>,
        settings: ReconcileSettings,
        health: HealthTracker,
    ) -> Self {
        Self { store, features, settings, locks: KeyedLocks::new(), sweep_gate: RwLock::new(()), health }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn features(&self) -> &Arc<dyn FeatureService> {
        &self.features
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Attend la fin des entrées en cours et bloque les suivantes tant que le guard vit
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.sweep_gate.write().await
    }

    pub async fn process_batch(&self, batch: Batch) -> BatchReport {
        let batch_id = Uuid::new_v4().to_string();
        let (kind, entries) = match batch {
            Batch::Hosts(entries) => (EntryKind::Host, entries),
            Batch::Events(entries) => (EntryKind::Event, entries),
            Batch::Unknown(subscription) => {
                info!(batch = %batch_id, "ignoring batch from unknown subscription {subscription}");
                return BatchReport { batch_id, entries: Vec::new() };
            }
        };

        info!(batch = %batch_id, "processing {} entries", entries.len());
        let mut reports = Vec::with_capacity(entries.len());
        for (index, raw) in entries.into_iter().enumerate() {
            let key = entry_label(&raw, kind).unwrap_or_else(|| format!("#{index}"));
            let outcome = self.process_entry(kind, &key, raw, &batch_id).await;
            match &outcome {
                Outcome::Created | Outcome::Updated | Outcome::Closed => self.health.record_applied(),
                Outcome::Unchanged => self.health.record_unchanged(),
                Outcome::Rejected(_) => self.health.record_rejected(),
                Outcome::Failed(_) => self.health.record_failed(),
            }
            reports.push(EntryReport { key, outcome });
        }
        self.health.record_batch();

        BatchReport { batch_id, entries: reports }
    }

    async fn process_entry(&self, kind: EntryKind, key: &str, raw: Value, batch_id: &str) -> Outcome {
        let _shared = self.sweep_gate.read().await;
        let payload = raw.clone();
        let work = async move {
            match kind {
                EntryKind::Host => self.reconcile_host(payload).await,
                EntryKind::Event => self.reconcile_event(payload).await,
            }
        };

        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_rejection() => {
                info!(batch = %batch_id, entry = %key, "entry rejected: {e}");
                Outcome::Rejected(e.to_string())
            }
            Ok(Err(e)) => {
                error!(batch = %batch_id, entry = %key, payload = %raw, "entry failed: {e}");
                Outcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(batch = %batch_id, entry = %key, payload = %raw, "entry panicked: {message}");
                Outcome::Failed(format!("panic: {message}"))
            }
        }
    }
}

/// Clé lisible d'une entrée brute pour les logs
fn entry_label(raw: &Value, kind: EntryKind) -> Option<String> {
    let site = raw.get("sitename")?.as_str()?;
    let host = raw.get("hostname")?.as_str()?;
    Some(match kind {
        EntryKind::Host => HostKey::new(site, host).to_string(),
        EntryKind::Event => {
            let service = raw.get("service_description").and_then(Value::as_str).unwrap_or_default();
            crate::models::EventKey::new(site, host, service).to_string()
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Résultat distant accepté, sinon `Refused`
fn accepted(result: EditResult, operation: &'static str) -> Result<EditResult, ReconcileError> {
    if result.success {
        Ok(result)
    } else {
        Err(ReconcileError::Refused {
            operation,
            message: result.error.unwrap_or_else(|| "no error detail".into()),
        })
    }
}

/// Appel distant réduit à succès / message d'échec (fan-out sans interruption)
fn remote_outcome(result: Result<EditResult, FeatureError>, operation: &'static str) -> Result<(), String> {
    result
        .map_err(ReconcileError::from)
        .and_then(|r| accepted(r, operation))
        .map(|_| ())
        .map_err(|e| e.to_string())
}
