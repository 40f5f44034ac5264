use super::{accepted, remote_outcome, Outcome, ReconcileError, Reconciler};
use crate::featureservice::Attributes;
use crate::models::{
    HostLifecycle, HostPayload, HostRecord, NormalizedHost, ENDTIME_FIELD, OBJECT_ID_FIELD,
};
use crate::store::{EventPatch, HostPatch};
use serde_json::Value;
use tracing::{error, info, warn};

impl Reconciler {
    /// Réconcilie un payload host avec l'enregistrement stocké.
    pub async fn reconcile_host(&self, raw: Value) -> Result<Outcome, ReconcileError> {
        let host = HostPayload::from_value(raw)?.normalize()?;
        let _guard = self.locks.lock(host.key.as_str()).await;

        let stored = self.store.get_host(&host.key).await?;
        match (HostLifecycle::of(stored.as_ref()), stored, host.decommissioned) {
            (HostLifecycle::Absent, _, true) => {
                info!("decommission received for unknown host {}, ignored", host.key);
                Ok(Outcome::Unchanged)
            }
            (HostLifecycle::Absent, _, false) => self.create_host(&host, None).await,
            (HostLifecycle::Active, Some(record), false) => self.update_host(&host, &record).await,
            (HostLifecycle::Active, Some(record), true) => self.decommission_host(&host, &record).await,
            (HostLifecycle::Decommissioned, _, true) => {
                info!("host {} already decommissioned", host.key);
                Ok(Outcome::Unchanged)
            }
            (HostLifecycle::Decommissioned, Some(record), false) => {
                info!(
                    "host {} reappears after decommission, starting generation {}",
                    host.key,
                    record.generation + 1
                );
                self.create_host(&host, Some(&record)).await
            }
            // Active/Decommissioned implique un enregistrement
            (_, None, _) => Ok(Outcome::Unchanged),
        }
    }

    /// ABSENT -> ACTIVE, ou nouvelle génération quand `previous` est fourni
    async fn create_host(
        &self,
        host: &NormalizedHost,
        previous: Option<&HostRecord>,
    ) -> Result<Outcome, ReconcileError> {
        let generation = previous.map(|p| p.generation + 1).unwrap_or(0);
        let mut record = HostRecord::initial(host, &self.settings.initial_output, generation);

        let result = self
            .features
            .add(host.point, record.feature_attributes(), &self.settings.hosts_layer)
            .await?;
        let result = accepted(result, "add host feature")?;
        let object_id = result
            .object_id
            .ok_or_else(|| ReconcileError::MissingObjectId(format!("add result for {}", host.key)))?;
        record.object_id = Some(object_id);

        if let Some(previous) = previous {
            self.store.archive_host(previous).await?;
        }
        self.store.put_host(&record).await?;
        info!("host {} added as feature {object_id}", host.key);
        Ok(Outcome::Created)
    }

    /// ACTIVE -> ACTIVE : seuls les attributs suivis qui diffèrent sont envoyés et écrits
    async fn update_host(&self, host: &NormalizedHost, stored: &HostRecord) -> Result<Outcome, ReconcileError> {
        let changes = stored.attributes.changes(&host.attributes);
        if changes.is_empty() {
            info!("host {} unchanged", host.key);
            return Ok(Outcome::Unchanged);
        }
        let object_id = stored
            .object_id
            .ok_or_else(|| ReconcileError::MissingObjectId(host.key.to_string()))?;

        let mut attributes = Attributes::new();
        attributes.insert(OBJECT_ID_FIELD.into(), Value::from(object_id));
        for (field, value) in &changes {
            attributes.insert(
                field.remote_name().into(),
                value.clone().map(Value::from).unwrap_or(Value::Null),
            );
        }

        let result = self
            .features
            .update(stored.point(), attributes, &self.settings.hosts_layer)
            .await?;
        accepted(result, "update host feature")?;

        let patch = HostPatch { tracked: changes, ..HostPatch::default() };
        self.store.update_host(&host.key, &patch).await?;
        info!("host {} updated: {:?}", host.key, patch.field_names());
        Ok(Outcome::Updated)
    }

    /// ACTIVE -> DECOMMISSIONED : ferme la feature host puis chaque event ouvert.
    /// Les écritures `endtime` ont lieu quel que soit le résultat distant.
    async fn decommission_host(&self, host: &NormalizedHost, stored: &HostRecord) -> Result<Outcome, ReconcileError> {
        let endtime = host.timestamp;

        match stored.object_id {
            Some(object_id) => {
                let result = self
                    .features
                    .update(stored.point(), closing_attributes(object_id, endtime), &self.settings.hosts_layer)
                    .await;
                if let Err(e) = remote_outcome(result, "close host feature") {
                    error!("host {}: {e}", host.key);
                }
            }
            None => warn!("host {} has no feature to close", host.key),
        }

        let patch = HostPatch { endtime: Some(endtime), decommissioned: Some(true), ..HostPatch::default() };
        self.store.update_host(&host.key, &patch).await?;

        let open_events: Vec<_> = self
            .store
            .events_for_host(&host.key)
            .await?
            .into_iter()
            .filter(|e| e.is_open())
            .collect();

        let mut failures = 0usize;
        for event in &open_events {
            if let (Some(object_id), Some(layer)) = (event.object_id, event.layer.as_deref()) {
                let result = self
                    .features
                    .update(stored.point(), closing_attributes(object_id, endtime), layer)
                    .await;
                if let Err(e) = remote_outcome(result, "close event feature") {
                    error!("event {}: {e}", event.key());
                    failures += 1;
                }
            }

            let patch = EventPatch { endtime: Some(endtime), ..EventPatch::default() };
            if let Err(e) = self.store.update_event(&event.key(), &patch).await {
                error!("event {}: endtime not written: {e}", event.key());
                failures += 1;
            }
        }

        info!(
            "host {} decommissioned, {} open events closed ({} failures)",
            host.key,
            open_events.len(),
            failures
        );
        Ok(Outcome::Closed)
    }
}

pub(super) fn closing_attributes(object_id: i64, endtime: i64) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(OBJECT_ID_FIELD.into(), Value::from(object_id));
    attributes.insert(ENDTIME_FIELD.into(), Value::from(endtime));
    attributes
}
