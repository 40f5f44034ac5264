use super::hosts::closing_attributes;
use super::{accepted, Outcome, ReconcileError, Reconciler};
use crate::aggregator::dominant_state;
use crate::featureservice::Attributes;
use crate::models::{
    giskleur, EventPayload, EventRecord, HostLifecycle, HostRecord, NormalizedEvent, OBJECT_ID_FIELD,
};
use crate::store::{EventPatch, HostPatch};
use serde_json::Value;
use tracing::info;

impl Reconciler {
    /// Réconcilie un payload event, puis recalcule l'état dominant du host.
    pub async fn reconcile_event(&self, raw: Value) -> Result<Outcome, ReconcileError> {
        let payload = EventPayload::from_value(raw)?;
        let host_key = payload.host_key();
        let _guard = self.locks.lock(host_key.as_str()).await;

        let host = match self.store.get_host(&host_key).await? {
            Some(record) if record.lifecycle() == HostLifecycle::Active => record,
            _ => return Err(ReconcileError::HostNotActive(host_key)),
        };
        let event = payload.normalize()?;

        // Un event clos (génération précédente) est traité comme absent
        let stored = self.store.get_event(&event.key).await?.filter(EventRecord::is_open);
        let event_step = match stored {
            None => self.create_event(&event, &host).await,
            Some(stored) if stored.eventstate != event.eventstate => {
                self.update_event(&event, &stored, &host).await
            }
            Some(_) => {
                info!("event {} unchanged (state {})", event.key, event.eventstate);
                Ok(Outcome::Unchanged)
            }
        };

        let host_step = self.refresh_host_state(&event, &host).await;

        match (event_step, host_step) {
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(Outcome::Unchanged), Ok(true)) => Ok(Outcome::Updated),
            (Ok(outcome), Ok(_)) => Ok(outcome),
        }
    }

    async fn create_event(&self, event: &NormalizedEvent, host: &HostRecord) -> Result<Outcome, ReconcileError> {
        let mut record = EventRecord::from_event(event);

        if let Some(layer) = self.settings.events.layer_for(event.eventstate) {
            record.object_id = Some(self.add_event_feature(&record, host, layer).await?);
            record.layer = Some(layer.to_string());
        }

        self.store.put_event(&record).await?;
        info!("event {} created (state {})", event.key, event.eventstate);
        Ok(Outcome::Created)
    }

    async fn update_event(
        &self,
        event: &NormalizedEvent,
        stored: &EventRecord,
        host: &HostRecord,
    ) -> Result<Outcome, ReconcileError> {
        let mut patch = EventPatch::between(stored, event);
        let mut updated = stored.clone();
        patch.apply(&mut updated);
        let target = self.settings.events.layer_for(event.eventstate);

        match (stored.object_id, stored.layer.as_deref(), target) {
            // même couche : mise à jour en place
            (Some(object_id), Some(current), Some(target)) if current == target => {
                let attributes = changed_remote_attributes(&updated, &patch, object_id);
                let result = self.features.update(host.point(), attributes, target).await?;
                accepted(result, "update event feature")?;
            }
            // changement de classe de sévérité : delete puis add
            (Some(object_id), Some(current), target) => {
                let result = self.features.delete(object_id, current).await?;
                accepted(result, "delete event feature")?;
                patch.object_id = Some(None);
                patch.layer = Some(None);

                if let Some(target) = target {
                    match self.add_event_feature(&updated, host, target).await {
                        Ok(new_id) => {
                            patch.object_id = Some(Some(new_id));
                            patch.layer = Some(Some(target.to_string()));
                        }
                        Err(e) => {
                            // l'ancienne feature n'existe plus, sa référence est effacée
                            self.store.update_event(&event.key, &patch).await?;
                            return Err(e);
                        }
                    }
                }
            }
            // pas encore de feature pour cet event
            (_, _, Some(target)) => {
                let new_id = self.add_event_feature(&updated, host, target).await?;
                patch.object_id = Some(Some(new_id));
                patch.layer = Some(Some(target.to_string()));
            }
            (_, _, None) => {}
        }

        self.store.update_event(&event.key, &patch).await?;
        info!("event {} updated: {:?}", event.key, patch.field_names());
        Ok(Outcome::Updated)
    }

    async fn add_event_feature(
        &self,
        record: &EventRecord,
        host: &HostRecord,
        layer: &str,
    ) -> Result<i64, ReconcileError> {
        let result = self.features.add(host.point(), record.feature_attributes(), layer).await?;
        accepted(result, "add event feature")?
            .object_id
            .ok_or_else(|| ReconcileError::MissingObjectId(format!("add result for {}", record.key())))
    }

    /// Recalcule l'état dominant du host ; `true` si une transition a été appliquée.
    ///
    /// Transition = fermeture de la feature host courante (endtime = horodatage
    /// de l'event) puis ajout d'une nouvelle feature portant le nouvel état.
    async fn refresh_host_state(&self, event: &NormalizedEvent, host: &HostRecord) -> Result<bool, ReconcileError> {
        let current: Vec<EventRecord> = self
            .store
            .events_for_host(&event.host_key)
            .await?
            .into_iter()
            .filter(EventRecord::is_open)
            .collect();
        let dominant = dominant_state(&current);

        if dominant.status == host.status && dominant.kind == host.kind {
            info!("host {} keeps state {} ({})", event.host_key, host.status, host.kind.as_str());
            return Ok(false);
        }

        let object_id = host
            .object_id
            .ok_or_else(|| ReconcileError::MissingObjectId(event.host_key.to_string()))?;
        let layer = &self.settings.hosts_layer;

        let result = self
            .features
            .update(host.point(), closing_attributes(object_id, event.timestamp), layer)
            .await?;
        accepted(result, "close host feature")?;

        let mut next = host.clone();
        next.status = dominant.status;
        next.kind = dominant.kind;
        next.giskleur = giskleur(dominant.status, dominant.kind);
        next.event_output = dominant.output;
        next.starttime = event.timestamp;

        let result = self.features.add(host.point(), next.feature_attributes(), layer).await?;
        let new_id = accepted(result, "add host feature")?
            .object_id
            .ok_or_else(|| ReconcileError::MissingObjectId(format!("add result for {}", event.host_key)))?;

        let patch = HostPatch {
            object_id: Some(new_id),
            status: Some(next.status),
            kind: Some(next.kind),
            giskleur: Some(next.giskleur),
            event_output: Some(next.event_output.clone()),
            starttime: Some(next.starttime),
            ..HostPatch::default()
        };
        self.store.update_host(&event.host_key, &patch).await?;
        info!(
            "host {} now {} {} (feature {new_id})",
            event.host_key,
            next.kind.as_str(),
            next.status
        );
        Ok(true)
    }
}

/// `objectid` + attributs distants des seuls champs modifiés
fn changed_remote_attributes(updated: &EventRecord, patch: &EventPatch, object_id: i64) -> Attributes {
    let full = updated.feature_attributes();
    let mut attributes = Attributes::new();
    attributes.insert(OBJECT_ID_FIELD.into(), Value::from(object_id));
    for name in patch.field_names() {
        let remote = if name == "timestamp" { "starttime" } else { name };
        if let Some(value) = full.get(remote) {
            attributes.insert(remote.into(), value.clone());
        }
    }
    attributes
}
