/**
 * STORE DOCUMENTAIRE - Enregistrement canonique des hosts et events
 *
 * RÔLE :
 * Ce module définit l'interface unique d'accès aux collections "hosts",
 * "events" et "hosts_archive". Les réconciliateurs ne voient que ce trait.
 *
 * FONCTIONNEMENT :
 * - DocumentStore = lecture/écriture par clé, pas de transaction ni de verrou
 * - HostPatch / EventPatch = écritures partielles (seuls les champs présents
 *   sont écrits), pour que chaque écriture reste minimale
 * - MemoryStore (dev, tests) et JsonFileStore (un fichier JSON par collection)
 *
 * La sérialisation par clé est assurée en amont par `state::KeyedLocks`.
 */

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::models::{
    EventKey, EventKind, EventRecord, HostKey, HostRecord, NormalizedEvent, TrackedField,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Erreurs possibles lors des accès au store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_host(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError>;

    /// Écrit l'enregistrement complet (création ou remplacement)
    async fn put_host(&self, record: &HostRecord) -> Result<(), StoreError>;

    /// Écrit uniquement les champs présents dans `patch`; `NotFound` si la clé est absente
    async fn update_host(&self, key: &HostKey, patch: &HostPatch) -> Result<(), StoreError>;

    /// Range une génération terminée sous `"{key}@{generation}"`
    async fn archive_host(&self, record: &HostRecord) -> Result<(), StoreError>;

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError>;

    async fn get_event(&self, key: &EventKey) -> Result<Option<EventRecord>, StoreError>;

    async fn put_event(&self, record: &EventRecord) -> Result<(), StoreError>;

    async fn update_event(&self, key: &EventKey, patch: &EventPatch) -> Result<(), StoreError>;

    /// Tous les events (ouverts ou clos) rattachés au host
    async fn events_for_host(&self, key: &HostKey) -> Result<Vec<EventRecord>, StoreError>;

    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError>;
}

/// Écriture partielle d'un enregistrement host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostPatch {
    pub tracked: BTreeMap<TrackedField, Option<String>>,
    pub status: Option<i64>,
    pub kind: Option<EventKind>,
    pub giskleur: Option<i64>,
    pub event_output: Option<String>,
    pub starttime: Option<i64>,
    pub endtime: Option<i64>,
    pub object_id: Option<i64>,
    pub decommissioned: Option<bool>,
}

impl HostPatch {
    /// Noms (côté store) des champs écrits par ce patch
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tracked.keys().map(|f| f.store_name()).collect();
        let optional = [
            ("status", self.status.is_some()),
            ("type", self.kind.is_some()),
            ("giskleur", self.giskleur.is_some()),
            ("event_output", self.event_output.is_some()),
            ("starttime", self.starttime.is_some()),
            ("endtime", self.endtime.is_some()),
            ("objectId", self.object_id.is_some()),
            ("decommissioned", self.decommissioned.is_some()),
        ];
        names.extend(optional.iter().filter(|(_, set)| *set).map(|(name, _)| *name));
        names
    }

    pub fn apply(&self, record: &mut HostRecord) {
        for (field, value) in &self.tracked {
            record.attributes.set(*field, value.clone());
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(kind) = self.kind {
            record.kind = kind;
        }
        if let Some(giskleur) = self.giskleur {
            record.giskleur = giskleur;
        }
        if let Some(output) = &self.event_output {
            record.event_output = output.clone();
        }
        if let Some(starttime) = self.starttime {
            record.starttime = starttime;
        }
        if let Some(endtime) = self.endtime {
            record.endtime = Some(endtime);
        }
        if let Some(object_id) = self.object_id {
            record.object_id = Some(object_id);
        }
        if let Some(decommissioned) = self.decommissioned {
            record.decommissioned = decommissioned;
        }
    }
}

/// Écriture partielle d'un enregistrement event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub statetype: Option<Value>,
    pub output: Option<String>,
    pub longoutput: Option<String>,
    pub eventstate: Option<i64>,
    pub timestamp: Option<i64>,
    /// `Some(None)` efface la référence vers la feature distante
    pub object_id: Option<Option<i64>>,
    pub layer: Option<Option<String>>,
    pub endtime: Option<i64>,
}

impl EventPatch {
    /// Champs de `incoming` qui diffèrent de l'enregistrement stocké
    pub fn between(stored: &EventRecord, incoming: &NormalizedEvent) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            (old != new).then(|| new.clone())
        }

        Self {
            id: changed(&stored.id, &incoming.id),
            kind: changed(&stored.kind, &incoming.kind),
            statetype: changed(&stored.statetype, &incoming.statetype),
            output: changed(&stored.output, &incoming.output),
            longoutput: changed(&stored.longoutput, &incoming.longoutput),
            eventstate: changed(&stored.eventstate, &incoming.eventstate),
            timestamp: changed(&stored.timestamp, &incoming.timestamp),
            ..Self::default()
        }
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        [
            ("id", self.id.is_some()),
            ("type", self.kind.is_some()),
            ("statetype", self.statetype.is_some()),
            ("output", self.output.is_some()),
            ("longoutput", self.longoutput.is_some()),
            ("eventstate", self.eventstate.is_some()),
            ("timestamp", self.timestamp.is_some()),
            ("objectId", self.object_id.is_some()),
            ("layer", self.layer.is_some()),
            ("endtime", self.endtime.is_some()),
        ]
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect()
    }

    pub fn apply(&self, record: &mut EventRecord) {
        if let Some(id) = &self.id {
            record.id = id.clone();
        }
        if let Some(kind) = &self.kind {
            record.kind = kind.clone();
        }
        if let Some(statetype) = &self.statetype {
            record.statetype = statetype.clone();
        }
        if let Some(output) = &self.output {
            record.output = output.clone();
        }
        if let Some(longoutput) = &self.longoutput {
            record.longoutput = longoutput.clone();
        }
        if let Some(eventstate) = self.eventstate {
            record.eventstate = eventstate;
        }
        if let Some(timestamp) = self.timestamp {
            record.timestamp = timestamp;
        }
        if let Some(object_id) = self.object_id {
            record.object_id = object_id;
        }
        if let Some(layer) = &self.layer {
            record.layer = layer.clone();
        }
        if let Some(endtime) = self.endtime {
            record.endtime = Some(endtime);
        }
    }
}
