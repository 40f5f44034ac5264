/*!
Store enregistreur : un `MemoryStore` qui trace chaque écriture

Les lectures passent directement au store sous-jacent ; chaque écriture
(put / update / archive) est enregistrée avec les champs écrits, pour
vérifier qu'une écriture est minimale ou qu'aucune n'a eu lieu.
*/

use async_trait::async_trait;
use gismirror_kernel::models::{EventKey, EventRecord, HostKey, HostRecord};
use gismirror_kernel::store::{DocumentStore, EventPatch, HostPatch, MemoryStore, StoreError};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    PutHost { key: String },
    UpdateHost { key: String, fields: Vec<&'static str> },
    ArchiveHost { key: String },
    PutEvent { key: String },
    UpdateEvent { key: String, fields: Vec<&'static str> },
}

impl StoreWrite {
    pub fn key(&self) -> &str {
        match self {
            StoreWrite::PutHost { key }
            | StoreWrite::UpdateHost { key, .. }
            | StoreWrite::ArchiveHost { key }
            | StoreWrite::PutEvent { key }
            | StoreWrite::UpdateEvent { key, .. } => key,
        }
    }

    /// Champs écrits ; `None` pour une écriture complète
    pub fn fields(&self) -> Option<&[&'static str]> {
        match self {
            StoreWrite::UpdateHost { fields, .. } | StoreWrite::UpdateEvent { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Arc<Mutex<Vec<StoreWrite>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store sous-jacent, pour l'amorçage sans enregistrement
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Écrit un host directement dans le store sous-jacent, sans trace
    pub async fn seed_host(&self, record: HostRecord) -> Result<(), StoreError> {
        self.inner.put_host(&record).await
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_for(&self, key: &str) -> Vec<StoreWrite> {
        self.writes().into_iter().filter(|w| w.key() == key).collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn record(&self, write: StoreWrite) {
        log::info!("[STORE] {write:?}");
        self.writes.lock().unwrap().push(write);
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn get_host(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError> {
        self.inner.get_host(key).await
    }

    async fn put_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.inner.put_host(record).await?;
        self.record(StoreWrite::PutHost { key: record.key().to_string() });
        Ok(())
    }

    async fn update_host(&self, key: &HostKey, patch: &HostPatch) -> Result<(), StoreError> {
        self.inner.update_host(key, patch).await?;
        self.record(StoreWrite::UpdateHost { key: key.to_string(), fields: patch.field_names() });
        Ok(())
    }

    async fn archive_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.inner.archive_host(record).await?;
        self.record(StoreWrite::ArchiveHost { key: record.key().archived(record.generation) });
        Ok(())
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.inner.list_hosts().await
    }

    async fn get_event(&self, key: &EventKey) -> Result<Option<EventRecord>, StoreError> {
        self.inner.get_event(key).await
    }

    async fn put_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.inner.put_event(record).await?;
        self.record(StoreWrite::PutEvent { key: record.key().to_string() });
        Ok(())
    }

    async fn update_event(&self, key: &EventKey, patch: &EventPatch) -> Result<(), StoreError> {
        self.inner.update_event(key, patch).await?;
        self.record(StoreWrite::UpdateEvent { key: key.to_string(), fields: patch.field_names() });
        Ok(())
    }

    async fn events_for_host(&self, key: &HostKey) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.events_for_host(key).await
    }

    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.list_events().await
    }
}
