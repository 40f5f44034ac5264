use super::{DocumentStore, EventPatch, HostPatch, StoreError};
use crate::models::{EventKey, EventRecord, HostKey, HostRecord};
use crate::state::{new_state, Shared};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub type HostsMap = BTreeMap<String, HostRecord>;
pub type EventsMap = BTreeMap<String, EventRecord>;

/// Store en mémoire ; sert de cache au `JsonFileStore`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    hosts: Shared<HostsMap>,
    events: Shared<EventsMap>,
    archive: Shared<HostsMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(hosts: HostsMap, events: EventsMap, archive: HostsMap) -> Self {
        Self {
            hosts: new_state(hosts),
            events: new_state(events),
            archive: new_state(archive),
        }
    }

    pub fn hosts_snapshot(&self) -> HostsMap {
        self.hosts.lock().clone()
    }

    pub fn events_snapshot(&self) -> EventsMap {
        self.events.lock().clone()
    }

    pub fn archive_snapshot(&self) -> HostsMap {
        self.archive.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_host(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError> {
        Ok(self.hosts.lock().get(key.as_str()).cloned())
    }

    async fn put_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.hosts.lock().insert(record.key().to_string(), record.clone());
        Ok(())
    }

    async fn update_host(&self, key: &HostKey, patch: &HostPatch) -> Result<(), StoreError> {
        let mut hosts = self.hosts.lock();
        let record = hosts
            .get_mut(key.as_str())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        patch.apply(record);
        Ok(())
    }

    async fn archive_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.archive
            .lock()
            .insert(record.key().archived(record.generation), record.clone());
        Ok(())
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self.hosts.lock().values().cloned().collect())
    }

    async fn get_event(&self, key: &EventKey) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.events.lock().get(key.as_str()).cloned())
    }

    async fn put_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.events.lock().insert(record.key().to_string(), record.clone());
        Ok(())
    }

    async fn update_event(&self, key: &EventKey, patch: &EventPatch) -> Result<(), StoreError> {
        let mut events = self.events.lock();
        let record = events
            .get_mut(key.as_str())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        patch.apply(record);
        Ok(())
    }

    async fn events_for_host(&self, key: &HostKey) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .events
            .lock()
            .values()
            .filter(|e| e.host_key() == *key)
            .cloned()
            .collect())
    }

    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.events.lock().values().cloned().collect())
    }
}
