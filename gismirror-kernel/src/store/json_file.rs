/**
 * STORE JSON - Persistance fichier des collections hosts / events
 *
 * FONCTIONNEMENT :
 * - Un fichier JSON par collection dans `data_dir` (hosts.json, events.json,
 *   hosts_archive.json), chargé au démarrage dans un `MemoryStore`
 * - Chaque écriture met à jour le cache puis réécrit le fichier concerné
 *   (fichier temporaire + rename)
 * - Un verrou d'écriture garantit que les fichiers sont réécrits dans l'ordre
 *   des mutations
 */

use super::memory::{EventsMap, HostsMap};
use super::{DocumentStore, EventPatch, HostPatch, MemoryStore, StoreError};
use crate::models::{EventKey, EventRecord, HostKey, HostRecord};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const HOSTS_FILE: &str = "hosts.json";
const EVENTS_FILE: &str = "events.json";
const ARCHIVE_FILE: &str = "hosts_archive.json";

#[derive(Clone, Copy)]
enum Collection {
    Hosts,
    Events,
    Archive,
}

pub struct JsonFileStore {
    data_dir: PathBuf,
    cache: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Ouvre (ou crée) le store dans `data_dir`
    pub async fn open<P: Into<PathBuf>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;

        let hosts: HostsMap = load_collection(&data_dir.join(HOSTS_FILE)).await?;
        let events: EventsMap = load_collection(&data_dir.join(EVENTS_FILE)).await?;
        let archive: HostsMap = load_collection(&data_dir.join(ARCHIVE_FILE)).await?;

        info!(
            "store opened at {:?}: {} hosts, {} events, {} archived",
            data_dir,
            hosts.len(),
            events.len(),
            archive.len()
        );

        Ok(Self {
            data_dir,
            cache: MemoryStore::from_parts(hosts, events, archive),
            write_lock: Mutex::new(()),
        })
    }

    async fn flush(&self, collection: Collection) -> Result<(), StoreError> {
        let (file, content) = match collection {
            Collection::Hosts => (HOSTS_FILE, serde_json::to_string_pretty(&self.cache.hosts_snapshot())?),
            Collection::Events => (EVENTS_FILE, serde_json::to_string_pretty(&self.cache.events_snapshot())?),
            Collection::Archive => (ARCHIVE_FILE, serde_json::to_string_pretty(&self.cache.archive_snapshot())?),
        };

        let path = self.data_dir.join(file);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("flushed {:?}", path);
        Ok(())
    }
}

async fn load_collection<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !fs::try_exists(path).await? {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get_host(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError> {
        self.cache.get_host(key).await
    }

    async fn put_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.cache.put_host(record).await?;
        self.flush(Collection::Hosts).await
    }

    async fn update_host(&self, key: &HostKey, patch: &HostPatch) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.cache.update_host(key, patch).await?;
        self.flush(Collection::Hosts).await
    }

    async fn archive_host(&self, record: &HostRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.cache.archive_host(record).await?;
        self.flush(Collection::Archive).await
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.cache.list_hosts().await
    }

    async fn get_event(&self, key: &EventKey) -> Result<Option<EventRecord>, StoreError> {
        self.cache.get_event(key).await
    }

    async fn put_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.cache.put_event(record).await?;
        self.flush(Collection::Events).await
    }

    async fn update_event(&self, key: &EventKey, patch: &EventPatch) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.cache.update_event(key, patch).await?;
        self.flush(Collection::Events).await
    }

    async fn events_for_host(&self, key: &HostKey) -> Result<Vec<EventRecord>, StoreError> {
        self.cache.events_for_host(key).await
    }

    async fn list_events(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.cache.list_events().await
    }
}
