use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Verrous asynchrones indexés par clé.
///
/// Sérialise la séquence lecture → diff → écriture d'une même clé host entre
/// lots concurrents. Les entrées host et event d'un même host partagent la clé.
/// Un slot que plus personne ne tient ni n'attend est retiré au prochain `lock`.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Shared<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attend le verrou de `key`; il est relâché quand le guard est droppé.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            // seule la map référence encore ces slots
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    pub fn tracked_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let order = new_state(Vec::new());

        let guard = locks.lock("site_host").await;

        let locks2 = locks.clone();
        let order2 = order.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.lock("site_host").await;
            order2.lock().push("second");
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().push("first");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = KeyedLocks::new();
        drop(locks.lock("AMS_r1").await);
        drop(locks.lock("AMS_r2").await);

        let held = locks.lock("AMS_r3").await;
        assert_eq!(locks.tracked_keys(), 1);

        // un slot tenu n'est jamais retiré
        drop(locks.lock("AMS_r4").await);
        assert_eq!(locks.tracked_keys(), 2);
        drop(held);
    }
}
