//! In-memory stand-ins for the store and cold-storage seams, always compiled
//! so integration-style tests (and local experiments) can use them without a
//! database or an object store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::archiver::{ObjectStore, ObjectStoreError};
use crate::event::SessionEvent;
use crate::store::{EventWriter, StoreError};

/// Keeps the first-seen row per `event_id`, mirroring the database's
/// `ON CONFLICT (event_id) DO NOTHING` behavior.
#[derive(Default)]
pub struct MemoryEventWriter {
    rows: Mutex<HashMap<String, SessionEvent>>,
    fail_next: AtomicUsize,
}

impl MemoryEventWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `batch_insert` fail wholesale, the way a
    /// connectivity loss would.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn row(&self, event_id: &str) -> Option<SessionEvent> {
        self.rows.lock().unwrap().get(event_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl EventWriter for MemoryEventWriter {
    async fn batch_insert(&self, events: &[SessionEvent]) -> Result<Vec<i64>, StoreError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut rows = self.rows.lock().unwrap();
        let results = events
            .iter()
            .map(|event| {
                if rows.contains_key(&event.event_id) {
                    0
                } else {
                    rows.insert(event.event_id.clone(), event.clone());
                    1
                }
            })
            .collect();
        Ok(results)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: String,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<StoredObject>>,
    fail_next: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn puts(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_string(
        &self,
        bucket: &str,
        key: &str,
        body: String,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ObjectStoreError::PutFailed("simulated outage".to_string()));
        }

        self.objects.lock().unwrap().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}
