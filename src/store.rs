//! The record store seam.
//!
//! A [`RecordStore`] is a minimal key-value sink over machine-assigned
//! 32-bit ids. The database backend keeps metadata records in one store and
//! opaque file chunks in another; it never assumes anything about placement
//! beyond the four basic operations plus enumeration at open time.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Minimal persistent record sink with machine-assigned ids.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Stores a new record and returns its assigned id.
    async fn set(&self, data: &[u8]) -> io::Result<u32>;

    /// Fetches a record by id.
    async fn get(&self, id: u32) -> io::Result<Vec<u8>>;

    /// Overwrites an existing record in place.
    async fn update(&self, id: u32, data: &[u8]) -> io::Result<()>;

    /// Removes a record.
    async fn delete(&self, id: u32) -> io::Result<()>;

    /// Enumerates all live record ids, in no particular order.
    async fn ids(&self) -> io::Result<Vec<u32>>;
}

/// In-memory [`RecordStore`] used by tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    next_id: u32,
    records: HashMap<u32, Vec<u8>>,
}

impl Default for MemoryInner {
    fn default() -> Self {
        MemoryInner { next_id: 1, records: HashMap::new() }
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn missing(id: u32) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no record {id}"))
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn set(&self, data: &[u8]) -> io::Result<u32> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(id, data.to_vec());
        Ok(id)
    }

    async fn get(&self, id: u32) -> io::Result<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.records.get(&id).cloned().ok_or_else(|| missing(id))
    }

    async fn update(&self, id: u32, data: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(missing(id)),
        }
    }

    async fn delete(&self, id: u32) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.records.remove(&id).map(|_| ()).ok_or_else(|| missing(id))
    }

    async fn ids(&self) -> io::Result<Vec<u32>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.keys().copied().collect())
    }
}
