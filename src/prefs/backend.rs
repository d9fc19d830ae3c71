//! Persistent key-value backends behind the preference store.
//!
//! Values are opaque JSON strings. Every successful write or delete is
//! announced on a broadcast channel so stores in other contexts sharing the
//! same backend can re-resolve.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub(crate) fn change_channel() -> broadcast::Sender<StorageChange> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

/// Process-local backend. Used by tests and as the fallback when no
/// on-disk store can be opened. Can be switched into a failing mode to
/// exercise the store's degraded path.
pub struct MemoryBackend {
    records: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    failing: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            changes: change_channel(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory backend is in failing mode");
        }
        Ok(())
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn announce(&self, key: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.records().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check()?;
        self.records().insert(key.to_string(), value);
        self.announce(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        let existed = self.records().remove(key).is_some();
        if existed {
            self.announce(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
