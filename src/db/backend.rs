use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::Database;
use crate::prefs::backend::{change_channel, StorageBackend, StorageChange};

/// `StorageBackend` over the SQLite worker. Change notifications cover
/// writes made through this handle; contexts that share it (clones of the
/// same `Arc`) all observe each other's writes.
pub struct SqliteBackend {
    db: Database,
    changes: broadcast::Sender<StorageChange>,
}

impl SqliteBackend {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn new(db: Database) -> Self {
        Self {
            db,
            changes: change_channel(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn announce(&self, key: &str) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .get_record(key.to_string())
            .await?
            .map(|record| record.value))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.db.upsert_record(key.to_string(), value).await?;
        self.announce(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.db.delete_record(key.to_string()).await? {
            self.announce(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.sqlite3");
        {
            let backend = SqliteBackend::open(path.clone()).unwrap();
            let mut changes = backend.subscribe();
            backend.set("app:config", "{}".into()).await.unwrap();
            assert_eq!(changes.recv().await.unwrap().key, "app:config");
        }

        let reopened = SqliteBackend::open(path).unwrap();
        assert_eq!(
            reopened.get("app:config").await.unwrap().as_deref(),
            Some("{}")
        );
    }
}
