//! Persistence seam for saved connections.
//!
//! Durable storage is an external collaborator. The core only needs a
//! key-value interface keyed by connection id, and ships an in-memory
//! implementation for the CLI and tests.

use crate::models::DatabaseKind;
use crate::security::EncryptedBlob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque saved-connection identifier.
pub type ConnectionId = Uuid;

/// One saved connection: non-secret metadata plus the encrypted descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConnection {
    /// Connection id
    pub id: ConnectionId,
    /// Display name, if one was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Backend family, kept outside the blob for listing
    pub kind: DatabaseKind,
    /// Encrypted descriptor
    pub blob: EncryptedBlob,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl StoredConnection {
    /// New record with a fresh v4 id and the current time.
    pub fn new(name: Option<String>, kind: DatabaseKind, blob: EncryptedBlob) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            kind,
            blob,
            created_at: Utc::now(),
        }
    }
}

/// Key-value store of saved connections.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Looks up a record by id.
    ///
    /// # Errors
    /// Returns a store error if the backing storage fails.
    async fn get(&self, id: ConnectionId) -> crate::Result<Option<StoredConnection>>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    /// Returns a store error if the backing storage fails.
    async fn put(&self, record: StoredConnection) -> crate::Result<()>;

    /// Deletes a record, returning whether it existed.
    ///
    /// # Errors
    /// Returns a store error if the backing storage fails.
    async fn remove(&self, id: ConnectionId) -> crate::Result<bool>;

    /// Ids of all records, oldest first.
    ///
    /// # Errors
    /// Returns a store error if the backing storage fails.
    async fn list(&self) -> crate::Result<Vec<ConnectionId>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    records: RwLock<HashMap<ConnectionId, StoredConnection>>,
}

impl InMemoryConnectionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = StoredConnection>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get(&self, id: ConnectionId) -> crate::Result<Option<StoredConnection>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn put(&self, record: StoredConnection) -> crate::Result<()> {
        self.records.write().await.insert(record.id, record);
        Ok(())
    }

    async fn remove(&self, id: ConnectionId) -> crate::Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> crate::Result<Vec<ConnectionId>> {
        let records = self.records.read().await;
        let mut entries: Vec<(&DateTime<Utc>, ConnectionId)> =
            records.values().map(|r| (&r.created_at, r.id)).collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }
}
