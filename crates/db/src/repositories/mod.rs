use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod snapshot;

pub use memory::InMemorySnapshotStore;
pub use snapshot::{SnapshotInfo, SqlSnapshotStore};

/// Devices, ledger and revision, stored together.
pub const INVENTORY_SNAPSHOT: &str = "inventory";
/// Conversation id -> message log.
pub const CONVERSATIONS_SNAPSHOT: &str = "conversations";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Whole-state persistence: every save replaces the named payload.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<Value>, RepositoryError>;
    async fn save(&self, name: &str, payload: &Value) -> Result<(), RepositoryError>;
}

pub async fn load_typed<T>(store: &dyn SnapshotStore, name: &str) -> Result<Option<T>, RepositoryError>
where
    T: DeserializeOwned,
{
    match store.load(name).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|error| RepositoryError::Decode(format!("snapshot `{name}`: {error}"))),
        None => Ok(None),
    }
}

pub async fn save_typed<T>(
    store: &dyn SnapshotStore,
    name: &str,
    value: &T,
) -> Result<(), RepositoryError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_value(value)
        .map_err(|error| RepositoryError::Decode(format!("snapshot `{name}`: {error}")))?;
    store.save(name, &payload).await
}
