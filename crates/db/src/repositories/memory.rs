use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{RepositoryError, SnapshotStore};

/// Snapshot store for tests and ephemeral runs. Saves can be switched to fail
/// so callers can exercise their persistence-failure paths.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Value>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, name: &str) -> Result<Option<Value>, RepositoryError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(name).cloned())
    }

    async fn save(&self, name: &str, payload: &Value) -> Result<(), RepositoryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(format!("save of `{name}` rejected")));
        }
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(name.to_owned(), payload.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
