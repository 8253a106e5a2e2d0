use std::sync::Arc;

use tokio::sync::Mutex;

use rentdesk_core::{ApplicationError, DomainError, InventoryState};
use rentdesk_db::{load_typed, save_typed, SnapshotStore, INVENTORY_SNAPSHOT};

/// Result of a mutation that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed<R> {
    pub value: R,
    /// Inventory revision after the mutation.
    pub revision: u64,
    /// False when the operation left the state as it was; nothing was saved.
    pub changed: bool,
}

/// Owns the shared inventory. Every mutation from every conversation goes
/// through one lock, runs against a draft, and is persisted before the draft
/// replaces the live state.
pub struct InventoryService {
    state: Mutex<InventoryState>,
    store: Arc<dyn SnapshotStore>,
}

impl InventoryService {
    pub async fn load(store: Arc<dyn SnapshotStore>) -> Result<Self, ApplicationError> {
        let state: Option<InventoryState> = load_typed(store.as_ref(), INVENTORY_SNAPSHOT)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let state = state.unwrap_or_default();
        state.check_invariants()?;

        tracing::info!(
            event_name = "inventory.state.loaded",
            devices = state.devices.len(),
            revision = state.revision,
            "inventory loaded"
        );
        Ok(Self::with_state(state, store))
    }

    pub fn with_state(state: InventoryState, store: Arc<dyn SnapshotStore>) -> Self {
        Self { state: Mutex::new(state), store }
    }

    pub async fn read<R>(&self, read: impl FnOnce(&InventoryState) -> R) -> R {
        let state = self.state.lock().await;
        read(&state)
    }

    pub async fn revision(&self) -> u64 {
        self.state.lock().await.revision
    }

    /// Summary text and the revision it was rendered from, read under one lock.
    pub async fn render_summary(&self) -> (String, u64) {
        let state = self.state.lock().await;
        (state.render_summary(), state.revision)
    }

    pub async fn mutate<R>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut InventoryState) -> Result<R, DomainError>,
    ) -> Result<Committed<R>, ApplicationError> {
        let mut live = self.state.lock().await;
        let mut draft = live.clone();

        let value = match apply(&mut draft) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(
                    event_name = "inventory.mutation.rejected",
                    operation,
                    reason = %error,
                    "inventory mutation rejected"
                );
                return Err(error.into());
            }
        };

        if draft == *live {
            return Ok(Committed { value, revision: live.revision, changed: false });
        }

        draft.revision = live.revision + 1;
        draft.check_invariants()?;
        if let Err(error) = save_typed(self.store.as_ref(), INVENTORY_SNAPSHOT, &draft).await {
            tracing::error!(
                event_name = "inventory.mutation.persist_failed",
                operation,
                error = %error,
                "inventory mutation not persisted, state left unchanged"
            );
            return Err(ApplicationError::Persistence(error.to_string()));
        }

        let revision = draft.revision;
        *live = draft;
        tracing::info!(
            event_name = "inventory.mutation.committed",
            operation,
            revision,
            "inventory mutation committed"
        );
        Ok(Committed { value, revision, changed: true })
    }
}
