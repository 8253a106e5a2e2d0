use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use rentdesk_core::config::AppConfig;
use rentdesk_core::{ApplicationError, ChatMessage, ConversationEntry, ConversationLog};
use rentdesk_db::{load_typed, save_typed, SnapshotStore, CONVERSATIONS_SNAPSHOT};

use crate::service::InventoryService;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextSettings {
    pub system_prompt: String,
    /// Turns handed to the model after the pinned entries; `None` sends all.
    pub history_window: Option<usize>,
    pub history_warn_entries: usize,
}

impl ContextSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.assistant.system_prompt.clone(),
            history_window: config.assistant.history_window,
            history_warn_entries: config.assistant.history_warn_entries,
        }
    }
}

/// Per-conversation message logs. Reads the inventory to render snapshots but
/// never mutates it.
pub struct ConversationManager {
    logs: Mutex<BTreeMap<String, ConversationLog>>,
    store: Arc<dyn SnapshotStore>,
    inventory: Arc<InventoryService>,
    settings: ContextSettings,
}

impl ConversationManager {
    pub async fn load(
        store: Arc<dyn SnapshotStore>,
        inventory: Arc<InventoryService>,
        settings: ContextSettings,
    ) -> Result<Self, ApplicationError> {
        let logs: Option<BTreeMap<String, ConversationLog>> =
            load_typed(store.as_ref(), CONVERSATIONS_SNAPSHOT)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let mut logs = logs.unwrap_or_default();
        for log in logs.values_mut() {
            log.ensure_seeded(&settings.system_prompt);
        }

        tracing::info!(
            event_name = "conversation.state.loaded",
            conversations = logs.len(),
            "conversation logs loaded"
        );
        Ok(Self { logs: Mutex::new(logs), store, inventory, settings })
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub async fn conversation_count(&self) -> usize {
        self.logs.lock().await.len()
    }

    pub async fn log(&self, conversation_id: &str) -> Option<ConversationLog> {
        self.logs.lock().await.get(conversation_id).cloned()
    }

    pub async fn append_user_turn(
        &self,
        conversation_id: &str,
        text: &str,
        display_name: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let entry = ConversationEntry::user(text, display_name.map(str::to_owned));
        self.update(conversation_id, |log| {
            log.push(entry);
            true
        })
        .await
        .map(|_| ())
    }

    pub async fn append_assistant_turn(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), ApplicationError> {
        let entry = ConversationEntry::assistant(text);
        self.update(conversation_id, |log| {
            log.push(entry);
            true
        })
        .await
        .map(|_| ())
    }

    /// Refreshes the inventory snapshot when it is missing, duplicated or
    /// stale, then returns the role/content list for the model.
    pub async fn prepare_for_completion(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, ApplicationError> {
        let (summary, revision) = self.inventory.render_summary().await;
        let window = self.settings.history_window;

        self.update(conversation_id, |log| {
            let snapshots =
                log.entries().iter().filter(|entry| entry.is_inventory_snapshot()).count();
            if log.snapshot_revision() == Some(revision) && snapshots == 1 {
                return false;
            }
            log.install_snapshot(summary, revision);
            tracing::debug!(
                event_name = "conversation.snapshot.refreshed",
                conversation_id,
                revision,
                "inventory snapshot refreshed"
            );
            true
        })
        .await
        .map(|log| log.to_messages(window))
    }

    /// Drops the log; the next message starts from a fresh instruction entry.
    pub async fn reset(&self, conversation_id: &str) -> Result<(), ApplicationError> {
        let mut logs = self.logs.lock().await;
        let Some(previous) = logs.remove(conversation_id) else {
            return Ok(());
        };

        if let Err(error) = save_typed(self.store.as_ref(), CONVERSATIONS_SNAPSHOT, &*logs).await {
            logs.insert(conversation_id.to_owned(), previous);
            return Err(persistence_failure(conversation_id, error));
        }
        tracing::info!(event_name = "conversation.reset", conversation_id, "conversation reset");
        Ok(())
    }

    pub async fn participants(&self, conversation_id: &str) -> BTreeSet<String> {
        self.logs
            .lock()
            .await
            .get(conversation_id)
            .map(ConversationLog::participants)
            .unwrap_or_default()
    }

    /// Removes `user`'s entries from the conversation; returns how many went.
    pub async fn forget_user(
        &self,
        conversation_id: &str,
        user: &str,
    ) -> Result<usize, ApplicationError> {
        let mut removed = 0;
        let exists = self.logs.lock().await.contains_key(conversation_id);
        if !exists {
            return Ok(0);
        }
        self.update(conversation_id, |log| {
            removed = log.forget_user(user);
            removed > 0
        })
        .await?;
        Ok(removed)
    }

    /// Applies `change` to one log (seeding it on first use) and persists all
    /// logs when `change` reports a modification. On a failed save the log is
    /// restored to its previous content.
    async fn update(
        &self,
        conversation_id: &str,
        change: impl FnOnce(&mut ConversationLog) -> bool,
    ) -> Result<ConversationLog, ApplicationError> {
        let mut logs = self.logs.lock().await;
        let previous = logs.get(conversation_id).cloned();
        let log = logs
            .entry(conversation_id.to_owned())
            .or_insert_with(|| ConversationLog::seeded(self.settings.system_prompt.as_str()));

        let changed = change(log) || previous.is_none();
        let updated = log.clone();
        if !changed {
            return Ok(updated);
        }

        if let Err(error) = save_typed(self.store.as_ref(), CONVERSATIONS_SNAPSHOT, &*logs).await {
            match previous {
                Some(previous) => {
                    logs.insert(conversation_id.to_owned(), previous);
                }
                None => {
                    logs.remove(conversation_id);
                }
            }
            return Err(persistence_failure(conversation_id, error));
        }

        if updated.len() > self.settings.history_warn_entries {
            tracing::warn!(
                event_name = "conversation.history.large",
                conversation_id,
                entries = updated.len(),
                threshold = self.settings.history_warn_entries,
                "conversation log keeps growing; consider history_window"
            );
        }
        Ok(updated)
    }
}

fn persistence_failure(conversation_id: &str, error: rentdesk_db::RepositoryError) -> ApplicationError {
    tracing::error!(
        event_name = "conversation.persist_failed",
        conversation_id,
        error = %error,
        "conversation logs not persisted"
    );
    ApplicationError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rentdesk_core::{ConversationLog, DeviceId, Role};
    use rentdesk_db::{load_typed, InMemorySnapshotStore, CONVERSATIONS_SNAPSHOT};

    use super::{ContextSettings, ConversationManager};
    use crate::service::InventoryService;

    struct Fixture {
        manager: ConversationManager,
        inventory: Arc<InventoryService>,
        store: Arc<InMemorySnapshotStore>,
    }

    async fn fixture(window: Option<usize>) -> Fixture {
        let store = Arc::new(InMemorySnapshotStore::new());
        let inventory = Arc::new(InventoryService::load(store.clone()).await.expect("inventory"));
        let settings = ContextSettings {
            system_prompt: "You are ChatGPT, a helpful assistant.".to_owned(),
            history_window: window,
            history_warn_entries: 200,
        };
        let manager = ConversationManager::load(store.clone(), inventory.clone(), settings)
            .await
            .expect("manager");
        Fixture { manager, inventory, store }
    }

    #[tokio::test]
    async fn first_turn_seeds_instruction_and_snapshot() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("42", "bot ơi chào", Some("alice")).await.expect("append");
        let messages = fx.manager.prepare_for_completion("42").await.expect("prepare");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are ChatGPT, a helpful assistant.");
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].content, "Kho thiết bị hiện đang trống.");
        assert_eq!(messages[2].content, "bot ơi chào");
    }

    #[tokio::test]
    async fn repeated_prepare_keeps_one_snapshot() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("42", "hello", Some("alice")).await.expect("append");
        fx.manager.prepare_for_completion("42").await.expect("first");
        let saves = fx.store.save_count();
        fx.manager.prepare_for_completion("42").await.expect("second");

        let log = fx.manager.log("42").await.expect("log");
        let snapshots = log.entries().iter().filter(|entry| entry.is_inventory_snapshot()).count();
        assert_eq!(snapshots, 1);
        assert!(log.entries()[1].is_inventory_snapshot());
        assert_eq!(fx.store.save_count(), saves, "no-op refresh is not persisted");
    }

    #[tokio::test]
    async fn inventory_change_replaces_snapshot_in_place() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("42", "hello", Some("alice")).await.expect("append");
        fx.manager.prepare_for_completion("42").await.expect("first");

        fx.inventory
            .mutate("add", |state| state.upsert_device(DeviceId::new("CAM"), "Máy ảnh", Some(2)))
            .await
            .expect("add");
        fx.manager.append_user_turn("42", "còn máy ảnh không", Some("bob")).await.expect("append");
        let messages = fx.manager.prepare_for_completion("42").await.expect("second");

        assert_eq!(messages.len(), 4);
        assert!(messages[1].content.contains("CAM: Máy ảnh"));
        let log = fx.manager.log("42").await.expect("log");
        assert_eq!(log.snapshot_revision(), Some(1));
    }

    #[tokio::test]
    async fn window_limits_model_input_but_not_stored_log() {
        let fx = fixture(Some(2)).await;
        for index in 0..4 {
            fx.manager.append_user_turn("7", &format!("q{index}"), Some("alice")).await.expect("user");
            fx.manager.append_assistant_turn("7", &format!("a{index}")).await.expect("assistant");
        }
        let messages = fx.manager.prepare_for_completion("7").await.expect("prepare");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].content, "q3");
        assert_eq!(messages[3].content, "a3");
        assert_eq!(fx.manager.log("7").await.expect("log").len(), 10);
    }

    #[tokio::test]
    async fn participants_forget_and_reset() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("1", "hi", Some("alice")).await.expect("append");
        fx.manager.append_user_turn("1", "yo", Some("bob")).await.expect("append");
        fx.manager.append_user_turn("1", "again", Some("alice")).await.expect("append");

        let participants = fx.manager.participants("1").await;
        assert_eq!(participants.into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);

        assert_eq!(fx.manager.forget_user("1", "alice").await.expect("forget"), 2);
        assert_eq!(fx.manager.forget_user("missing", "alice").await.expect("forget"), 0);
        let log = fx.manager.log("1").await.expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].role, Role::System);

        fx.manager.reset("1").await.expect("reset");
        assert!(fx.manager.log("1").await.is_none());
        let persisted: BTreeMap<String, ConversationLog> = load_typed(fx.store.as_ref(), CONVERSATIONS_SNAPSHOT)
            .await
            .expect("load")
            .expect("present");
        assert!(!persisted.contains_key("1"));
    }

    #[tokio::test]
    async fn failed_save_rolls_back_the_turn() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("9", "first", Some("alice")).await.expect("append");
        fx.store.set_fail_saves(true);

        assert!(fx.manager.append_user_turn("9", "second", Some("alice")).await.is_err());
        let log = fx.manager.log("9").await.expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].content, "first");
    }

    #[tokio::test]
    async fn logs_survive_reload() {
        let fx = fixture(None).await;
        fx.manager.append_user_turn("5", "ghi nhớ", Some("carol")).await.expect("append");

        let settings = fx.manager.settings().clone();
        let reloaded = ConversationManager::load(fx.store.clone(), fx.inventory.clone(), settings)
            .await
            .expect("reload");
        assert_eq!(reloaded.log("5").await, fx.manager.log("5").await);
    }
}
