use std::sync::Arc;
use std::time::Duration;

use rentdesk_agent::{
    AddressGate, AgentRuntime, ClassifierError, CompletionSettings, ContextSettings,
    ConversationManager, IntentClassifier, InventoryService, LlmError, OpenAiCompatibleClient,
};
use rentdesk_chat::{runtime_dispatcher, PollingRunner, ReconnectPolicy, TelegramTransport, TransportError};
use rentdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use rentdesk_core::ApplicationError;
use rentdesk_db::{connect_with_settings, migrations, DbPool, SqlSnapshotStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub inventory: Arc<InventoryService>,
    pub agent_runtime: Arc<AgentRuntime>,
    pub chat_runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("persisted state could not be loaded: {0}")]
    State(#[source] ApplicationError),
    #[error("intent rules failed to compile: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("completion client could not be built: {0}")]
    Completion(#[from] LlmError),
    #[error("chat transport could not be built: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlSnapshotStore::new(db_pool.clone()));
    let inventory = Arc::new(InventoryService::load(store.clone()).await.map_err(BootstrapError::State)?);
    let conversations = Arc::new(
        ConversationManager::load(store, inventory.clone(), ContextSettings::from_config(&config))
            .await
            .map_err(BootstrapError::State)?,
    );
    info!(
        event_name = "system.bootstrap.state_loaded",
        correlation_id = "bootstrap",
        inventory_revision = inventory.revision().await,
        conversations = conversations.conversation_count().await,
        "persisted state loaded"
    );

    let classifier = IntentClassifier::new(AddressGate::new(&config.assistant.trigger_words))?;
    let llm = Arc::new(OpenAiCompatibleClient::new(CompletionSettings::from_config(&config))?);
    let agent_runtime = Arc::new(
        AgentRuntime::new(
            classifier,
            inventory.clone(),
            conversations,
            llm.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )
        .with_vision(llm),
    );

    let transport = Arc::new(TelegramTransport::new(&config.telegram)?);
    let chat_runner = PollingRunner::new(
        transport.clone(),
        runtime_dispatcher(agent_runtime.clone(), transport),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, db_pool, inventory, agent_runtime, chat_runner })
}

#[cfg(test)]
mod tests {
    use rentdesk_agent::{InboundMessage, ReplyRoute};
    use rentdesk_agent::{AddressContext, IntentKind};
    use rentdesk_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(token: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                telegram_bot_token: Some(token.to_string()),
                llm_api_key: Some("sk-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_with_malformed_bot_token() {
        let result = bootstrap(overrides("not-a-token")).await;

        assert!(result.is_err());
        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("telegram.bot_token"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_wires_inventory_commands_end_to_end() {
        let app = bootstrap(overrides("123456:test-secret"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'state_snapshot'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("snapshot table should exist after bootstrap");
        assert_eq!(table_count, 1);

        let message = |text: &str| InboundMessage {
            conversation_id: "-100".to_owned(),
            sender: "alice".to_owned(),
            text: text.to_owned(),
            context: AddressContext::default(),
            bot_username: None,
            correlation_id: "bootstrap-test".to_owned(),
        };

        let added = app.agent_runtime.handle_message(&message("thêm CAM Máy ảnh, 2")).await.expect("reply");
        assert_eq!(added.route, ReplyRoute::Command(IntentKind::AddOrUpdateDevice));
        let rented = app.agent_runtime.handle_message(&message("thuê CAM")).await.expect("reply");
        assert!(rented.text.contains("Kho còn: 1"), "{}", rented.text);

        let (stored,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM state_snapshot WHERE name = 'inventory'")
                .fetch_one(&app.db_pool)
                .await
                .expect("inventory snapshot row");
        assert_eq!(stored, 1, "every committed mutation is written through");
        assert_eq!(app.inventory.revision().await, 2);

        app.db_pool.close().await;
    }
}
