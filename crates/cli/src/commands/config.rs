use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rentdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let trigger_words = config.assistant.trigger_words.join(", ");
    let history_window = config
        .assistant
        .history_window
        .map_or_else(|| "<unbounded>".to_string(), |window| window.to_string());

    let fields: [(&str, String, &str); 21] = [
        ("database.url", config.database.url.clone(), "RENTDESK_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "RENTDESK_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "RENTDESK_DATABASE_TIMEOUT_SECS"),
        (
            "telegram.bot_token",
            redact_token(config.telegram.bot_token.expose_secret()),
            "RENTDESK_TELEGRAM_BOT_TOKEN",
        ),
        ("telegram.api_base_url", config.telegram.api_base_url.clone(), "RENTDESK_TELEGRAM_API_BASE_URL"),
        (
            "telegram.poll_timeout_secs",
            config.telegram.poll_timeout_secs.to_string(),
            "RENTDESK_TELEGRAM_POLL_TIMEOUT_SECS",
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), "RENTDESK_LLM_PROVIDER"),
        ("llm.api_key", llm_api_key.to_string(), "RENTDESK_LLM_API_KEY"),
        ("llm.base_url", config.llm_base_url(), "RENTDESK_LLM_BASE_URL"),
        ("llm.model", config.llm.model.clone(), "RENTDESK_LLM_MODEL"),
        ("llm.vision_model", config.llm.vision_model.clone(), "RENTDESK_LLM_VISION_MODEL"),
        ("llm.temperature", config.llm.temperature.to_string(), "RENTDESK_LLM_TEMPERATURE"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "RENTDESK_LLM_TIMEOUT_SECS"),
        ("assistant.trigger_words", trigger_words, "RENTDESK_ASSISTANT_TRIGGER_WORDS"),
        ("assistant.history_window", history_window, "RENTDESK_ASSISTANT_HISTORY_WINDOW"),
        (
            "assistant.history_warn_entries",
            config.assistant.history_warn_entries.to_string(),
            "RENTDESK_ASSISTANT_HISTORY_WARN_ENTRIES",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "RENTDESK_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "RENTDESK_SERVER_HEALTH_CHECK_PORT",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "RENTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "RENTDESK_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "RENTDESK_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in &fields {
        lines.push(render_line(
            key,
            value,
            field_source(key, Some(*env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    // The system prompt is long free text; show only where it came from.
    lines.push(render_line(
        "assistant.system_prompt",
        &format!("<{} chars>", config.assistant.system_prompt.chars().count()),
        field_source(
            "assistant.system_prompt",
            Some("RENTDESK_ASSISTANT_SYSTEM_PROMPT"),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("rentdesk.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/rentdesk.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    // Telegram tokens are `<bot id>:<secret>`; the bot id is public.
    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}
