//! Telegram Bot API transport: long-polls `getUpdates`, answers with
//! `sendMessage`, downloads attachments through `getFile`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use rentdesk_core::config::TelegramConfig;

use crate::commands::{split_command, BotCommand, CommandPayload};
use crate::events::{
    AttachmentEvent, AttachmentSource, ChatEnvelope, ChatEvent, ChatKind, Sender, TextMessageEvent,
};
use crate::reply::{ParseMode, ReplyMessage};
use crate::runner::{ChatTransport, TransportError};

/// Longest text a single `sendMessage` call accepts, in characters.
pub const MESSAGE_LIMIT: usize = 4_096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub document: Option<Document>,
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

#[derive(Default)]
struct PollState {
    offset: i64,
    pending: VecDeque<ChatEnvelope>,
    identity: Option<BotIdentity>,
}

pub struct TelegramTransport {
    http: reqwest::Client,
    api_base_url: String,
    token: SecretString,
    poll_timeout_secs: u64,
    state: Mutex<PollState>,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        // Leave room for the long-poll wait on top of ordinary request latency.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            token: config.bot_token.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            state: Mutex::new(PollState::default()),
        })
    }

    pub async fn identity(&self) -> Option<BotIdentity> {
        self.state.lock().await.identity.clone()
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base_url, self.token.expose_secret())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, ApiFailure> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|error| ApiFailure { status: None, description: redact(&error.to_string()) })?;
        let status = response.status();
        let parsed = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|error| ApiFailure { status: Some(status.as_u16()), description: error.to_string() })?;

        match parsed {
            ApiResponse { ok: true, result: Some(result), .. } => Ok(result),
            ApiResponse { description, .. } => Err(ApiFailure {
                status: Some(status.as_u16()),
                description: description.unwrap_or_else(|| format!("{method} returned no result")),
            }),
        }
    }

    async fn send_chunk(&self, reply: &ReplyMessage, text: &str, first: bool) -> Result<(), TransportError> {
        let mut body = json!({ "chat_id": reply.chat_id, "text": text });
        if first {
            if let Some(message_id) = reply.reply_to_message_id {
                body["reply_to_message_id"] = json!(message_id);
                body["allow_sending_without_reply"] = json!(true);
            }
        }
        if reply.parse_mode == ParseMode::Markdown {
            body["parse_mode"] = json!("Markdown");
        }

        match self.call::<Value>("sendMessage", &body).await {
            Ok(_) => Ok(()),
            // Model output often has unbalanced Markdown; resend it untouched.
            Err(ApiFailure { status: Some(400), description }) if reply.parse_mode == ParseMode::Markdown => {
                tracing::debug!(
                    event_name = "egress.chat.markdown_rejected",
                    chat_id = reply.chat_id,
                    description = %description,
                    "markdown rejected, resending as plain text"
                );
                if let Some(object) = body.as_object_mut() {
                    object.remove("parse_mode");
                }
                self.call::<Value>("sendMessage", &body)
                    .await
                    .map(|_| ())
                    .map_err(|failure| TransportError::Send(failure.to_string()))
            }
            Err(failure) => Err(TransportError::Send(failure.to_string())),
        }
    }
}

#[derive(Debug)]
struct ApiFailure {
    status: Option<u16>,
    description: String,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "telegram returned {status}: {}", self.description),
            None => write!(f, "telegram request failed: {}", self.description),
        }
    }
}

/// reqwest errors include the request URL, which carries the bot token.
fn redact(message: &str) -> String {
    match (message.find("/bot"), message.rfind('/')) {
        (Some(start), Some(end)) if end > start => {
            format!("{}/bot<redacted>{}", &message[..start], &message[end..])
        }
        _ => message.to_owned(),
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let me: BotUser = self
            .call("getMe", &json!({}))
            .await
            .map_err(|failure| TransportError::Connect(failure.to_string()))?;
        tracing::info!(
            event_name = "ingress.chat.connected",
            bot_id = me.id,
            bot_username = me.username.as_deref().unwrap_or("unknown"),
            "telegram bot identity confirmed"
        );
        self.state.lock().await.identity = Some(BotIdentity { id: me.id, username: me.username });
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        loop {
            let (offset, identity) = {
                let mut state = self.state.lock().await;
                if let Some(envelope) = state.pending.pop_front() {
                    return Ok(Some(envelope));
                }
                let identity = state
                    .identity
                    .clone()
                    .ok_or_else(|| TransportError::Receive("transport is not connected".to_owned()))?;
                (state.offset, identity)
            };

            let updates: Vec<Update> = self
                .call(
                    "getUpdates",
                    &json!({
                        "offset": offset,
                        "timeout": self.poll_timeout_secs,
                        "allowed_updates": ["message"],
                    }),
                )
                .await
                .map_err(|failure| TransportError::Receive(failure.to_string()))?;

            let mut state = self.state.lock().await;
            state.pending.extend(updates.iter().map(|update| parse_update(update, &identity)));
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let update_id = envelope_id
            .parse::<i64>()
            .map_err(|_| TransportError::Acknowledge(format!("`{envelope_id}` is not an update id")))?;
        let mut state = self.state.lock().await;
        state.offset = state.offset.max(update_id + 1);
        Ok(())
    }

    async fn send(&self, reply: &ReplyMessage) -> Result<(), TransportError> {
        for (index, chunk) in split_message(&reply.text, MESSAGE_LIMIT).iter().enumerate() {
            self.send_chunk(reply, chunk, index == 0).await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.identity = None;
        Ok(())
    }
}

#[async_trait]
impl AttachmentSource for TelegramTransport {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let info: FileInfo = self
            .call("getFile", &json!({ "file_id": file_id }))
            .await
            .map_err(|failure| TransportError::Receive(failure.to_string()))?;
        let path = info
            .file_path
            .ok_or_else(|| TransportError::Receive(format!("file {file_id} has no download path")))?;

        let url = format!("{}/file/bot{}/{path}", self.api_base_url, self.token.expose_secret());
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| TransportError::Receive(redact(&error.to_string())))?;
        let bytes = response.bytes().await.map_err(|error| TransportError::Receive(redact(&error.to_string())))?;
        Ok(bytes.to_vec())
    }
}

/// Maps one Bot API update to an envelope keyed by its update id.
pub fn parse_update(update: &Update, bot: &BotIdentity) -> ChatEnvelope {
    let envelope_id = update.update_id.to_string();
    let event = match &update.message {
        Some(message) => parse_message(message, bot),
        None if update.edited_message.is_some() => {
            ChatEvent::Unsupported { event_type: "edited_message".to_owned() }
        }
        None => ChatEvent::Unsupported { event_type: "update".to_owned() },
    };
    ChatEnvelope { envelope_id, event }
}

fn parse_message(message: &Message, bot: &BotIdentity) -> ChatEvent {
    let chat_kind = if message.chat.kind == "private" { ChatKind::Private } else { ChatKind::Group };
    let sender = message.from.as_ref().map(|user| Sender {
        user_id: user.id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    });

    if let Some(text) = &message.text {
        if text.trim_start().starts_with('/') {
            let Some((name, args)) = split_command(text, bot.username.as_deref()) else {
                return ChatEvent::Unsupported { event_type: "foreign_command".to_owned() };
            };
            return match BotCommand::parse(&name) {
                Some(command) => ChatEvent::Command(CommandPayload {
                    command,
                    args,
                    chat_id: message.chat.id,
                    chat_kind,
                    message_id: message.message_id,
                    sender,
                }),
                None => ChatEvent::Unsupported { event_type: "unknown_command".to_owned() },
            };
        }

        let mentions_bot = bot.username.as_deref().is_some_and(|username| {
            text.to_lowercase().contains(&format!("@{}", username.to_lowercase()))
        });
        let reply_to_bot = message
            .reply_to_message
            .as_ref()
            .and_then(|original| original.from.as_ref())
            .is_some_and(|author| author.id == bot.id);

        return ChatEvent::Message(TextMessageEvent {
            chat_id: message.chat.id,
            chat_kind,
            message_id: message.message_id,
            sender,
            text: text.clone(),
            reply_to_bot,
            mentions_bot,
            bot_username: bot.username.clone(),
        });
    }

    let image = message
        .photo
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
        .map(|size| (size.file_id.clone(), "image/jpeg".to_owned()))
        .or_else(|| {
            message.document.as_ref().and_then(|document| match &document.mime_type {
                Some(mime) if mime.starts_with("image/") => Some((document.file_id.clone(), mime.clone())),
                _ => None,
            })
        });

    match image {
        Some((file_id, mime_type)) => ChatEvent::Attachment(AttachmentEvent {
            chat_id: message.chat.id,
            chat_kind,
            message_id: message.message_id,
            sender,
            caption: message.caption.clone(),
            file_id,
            mime_type,
        }),
        None => ChatEvent::Unsupported { event_type: "message".to_owned() },
    }
}

/// Splits text into chunks of at most `limit` characters, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars = line.chars().collect::<Vec<_>>();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rentdesk_agent::InventoryCommand;

    use super::{parse_update, redact, split_message, BotIdentity, Update};
    use crate::commands::BotCommand;
    use crate::events::{ChatEvent, ChatKind};

    fn bot() -> BotIdentity {
        BotIdentity { id: 999, username: Some("RentDeskBot".to_owned()) }
    }

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).expect("update")
    }

    #[test]
    fn group_text_reply_to_bot_is_detected() {
        let envelope = parse_update(
            &update(json!({
                "update_id": 10,
                "message": {
                    "message_id": 5,
                    "chat": { "id": -100, "type": "supergroup" },
                    "from": { "id": 1, "username": "alice", "first_name": "Alice" },
                    "text": "còn máy nào không",
                    "reply_to_message": {
                        "message_id": 4,
                        "chat": { "id": -100, "type": "supergroup" },
                        "from": { "id": 999, "username": "RentDeskBot", "first_name": "RentDesk" },
                        "text": "@alice Còn 2 máy."
                    }
                }
            })),
            &bot(),
        );

        assert_eq!(envelope.envelope_id, "10");
        let ChatEvent::Message(event) = envelope.event else { panic!("expected a text message") };
        assert_eq!(event.chat_kind, ChatKind::Group);
        assert!(event.reply_to_bot);
        assert!(!event.mentions_bot);
        assert_eq!(event.sender.map(|sender| sender.display_name()), Some("alice".to_owned()));
    }

    #[test]
    fn mention_is_case_insensitive_and_sender_falls_back_to_first_name() {
        let envelope = parse_update(
            &update(json!({
                "update_id": 11,
                "message": {
                    "message_id": 6,
                    "chat": { "id": 1, "type": "private" },
                    "from": { "id": 2, "first_name": "Bình" },
                    "text": "@rentdeskbot thuê CAM"
                }
            })),
            &bot(),
        );

        let ChatEvent::Message(event) = envelope.event else { panic!("expected a text message") };
        assert_eq!(event.chat_kind, ChatKind::Private);
        assert!(event.mentions_bot);
        assert_eq!(event.bot_username.as_deref(), Some("RentDeskBot"));
        assert_eq!(event.sender.map(|sender| sender.display_name()), Some("Bình".to_owned()));
    }

    #[test]
    fn commands_for_this_bot_become_command_events() {
        let parse = |text: &str| {
            parse_update(
                &update(json!({
                    "update_id": 12,
                    "message": {
                        "message_id": 7,
                        "chat": { "id": -100, "type": "group" },
                        "from": { "id": 1, "username": "alice" },
                        "text": text
                    }
                })),
                &bot(),
            )
            .event
        };

        let ChatEvent::Command(payload) = parse("/rent@RentDeskBot CAM 2") else {
            panic!("expected a command")
        };
        assert_eq!(payload.command, BotCommand::Inventory(InventoryCommand::Rent));
        assert_eq!(payload.args, "CAM 2");

        assert_eq!(parse("/rent@OtherBot CAM"), ChatEvent::Unsupported { event_type: "foreign_command".to_owned() });
        assert_eq!(parse("/quote new"), ChatEvent::Unsupported { event_type: "unknown_command".to_owned() });
    }

    #[test]
    fn largest_photo_and_image_documents_are_attachments() {
        let photo = parse_update(
            &update(json!({
                "update_id": 13,
                "message": {
                    "message_id": 8,
                    "chat": { "id": -100, "type": "group" },
                    "from": { "id": 1, "username": "alice" },
                    "caption": "bot ơi đây là gì",
                    "photo": [
                        { "file_id": "small", "width": 90, "height": 90 },
                        { "file_id": "large", "width": 1280, "height": 960 },
                        { "file_id": "medium", "width": 320, "height": 240 }
                    ]
                }
            })),
            &bot(),
        );
        let ChatEvent::Attachment(event) = photo.event else { panic!("expected an attachment") };
        assert_eq!(event.file_id, "large");
        assert_eq!(event.mime_type, "image/jpeg");
        assert_eq!(event.caption.as_deref(), Some("bot ơi đây là gì"));

        let document = |mime: &str| {
            parse_update(
                &update(json!({
                    "update_id": 14,
                    "message": {
                        "message_id": 9,
                        "chat": { "id": -100, "type": "group" },
                        "document": { "file_id": "doc", "mime_type": mime }
                    }
                })),
                &bot(),
            )
            .event
        };
        assert!(matches!(document("image/png"), ChatEvent::Attachment(ref event) if event.mime_type == "image/png"));
        assert_eq!(document("application/pdf"), ChatEvent::Unsupported { event_type: "message".to_owned() });
    }

    #[test]
    fn updates_without_messages_are_unsupported() {
        let envelope = parse_update(&update(json!({ "update_id": 15 })), &bot());
        assert_eq!(envelope.event, ChatEvent::Unsupported { event_type: "update".to_owned() });
    }

    #[test]
    fn long_text_splits_on_line_breaks() {
        let text = format!("{}\n{}\n{}", "a".repeat(6), "b".repeat(6), "c".repeat(20));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0], "aaaaaa\n");
        assert_eq!(chunks[1], "bbbbbb\n");
        assert_eq!(chunks[2], "c".repeat(10));
        assert_eq!(chunks.len(), 4);
        assert_eq!(split_message("ngắn", 10), vec!["ngắn".to_owned()]);
    }

    #[test]
    fn token_is_removed_from_request_errors() {
        let message = "error sending request for url (https://api.telegram.org/bot123:SECRET/getUpdates)";
        let redacted = redact(message);
        assert!(!redacted.contains("SECRET"));
        assert!(redacted.ends_with("/getUpdates)"));
    }
}
