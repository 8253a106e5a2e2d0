use std::sync::Arc;

use rentdesk_agent::intent::ArgsError;
use rentdesk_agent::{AgentRuntime, InventoryCommand};
use rentdesk_core::DomainError;

use crate::events::{ChatKind, EventContext, Sender};
use crate::reply::{ReplyMessage, HELP_TEXT, START_TEXT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPayload {
    pub command: BotCommand,
    pub args: String,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub sender: Option<Sender>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Reset,
    MentionAll,
    Id,
    Users,
    ForgetMe,
    Inventory(InventoryCommand),
}

impl BotCommand {
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "reset" => Self::Reset,
            "mentionall" => Self::MentionAll,
            "id" => Self::Id,
            "users" => Self::Users,
            "forgetme" => Self::ForgetMe,
            "devices" | "list" => Self::Inventory(InventoryCommand::Devices),
            "available" => Self::Inventory(InventoryCommand::Available),
            "rent" => Self::Inventory(InventoryCommand::Rent),
            "return" => Self::Inventory(InventoryCommand::Return),
            "mine" => Self::Inventory(InventoryCommand::Mine),
            "who" => Self::Inventory(InventoryCommand::Who),
            "info" => Self::Inventory(InventoryCommand::Info),
            "add" => Self::Inventory(InventoryCommand::Add),
            "delete" => Self::Inventory(InventoryCommand::Delete),
            _ => return None,
        };
        Some(command)
    }
}

/// Splits `/name@bot args` into `(name, args)`. Commands explicitly addressed
/// to another bot yield `None`.
pub fn split_command(text: &str, bot_username: Option<&str>) -> Option<(String, String)> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };

    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if let (Some(target), Some(bot)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(bot) {
            return None;
        }
    }
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args.to_owned()))
}

/// Answers slash commands. Inventory commands go through the same executor as
/// free text; the rest read or edit conversation logs.
pub struct CommandRouter {
    runtime: Arc<AgentRuntime>,
}

impl CommandRouter {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn route(&self, payload: &CommandPayload, ctx: &EventContext) -> ReplyMessage {
        let chat_id = payload.chat_id;
        let conversation_id = chat_id.to_string();
        let conversations = self.runtime.conversations();

        match payload.command {
            BotCommand::Start => ReplyMessage::plain(chat_id, START_TEXT),
            BotCommand::Help => ReplyMessage::plain(chat_id, HELP_TEXT),
            BotCommand::Reset => match conversations.reset(&conversation_id).await {
                Ok(()) => ReplyMessage::plain(chat_id, "✅ Đã xoá hội thoại nhóm này."),
                Err(error) => ReplyMessage::plain(chat_id, error.user_reply(&ctx.correlation_id)),
            },
            BotCommand::MentionAll => {
                if conversations.log(&conversation_id).await.is_none() {
                    return ReplyMessage::plain(chat_id, "Chưa có ai tương tác với bot trong nhóm.");
                }
                let tags = conversations
                    .participants(&conversation_id)
                    .await
                    .iter()
                    .map(|user| format!("@{user}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                if tags.is_empty() {
                    ReplyMessage::plain(chat_id, "Không có thành viên nào để tag.")
                } else {
                    ReplyMessage::plain(chat_id, tags)
                }
            }
            BotCommand::Id => {
                let user_id = payload.sender.as_ref().map_or(0, |sender| sender.user_id);
                ReplyMessage::markdown(
                    chat_id,
                    format!("👤 User ID: `{user_id}`\n💬 Chat ID: `{chat_id}`"),
                )
            }
            BotCommand::Users => {
                let users = conversations.participants(&conversation_id).await;
                if users.is_empty() {
                    return ReplyMessage::plain(chat_id, "Không có người dùng nào được lưu.");
                }
                let list = users.iter().map(|user| format!("• @{user}")).collect::<Vec<_>>().join("\n");
                ReplyMessage::plain(chat_id, format!("👥 Danh sách người dùng:\n{list}"))
            }
            BotCommand::ForgetMe => {
                let Some(username) = payload.sender.as_ref().and_then(|sender| sender.username.clone())
                else {
                    return ReplyMessage::plain(chat_id, "Bạn cần có username để xoá dữ liệu.");
                };
                match conversations.forget_user(&conversation_id, &username).await {
                    Ok(_) => ReplyMessage::plain(chat_id, format!("🧹 Đã xoá dữ liệu của @{username}.")),
                    Err(error) => ReplyMessage::plain(chat_id, error.user_reply(&ctx.correlation_id)),
                }
            }
            BotCommand::Inventory(command) => {
                let sender = payload
                    .sender
                    .as_ref()
                    .map(Sender::display_name)
                    .unwrap_or_else(|| chat_id.to_string());
                match command.to_intent(&payload.args) {
                    Ok(intent) => {
                        let reply = self
                            .runtime
                            .execute_intent(&conversation_id, &intent, &sender, &ctx.correlation_id)
                            .await;
                        ReplyMessage::from_agent(chat_id, reply)
                    }
                    Err(ArgsError::Missing) => {
                        ReplyMessage::plain(chat_id, format!("⚠️ Cách dùng: {}", command.usage()))
                    }
                    Err(ArgsError::MalformedQuantity(raw)) => {
                        ReplyMessage::plain(chat_id, DomainError::InvalidQuantity { raw }.to_string())
                    }
                }
            }
        }
    }
}
