use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use rentdesk_agent::{AddressContext, AgentRuntime, InboundAttachment, InboundMessage};

use crate::commands::{CommandPayload, CommandRouter};
use crate::reply::ReplyMessage;
use crate::runner::TransportError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Command(CommandPayload),
    Message(TextMessageEvent),
    Attachment(AttachmentEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Command(_) => ChatEventType::Command,
            Self::Message(_) => ChatEventType::Message,
            Self::Attachment(_) => ChatEventType::Attachment,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Command(payload) => Some(payload.chat_id),
            Self::Message(event) => Some(event.chat_id),
            Self::Attachment(event) => Some(event.chat_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Command,
    Message,
    Attachment,
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl Sender {
    /// Username when set, otherwise first name.
    pub fn display_name(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.first_name.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub sender: Option<Sender>,
    pub text: String,
    pub reply_to_bot: bool,
    pub mentions_bot: bool,
    pub bot_username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub sender: Option<Sender>,
    pub caption: Option<String>,
    pub file_id: String,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(ReplyMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("{event_type:?} event has no sender")]
    MissingSender { event_type: ChatEventType },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Downloads attachment bytes by transport file id.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn runtime_dispatcher(
    runtime: Arc<AgentRuntime>,
    attachments: Arc<dyn AttachmentSource>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(runtime.clone()));
    dispatcher.register(MessageHandler::new(runtime.clone()));
    dispatcher.register(AttachmentHandler::new(runtime, attachments));
    dispatcher
}

pub struct CommandHandler {
    router: CommandRouter,
}

impl CommandHandler {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { router: CommandRouter::new(runtime) }
    }
}

#[async_trait]
impl EventHandler for CommandHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Command
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Command(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let reply = self.router.route(payload, ctx).await.reply_to(payload.message_id);
        Ok(HandlerResult::Responded(reply))
    }
}

pub struct MessageHandler {
    runtime: Arc<AgentRuntime>,
}

impl MessageHandler {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let sender = event
            .sender
            .as_ref()
            .ok_or(EventHandlerError::MissingSender { event_type: ChatEventType::Message })?;

        let inbound = InboundMessage {
            conversation_id: event.chat_id.to_string(),
            sender: sender.display_name(),
            text: event.text.clone(),
            context: AddressContext {
                is_private: event.chat_kind == ChatKind::Private,
                is_reply_to_bot: event.reply_to_bot,
                mentions_bot: event.mentions_bot,
            },
            bot_username: event.bot_username.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };

        Ok(match self.runtime.handle_message(&inbound).await {
            Some(reply) => HandlerResult::Responded(
                ReplyMessage::from_agent(event.chat_id, reply).reply_to(event.message_id),
            ),
            None => HandlerResult::Processed,
        })
    }
}

pub struct AttachmentHandler {
    runtime: Arc<AgentRuntime>,
    source: Arc<dyn AttachmentSource>,
}

impl AttachmentHandler {
    pub fn new(runtime: Arc<AgentRuntime>, source: Arc<dyn AttachmentSource>) -> Self {
        Self { runtime, source }
    }
}

#[async_trait]
impl EventHandler for AttachmentHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Attachment
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Attachment(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !self.runtime.wants_attachment(event.caption.as_deref()) {
            return Ok(HandlerResult::Processed);
        }
        let sender = event
            .sender
            .as_ref()
            .ok_or(EventHandlerError::MissingSender { event_type: ChatEventType::Attachment })?
            .display_name();

        let bytes = match self.source.fetch(&event.file_id).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(
                    event_name = "ingress.chat.attachment_fetch_failed",
                    correlation_id = %ctx.correlation_id,
                    file_id = %event.file_id,
                    error = %error,
                    "attachment download failed"
                );
                let apology = format!("@{sender} {}", rentdesk_agent::runtime::COMPLETION_FAILURE_REPLY);
                return Ok(HandlerResult::Responded(
                    ReplyMessage::plain(event.chat_id, apology).reply_to(event.message_id),
                ));
            }
        };

        let attachment = InboundAttachment {
            conversation_id: event.chat_id.to_string(),
            sender,
            caption: event.caption.clone(),
            bytes,
            mime_type: event.mime_type.clone(),
            correlation_id: ctx.correlation_id.clone(),
        };
        Ok(match self.runtime.handle_attachment(&attachment).await {
            Some(reply) => HandlerResult::Responded(
                ReplyMessage::from_agent(event.chat_id, reply).reply_to(event.message_id),
            ),
            None => HandlerResult::Processed,
        })
    }
}
