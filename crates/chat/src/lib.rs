//! Chat Integration - Telegram bot interface
//!
//! This crate connects the assistant runtime to a group chat network:
//! - **Polling** (`runner`) - long-poll loop with acknowledgement and reconnect backoff
//! - **Telegram** (`telegram`) - Bot API transport and update parsing
//! - **Commands** (`commands`) - `/start`, `/reset`, `/rent`, `/who`, ...
//! - **Events** (`events`) - text messages, image attachments, dispatch
//! - **Replies** (`reply`) - outbound message shapes and fixed texts
//!
//! # Getting Started
//!
//! 1. Create a bot with @BotFather and copy its token
//! 2. Disable privacy mode if the bot must see unaddressed group messages
//! 3. Set `RENTDESK_TELEGRAM_BOT_TOKEN` and `RENTDESK_LLM_API_KEY`
//!
//! # Architecture
//!
//! ```text
//! Telegram updates → PollingRunner → EventDispatcher → Handlers → AgentRuntime
//!                         ↓
//!                   sendMessage ← ReplyMessage
//! ```

pub mod commands;
pub mod events;
pub mod reply;
pub mod runner;
pub mod telegram;

pub use events::{runtime_dispatcher, ChatEnvelope, ChatEvent, EventDispatcher};
pub use reply::{ParseMode, ReplyMessage};
pub use runner::{ChatTransport, PollingRunner, ReconnectPolicy, TransportError};
pub use telegram::TelegramTransport;
