//! Agent runtime - turns chat messages into inventory commands or model turns
//!
//! # Architecture
//!
//! Every inbound message follows the same loop:
//! 1. **Intent classification** (`intent`) - ordered rule table, first match wins
//! 2. **Command execution** (`executor`) - inventory mutation through `service`,
//!    deterministic reply
//! 3. **Address gate** (`gate`) - unmatched text is only answered when it is
//!    addressed to the assistant
//! 4. **Conversation** (`context`, `llm`) - the log is refreshed with an
//!    inventory snapshot and handed to the completion collaborator
//!
//! The model never mutates the inventory. Rentals and device changes happen
//! only through classified intents.

pub mod context;
pub mod executor;
pub mod gate;
pub mod intent;
pub mod llm;
pub mod runtime;
pub mod service;

pub use context::{ContextSettings, ConversationManager};
pub use executor::{CommandExecutor, ExecutionOutcome, ReplyStyle};
pub use gate::{AddressContext, AddressGate, GateDecision};
pub use intent::{ClassifierError, Intent, IntentClassifier, IntentKind, InventoryCommand};
pub use llm::{CompletionSettings, LlmClient, LlmError, OpenAiCompatibleClient, VisionClient};
pub use runtime::{AgentReply, AgentRuntime, InboundAttachment, InboundMessage, ReplyRoute};
pub use service::{Committed, InventoryService};
