use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use rentdesk_core::BorrowerId;

use crate::context::ConversationManager;
use crate::executor::{CommandExecutor, ExecutionOutcome, ReplyStyle};
use crate::gate::AddressContext;
use crate::intent::{Intent, IntentClassifier, IntentKind};
use crate::llm::{LlmClient, LlmError, VisionClient};
use crate::service::InventoryService;

/// Fixed apology sent whenever a model call fails or times out.
pub const COMPLETION_FAILURE_REPLY: &str = "❌ Đã xảy ra lỗi khi gọi GPT-4.";
pub const VISION_UNAVAILABLE_REPLY: &str = "⚠️ Chưa cấu hình mô hình phân tích hình ảnh.";
const DEFAULT_VISION_PROMPT: &str = "Hãy mô tả nội dung của hình ảnh này.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: String,
    /// Username, or first name when the sender has none.
    pub sender: String,
    pub text: String,
    pub context: AddressContext,
    /// The bot's own username, stripped from `@mentions` before classification.
    pub bot_username: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundAttachment {
    pub conversation_id: String,
    pub sender: String,
    pub caption: Option<String>,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyRoute {
    Command(IntentKind),
    Conversation,
    Attachment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub style: ReplyStyle,
    pub route: ReplyRoute,
}

/// Message handling loop: classify, execute or converse, reply. Each
/// conversation handles one message at a time; different conversations run
/// concurrently and meet only at the inventory lock.
pub struct AgentRuntime {
    classifier: IntentClassifier,
    executor: CommandExecutor,
    inventory: Arc<InventoryService>,
    conversations: Arc<ConversationManager>,
    llm: Arc<dyn LlmClient>,
    vision: Option<Arc<dyn VisionClient>>,
    llm_timeout: Duration,
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(
        classifier: IntentClassifier,
        inventory: Arc<InventoryService>,
        conversations: Arc<ConversationManager>,
        llm: Arc<dyn LlmClient>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            executor: CommandExecutor::new(inventory.clone()),
            inventory,
            conversations,
            llm,
            vision: None,
            llm_timeout,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionClient>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn inventory(&self) -> &Arc<InventoryService> {
        &self.inventory
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub async fn handle_message(&self, message: &InboundMessage) -> Option<AgentReply> {
        let lock = self.turn_lock(&message.conversation_id).await;
        let reply = {
            let _turn = lock.lock().await;
            self.handle_turn(message).await
        };
        self.release_turn_lock(&message.conversation_id, lock).await;
        reply
    }

    async fn handle_turn(&self, message: &InboundMessage) -> Option<AgentReply> {
        let decision = self.classifier.gate().evaluate(&message.text, message.context);
        if let Some(intent) =
            self.classifier.classify_addressed(&message.text, message.bot_username.as_deref())
        {
            let outcome = self
                .executor
                .execute(&intent, &BorrowerId::new(&message.sender), &message.correlation_id)
                .await;

            // Unaddressed group chatter that only looks like a command stays quiet.
            if outcome.is_unknown_device() && !decision.is_respond() {
                tracing::debug!(
                    event_name = "assistant.command.suppressed",
                    correlation_id = %message.correlation_id,
                    conversation_id = %message.conversation_id,
                    intent = intent.kind().as_str(),
                    "unknown device in unaddressed message, not replying"
                );
                return None;
            }
            return Some(command_reply(&intent, outcome));
        }

        if !decision.is_respond() {
            tracing::trace!(
                event_name = "assistant.message.ignored",
                correlation_id = %message.correlation_id,
                reason_code = decision.reason_code(),
                "message not addressed to the assistant"
            );
            return None;
        }

        tracing::debug!(
            event_name = "assistant.message.addressed",
            correlation_id = %message.correlation_id,
            conversation_id = %message.conversation_id,
            reason_code = decision.reason_code(),
            "delegating message to completion"
        );
        Some(self.converse(message).await)
    }

    /// Slash-command path: the intent is already known and is always answered.
    pub async fn execute_intent(
        &self,
        conversation_id: &str,
        intent: &Intent,
        sender: &str,
        correlation_id: &str,
    ) -> AgentReply {
        let lock = self.turn_lock(conversation_id).await;
        let outcome = {
            let _turn = lock.lock().await;
            self.executor.execute(intent, &BorrowerId::new(sender), correlation_id).await
        };
        self.release_turn_lock(conversation_id, lock).await;
        command_reply(intent, outcome)
    }

    /// True when an attachment with this caption should be fetched and analysed.
    pub fn wants_attachment(&self, caption: Option<&str>) -> bool {
        caption.is_some_and(|caption| self.classifier.gate().contains_trigger(caption))
    }

    pub async fn handle_attachment(&self, attachment: &InboundAttachment) -> Option<AgentReply> {
        if !self.wants_attachment(attachment.caption.as_deref()) {
            return None;
        }
        let Some(vision) = &self.vision else {
            return Some(AgentReply {
                text: VISION_UNAVAILABLE_REPLY.to_owned(),
                style: ReplyStyle::Plain,
                route: ReplyRoute::Attachment,
            });
        };

        let stripped = self.classifier.gate().strip(attachment.caption.as_deref().unwrap_or_default());
        let prompt = match stripped.trim() {
            "" => DEFAULT_VISION_PROMPT,
            prompt => prompt,
        };

        let result = tokio::time::timeout(
            self.llm_timeout,
            vision.describe(prompt, &attachment.bytes, &attachment.mime_type),
        )
        .await
        .unwrap_or(Err(LlmError::Timeout(self.llm_timeout.as_secs())));

        let body = match result {
            Ok(text) => {
                tracing::info!(
                    event_name = "assistant.vision.completed",
                    correlation_id = %attachment.correlation_id,
                    conversation_id = %attachment.conversation_id,
                    "attachment analysed"
                );
                text
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "assistant.vision.failed",
                    correlation_id = %attachment.correlation_id,
                    error = %error,
                    "attachment analysis failed"
                );
                COMPLETION_FAILURE_REPLY.to_owned()
            }
        };

        Some(AgentReply {
            text: format!("@{} {body}", attachment.sender),
            style: ReplyStyle::Markdown,
            route: ReplyRoute::Attachment,
        })
    }

    async fn converse(&self, message: &InboundMessage) -> AgentReply {
        let conversation_id = message.conversation_id.as_str();
        let prepared = match self
            .conversations
            .append_user_turn(conversation_id, &message.text, Some(&message.sender))
            .await
        {
            Ok(()) => self.conversations.prepare_for_completion(conversation_id).await,
            Err(error) => Err(error),
        };

        let messages = match prepared {
            Ok(messages) => messages,
            Err(error) => {
                return AgentReply {
                    text: error.user_reply(&message.correlation_id),
                    style: ReplyStyle::Plain,
                    route: ReplyRoute::Conversation,
                };
            }
        };

        let completion = tokio::time::timeout(self.llm_timeout, self.llm.complete(&messages))
            .await
            .unwrap_or(Err(LlmError::Timeout(self.llm_timeout.as_secs())));

        let body = match completion {
            Ok(reply) => {
                if let Err(error) = self.conversations.append_assistant_turn(conversation_id, &reply).await {
                    tracing::error!(
                        event_name = "assistant.completion.not_recorded",
                        correlation_id = %message.correlation_id,
                        error = %error,
                        "completion delivered but not recorded"
                    );
                }
                tracing::info!(
                    event_name = "assistant.completion.delivered",
                    correlation_id = %message.correlation_id,
                    conversation_id,
                    prompt_messages = messages.len(),
                    "completion delivered"
                );
                reply
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "assistant.completion.failed",
                    correlation_id = %message.correlation_id,
                    conversation_id,
                    error = %error,
                    "completion failed"
                );
                COMPLETION_FAILURE_REPLY.to_owned()
            }
        };

        AgentReply {
            text: format!("@{} {body}", message.sender),
            style: ReplyStyle::Markdown,
            route: ReplyRoute::Conversation,
        }
    }

    async fn turn_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks.entry(conversation_id.to_owned()).or_default().clone()
    }

    /// Drops the conversation's lock once no other turn holds or awaits it.
    async fn release_turn_lock(&self, conversation_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.turn_locks.lock().await;
        // One reference in the map, one here: nobody else is queued.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(conversation_id);
        }
    }

    #[cfg(test)]
    async fn tracked_turn_locks(&self) -> usize {
        self.turn_locks.lock().await.len()
    }
}

fn command_reply(intent: &Intent, outcome: ExecutionOutcome) -> AgentReply {
    AgentReply { text: outcome.reply, style: outcome.style, route: ReplyRoute::Command(intent.kind()) }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use rentdesk_core::{ChatMessage, DeviceId, Role};
    use rentdesk_db::InMemorySnapshotStore;

    use super::{
        AgentRuntime, InboundAttachment, InboundMessage, ReplyRoute, COMPLETION_FAILURE_REPLY,
    };
    use crate::context::{ContextSettings, ConversationManager};
    use crate::executor::ReplyStyle;
    use crate::gate::{AddressContext, AddressGate};
    use crate::intent::{IntentClassifier, IntentKind};
    use crate::llm::{LlmClient, LlmError, VisionClient};
    use crate::service::InventoryService;

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        delay: Option<Duration>,
    }

    impl ScriptedLlm {
        fn replying(replies: Vec<Result<String, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), ..Self::default() }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.requests.lock().await.push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies.lock().await.pop_front().unwrap_or(Err(LlmError::EmptyCompletion))
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedLlm {
        async fn describe(&self, prompt: &str, image: &[u8], _mime: &str) -> Result<String, LlmError> {
            self.requests
                .lock()
                .await
                .push(vec![ChatMessage::new(Role::User, format!("{prompt} [{} bytes]", image.len()))]);
            self.replies.lock().await.pop_front().unwrap_or(Err(LlmError::EmptyCompletion))
        }
    }

    async fn runtime_with(llm: Arc<ScriptedLlm>, timeout: Duration) -> AgentRuntime {
        let store = Arc::new(InMemorySnapshotStore::new());
        let inventory = Arc::new(InventoryService::load(store.clone()).await.expect("inventory"));
        let settings = ContextSettings {
            system_prompt: "You are ChatGPT, a helpful assistant.".to_owned(),
            history_window: None,
            history_warn_entries: 200,
        };
        let conversations = Arc::new(
            ConversationManager::load(store, inventory.clone(), settings).await.expect("conversations"),
        );
        let classifier =
            IntentClassifier::new(AddressGate::new(&["bot".to_owned()])).expect("classifier");
        AgentRuntime::new(classifier, inventory, conversations, llm.clone(), timeout).with_vision(llm)
    }

    fn group_message(text: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: "-100".to_owned(),
            sender: "alice".to_owned(),
            text: text.to_owned(),
            context: AddressContext::default(),
            bot_username: Some("rentdeskbot".to_owned()),
            correlation_id: "corr-1".to_owned(),
        }
    }

    #[tokio::test]
    async fn commands_never_reach_the_model() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm.clone(), Duration::from_secs(5)).await;

        let reply = runtime
            .handle_message(&group_message("thêm CAM Máy ảnh, 2"))
            .await
            .expect("command reply");
        assert_eq!(reply.route, ReplyRoute::Command(IntentKind::AddOrUpdateDevice));

        let reply = runtime.handle_message(&group_message("cho mình thuê CAM")).await.expect("rent");
        assert!(reply.text.contains("alice đã thuê 1 CAM"));
        assert!(llm.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unaddressed_chatter_is_ignored() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm.clone(), Duration::from_secs(5)).await;

        assert!(runtime.handle_message(&group_message("hôm nay ăn gì nhỉ")).await.is_none());
        assert!(
            runtime.handle_message(&group_message("mình mượn cái này nhé")).await.is_none(),
            "unknown device in unaddressed chatter stays silent"
        );
        assert!(runtime.conversations().log("-100").await.is_none());
    }

    #[tokio::test]
    async fn addressed_unknown_device_is_answered() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm, Duration::from_secs(5)).await;

        let reply = runtime.handle_message(&group_message("bot ơi thuê ZZZ 2")).await.expect("reply");
        assert!(reply.text.contains("Không tìm thấy thiết bị `ZZZ`"));
    }

    #[tokio::test]
    async fn bot_mention_addresses_commands_like_a_trigger_word() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm.clone(), Duration::from_secs(5)).await;
        let mentioned = |text: &str| {
            let mut message = group_message(text);
            message.context.mentions_bot = true;
            message
        };

        let added = runtime
            .handle_message(&mentioned("@rentdeskbot thêm CAM Máy ảnh, 2"))
            .await
            .expect("add reply");
        assert_eq!(added.route, ReplyRoute::Command(IntentKind::AddOrUpdateDevice));

        let listed = runtime
            .handle_message(&mentioned("@RentdeskBot\nChân máy, 3\nMicro, 1"))
            .await
            .expect("bulk reply");
        assert_eq!(listed.route, ReplyRoute::Command(IntentKind::BulkDeviceList));

        let mine = runtime.handle_message(&mentioned("@rentdeskbot thuê gì")).await.expect("mine");
        assert_eq!(mine.route, ReplyRoute::Command(IntentKind::WhatAmIRenting));
        assert!(!mine.text.contains("rentdeskbot"), "{}", mine.text);

        let deleted =
            runtime.handle_message(&mentioned("@rentdeskbot xoá CAM")).await.expect("delete");
        assert_eq!(deleted.route, ReplyRoute::Command(IntentKind::DeleteDevice));
        assert!(runtime.inventory().read(|state| state.devices.get(&DeviceId::new("CAM")).is_none()).await);
        assert!(llm.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_quantity_in_a_device_list_changes_nothing() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm, Duration::from_secs(5)).await;
        runtime.handle_message(&group_message("thêm CA Camera A, 1")).await.expect("seed");
        let revision = runtime.inventory().revision().await;

        for list in ["bot\nCamera A, -3\nCamera B, 2", "bot\nCamera A: 1,5\nCamera B, 2"] {
            let reply = runtime.handle_message(&group_message(list)).await.expect("reply");
            assert_eq!(reply.route, ReplyRoute::Command(IntentKind::BulkDeviceList));
            assert!(reply.text.contains("Số lượng không hợp lệ"), "{}", reply.text);
        }

        assert_eq!(runtime.inventory().revision().await, revision);
        let quantity = runtime
            .inventory()
            .read(|state| state.devices.get(&DeviceId::new("CA")).and_then(|device| device.quantity))
            .await;
        assert_eq!(quantity, Some(1));
        assert!(runtime.inventory().read(|state| state.devices.find_by_description("Camera B").is_none()).await);
    }

    #[tokio::test]
    async fn turn_locks_are_released_after_each_turn() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = Arc::new(runtime_with(llm, Duration::from_secs(5)).await);

        let handles = (0..4)
            .map(|index| {
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    let mut message = group_message("danh sách thiết bị");
                    message.conversation_id = format!("-10{}", index % 2);
                    runtime.handle_message(&message).await
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert!(handle.await.expect("turn task").is_some());
        }
        runtime.execute_intent("-200", &crate::intent::Intent::ListDevices, "alice", "corr-4").await;

        assert_eq!(runtime.tracked_turn_locks().await, 0);
    }

    #[tokio::test]
    async fn addressed_question_goes_to_model_with_inventory_snapshot() {
        let llm = Arc::new(ScriptedLlm::replying(vec![Ok("Còn 2 máy ảnh.".to_owned())]));
        let runtime = runtime_with(llm.clone(), Duration::from_secs(5)).await;
        runtime.handle_message(&group_message("thêm CAM Máy ảnh, 2")).await;

        let reply = runtime
            .handle_message(&group_message("bot ơi còn máy ảnh không nhỉ"))
            .await
            .expect("conversation reply");
        assert_eq!(reply.text, "@alice Còn 2 máy ảnh.");
        assert_eq!(reply.style, ReplyStyle::Markdown);

        let requests = llm.requests.lock().await;
        let sent = &requests[0];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content, "You are ChatGPT, a helpful assistant.");
        assert!(sent[1].content.contains("CAM: Máy ảnh"));
        assert_eq!(sent[2].content, "bot ơi còn máy ảnh không nhỉ");

        let log = runtime.conversations().log("-100").await.expect("log");
        assert_eq!(log.entries().last().map(|entry| entry.role), Some(Role::Assistant));
    }

    #[tokio::test]
    async fn model_failure_uses_fixed_reply_and_records_no_answer() {
        let llm = Arc::new(ScriptedLlm::replying(vec![Err(LlmError::Status {
            status: 500,
            body: "boom".to_owned(),
        })]));
        let runtime = runtime_with(llm, Duration::from_secs(5)).await;

        let mut message = group_message("kể chuyện cười đi");
        message.context = AddressContext { is_private: true, ..AddressContext::default() };
        let reply = runtime.handle_message(&message).await.expect("reply");
        assert_eq!(reply.text, format!("@alice {COMPLETION_FAILURE_REPLY}"));

        let log = runtime.conversations().log("-100").await.expect("log");
        assert_eq!(log.entries().last().map(|entry| entry.role), Some(Role::User));
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let llm = Arc::new(ScriptedLlm {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedLlm::replying(vec![Ok("late".to_owned())])
        });
        let runtime = runtime_with(llm, Duration::from_millis(20)).await;

        let mut message = group_message("hello");
        message.context.is_reply_to_bot = true;
        let reply = runtime.handle_message(&message).await.expect("reply");
        assert!(reply.text.ends_with(COMPLETION_FAILURE_REPLY));
    }

    #[tokio::test]
    async fn attachments_need_a_trigger_word_in_the_caption() {
        let llm = Arc::new(ScriptedLlm::replying(vec![Ok("Một chiếc máy ảnh.".to_owned())]));
        let runtime = runtime_with(llm.clone(), Duration::from_secs(5)).await;
        let mut attachment = InboundAttachment {
            conversation_id: "-100".to_owned(),
            sender: "alice".to_owned(),
            caption: Some("ảnh đẹp".to_owned()),
            bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".to_owned(),
            correlation_id: "corr-2".to_owned(),
        };

        assert!(runtime.handle_attachment(&attachment).await.is_none());

        attachment.caption = Some("bot ơi đây là gì".to_owned());
        let reply = runtime.handle_attachment(&attachment).await.expect("reply");
        assert_eq!(reply.text, "@alice Một chiếc máy ảnh.");
        assert_eq!(llm.requests.lock().await[0][0].content, "đây là gì [3 bytes]");
    }

    #[tokio::test]
    async fn slash_path_always_answers() {
        let llm = Arc::new(ScriptedLlm::default());
        let runtime = runtime_with(llm, Duration::from_secs(5)).await;

        let reply = runtime
            .execute_intent(
                "-100",
                &crate::intent::Intent::WhoIsRenting { id: DeviceId::new("ZZZ") },
                "alice",
                "corr-3",
            )
            .await;
        assert!(reply.text.contains("ZZZ"));
    }
}
