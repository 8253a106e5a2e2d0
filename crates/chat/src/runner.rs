use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{ChatEnvelope, EventContext, EventDispatcher, HandlerResult};
use crate::reply::ReplyMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// A chat network connection. `next_envelope` waits for the next update and
/// returns `None` once the stream is closed.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn send(&self, reply: &ReplyMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

struct PumpFailure {
    error: TransportError,
    processed: u64,
}

pub struct PollingRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Pumps updates until the stream closes or reconnects are exhausted.
    /// Failures never escape as errors; the process keeps running.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0_u32;
        loop {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    // A connection that delivered updates earns a fresh retry budget.
                    if failure.processed > 0 {
                        attempt = 0;
                    }
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        processed = failure.processed,
                        error = %failure.error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        let mut processed = 0_u64;
        let fail = |error: TransportError, processed: u64| PumpFailure { error, processed };

        info!(attempt, "opening chat transport connection");
        self.transport.connect().await.map_err(|error| fail(error, processed))?;
        info!(attempt, "chat transport connected");

        loop {
            let next = self.transport.next_envelope().await.map_err(|error| fail(error, processed))?;
            let Some(envelope) = next else {
                info!(attempt, "chat transport stream closed");
                self.transport.disconnect().await.map_err(|error| fail(error, processed))?;
                return Ok(());
            };
            processed += 1;
            self.handle_envelope(&envelope).await;
        }
    }

    async fn handle_envelope(&self, envelope: &ChatEnvelope) {
        let chat_id = envelope.event.chat_id().map(|id| id.to_string());
        info!(
            event_name = "ingress.chat.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            chat_id = chat_id.as_deref().unwrap_or("unknown"),
            "received chat envelope"
        );

        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.chat.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "failed to acknowledge chat envelope"
            );
        } else {
            debug!(
                event_name = "ingress.chat.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged chat envelope"
            );
        }

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        let reply = match self.dispatcher.dispatch(envelope, &context).await {
            Ok(HandlerResult::Responded(reply)) => reply,
            Ok(HandlerResult::Processed | HandlerResult::Ignored) => return,
            Err(error) => {
                warn!(
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    chat_id = chat_id.as_deref().unwrap_or("unknown"),
                    error = %error,
                    "event dispatch failed; continuing chat loop"
                );
                return;
            }
        };

        match self.transport.send(&reply).await {
            Ok(()) => debug!(
                event_name = "egress.chat.reply_sent",
                correlation_id = %envelope.envelope_id,
                chat_id = reply.chat_id,
                "reply sent"
            ),
            Err(error) => warn!(
                event_name = "egress.chat.send_failed",
                correlation_id = %envelope.envelope_id,
                chat_id = reply.chat_id,
                error = %error,
                "failed to send reply; continuing chat loop"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ChatTransport, PollingRunner, ReconnectPolicy, TransportError};
    use crate::events::{
        ChatEnvelope, ChatEvent, ChatEventType, EventContext, EventDispatcher, EventHandler,
        EventHandlerError, HandlerResult,
    };
    use crate::reply::ReplyMessage;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        send_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        sent: Vec<ReplyMessage>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            self.state.lock().await.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            self.state.lock().await.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn send(&self, reply: &ReplyMessage) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.sent.push(reply.clone());
            state.send_results.pop_front().unwrap_or(Ok(()))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl EventHandler for EchoHandler {
        fn event_type(&self) -> ChatEventType {
            ChatEventType::Unsupported
        }

        async fn handle(
            &self,
            envelope: &ChatEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            Ok(HandlerResult::Responded(ReplyMessage::plain(1, envelope.envelope_id.clone())))
        }
    }

    fn unsupported(id: &str) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(Some(ChatEnvelope {
            envelope_id: id.to_owned(),
            event: ChatEvent::Unsupported { event_type: "sticker".to_owned() },
        }))
    }

    fn instant(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![unsupported("env-1"), Ok(None)],
        ));

        let runner = PollingRunner::new(transport.clone(), EventDispatcher::default(), instant(2));
        runner.start().await.expect("runner should not fail");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 2);
        assert_eq!(state.acknowledgements, vec!["env-1"]);
        assert!(state.sent.is_empty(), "no handler means no reply");
        assert_eq!(state.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = PollingRunner::new(transport.clone(), EventDispatcher::default(), instant(2));
        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.state.lock().await.connect_attempts, 3);
    }

    #[tokio::test]
    async fn progress_resets_the_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                unsupported("env-1"),
                Err(TransportError::Receive("reset by peer".to_owned())),
                unsupported("env-2"),
                Err(TransportError::Receive("reset by peer".to_owned())),
                unsupported("env-3"),
                Ok(None),
            ],
        ));

        let runner = PollingRunner::new(transport.clone(), EventDispatcher::default(), instant(1));
        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 3);
        assert_eq!(state.acknowledgements, vec!["env-1", "env-2", "env-3"]);
    }

    #[tokio::test]
    async fn replies_are_sent_and_send_failures_do_not_stop_the_loop() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![unsupported("env-1"), unsupported("env-2"), Ok(None)],
        ));
        transport
            .state
            .lock()
            .await
            .send_results
            .push_back(Err(TransportError::Send("429 too many requests".to_owned())));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(EchoHandler);
        let runner = PollingRunner::new(transport.clone(), dispatcher, instant(0));
        runner.start().await.expect("runner");

        let sent = transport.state.lock().await.sent.iter().map(|reply| reply.text.clone()).collect::<Vec<_>>();
        assert_eq!(sent, vec!["env-1", "env-2"]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(10).as_millis(), 5_000);
    }
}
