use rentdesk_core::text;

/// Where a message came from, as far as addressing is concerned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressContext {
    pub is_private: bool,
    pub is_reply_to_bot: bool,
    pub mentions_bot: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Respond { reason_code: &'static str },
    Ignore { reason_code: &'static str },
}

impl GateDecision {
    pub fn is_respond(&self) -> bool {
        matches!(self, Self::Respond { .. })
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Respond { reason_code } | Self::Ignore { reason_code } => reason_code,
        }
    }
}

/// Decides whether free text is meant for the assistant. Trigger words match
/// as whole words, ignoring case and diacritics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressGate {
    triggers: Vec<Vec<String>>,
}

impl AddressGate {
    pub fn new(trigger_words: &[String]) -> Self {
        let triggers = trigger_words
            .iter()
            .map(|word| text::tokens(word))
            .filter(|tokens| !tokens.is_empty())
            .collect();
        Self { triggers }
    }

    pub fn contains_trigger(&self, input: &str) -> bool {
        let tokens = text::tokens(input);
        self.triggers.iter().any(|trigger| {
            tokens.windows(trigger.len()).any(|window| window == trigger.as_slice())
        })
    }

    pub fn evaluate(&self, input: &str, context: AddressContext) -> GateDecision {
        if context.is_private {
            GateDecision::Respond { reason_code: "private_chat" }
        } else if context.mentions_bot {
            GateDecision::Respond { reason_code: "bot_mentioned" }
        } else if context.is_reply_to_bot {
            GateDecision::Respond { reason_code: "reply_to_bot" }
        } else if self.contains_trigger(input) {
            GateDecision::Respond { reason_code: "trigger_word" }
        } else {
            GateDecision::Ignore { reason_code: "not_addressed" }
        }
    }

    /// Removes trigger words (and a vocative `ơi` right after one) line by
    /// line, keeping line breaks so list blocks survive.
    pub fn strip(&self, input: &str) -> String {
        self.strip_addressing(input, None)
    }

    /// [`strip`](Self::strip) plus `@<bot_username>` mentions, matched
    /// case-insensitively.
    pub fn strip_addressing(&self, input: &str, bot_username: Option<&str>) -> String {
        let mention = bot_username
            .map(|username| username.trim_start_matches('@'))
            .filter(|username| !username.is_empty())
            .map(|username| format!("@{}", username.to_lowercase()));
        input
            .lines()
            .map(|line| self.strip_line(line, mention.as_deref()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn strip_line(&self, line: &str, mention: Option<&str>) -> String {
        let words = line.split_whitespace().collect::<Vec<_>>();
        let folded = words.iter().map(|word| text::fold(word)).collect::<Vec<_>>();
        let mut kept = Vec::with_capacity(words.len());
        let mut index = 0;

        while index < words.len() {
            let is_mention = mention.is_some_and(|mention| {
                words[index].trim_end_matches([',', ':', '.', '!', '?']).to_lowercase() == mention
            });
            let matched_len = if is_mention {
                Some(1)
            } else {
                self.triggers
                    .iter()
                    .find(|trigger| {
                        index + trigger.len() <= words.len()
                            && trigger
                                .iter()
                                .enumerate()
                                .all(|(offset, token)| folded[index + offset] == *token)
                    })
                    .map(Vec::len)
            };

            match matched_len {
                Some(len) => {
                    index += len;
                    if folded.get(index).map(String::as_str) == Some("oi") {
                        index += 1;
                    }
                }
                None => {
                    kept.push(words[index]);
                    index += 1;
                }
            }
        }

        kept.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressContext, AddressGate, GateDecision};

    fn gate() -> AddressGate {
        AddressGate::new(&["bot".to_owned(), "trợ lý".to_owned()])
    }

    #[test]
    fn trigger_word_must_be_whole_word() {
        let gate = gate();
        assert!(gate.contains_trigger("BOT, giúp mình với"));
        assert!(gate.contains_trigger("hỏi tro ly xem"));
        assert!(!gate.contains_trigger("robot hút bụi"));
    }

    #[test]
    fn private_chat_and_replies_bypass_trigger_words() {
        let gate = gate();
        let private = AddressContext { is_private: true, ..AddressContext::default() };
        let reply = AddressContext { is_reply_to_bot: true, ..AddressContext::default() };

        assert_eq!(
            gate.evaluate("xin chào", private),
            GateDecision::Respond { reason_code: "private_chat" }
        );
        assert!(gate.evaluate("xin chào", reply).is_respond());
        assert_eq!(gate.evaluate("xin chào", AddressContext::default()).reason_code(), "not_addressed");
        assert!(gate.evaluate("bot ơi", AddressContext::default()).is_respond());
    }

    #[test]
    fn strip_removes_triggers_and_vocative() {
        let gate = gate();
        assert_eq!(gate.strip("Bot ơi, xoá CAM"), "xoá CAM");
        assert_eq!(gate.strip("bot ơi xoá CAM"), "xoá CAM");
        assert_eq!(gate.strip("nhờ trợ lý thuê CAM 2"), "nhờ thuê CAM 2");
        assert_eq!(gate.strip("bot\nCamera A, 3\nCamera B, 1"), "\nCamera A, 3\nCamera B, 1");
    }

    #[test]
    fn strip_addressing_removes_bot_mentions_only() {
        let gate = gate();
        let bot = Some("RentdeskBot");
        assert_eq!(gate.strip_addressing("@rentdeskbot xoá CAM", bot), "xoá CAM");
        assert_eq!(gate.strip_addressing("@RentdeskBot, ơi thuê CAM", bot), "thuê CAM");
        assert_eq!(gate.strip_addressing("cho @rentdeskbot hỏi @alice thuê gì", bot), "cho hỏi @alice thuê gì");
        assert_eq!(
            gate.strip_addressing("@rentdeskbot\nCamera A, 3", bot),
            "\nCamera A, 3"
        );
        assert_eq!(gate.strip("@rentdeskbot xoá CAM"), "@rentdeskbot xoá CAM");
    }
}
