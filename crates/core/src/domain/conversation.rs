use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Role/content pair handed to the completion collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    /// Display name of the sender, only set on `user` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Set only on the injected inventory snapshot: the inventory revision it
    /// was rendered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_revision: Option<u64>,
}

impl ConversationEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), user: None, inventory_revision: None }
    }

    pub fn user(content: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            user: display_name,
            inventory_revision: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            user: None,
            inventory_revision: None,
        }
    }

    pub fn inventory_snapshot(content: impl Into<String>, revision: u64) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            user: None,
            inventory_revision: Some(revision),
        }
    }

    pub fn is_inventory_snapshot(&self) -> bool {
        self.inventory_revision.is_some()
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

/// Ordered message log of one conversation. Entry 0 is always the system
/// instruction; position 1 holds the inventory snapshot once one is installed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
}

impl ConversationLog {
    pub fn seeded(instruction: impl Into<String>) -> Self {
        Self { entries: vec![ConversationEntry::system(instruction)] }
    }

    /// Repairs logs loaded from disk that lost their instruction entry.
    pub fn ensure_seeded(&mut self, instruction: &str) {
        let seeded = self
            .entries
            .first()
            .map(|entry| entry.role == Role::System && !entry.is_inventory_snapshot())
            .unwrap_or(false);
        if !seeded {
            self.entries.insert(0, ConversationEntry::system(instruction));
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
    }

    /// Revision of the live snapshot at position 1, if any.
    pub fn snapshot_revision(&self) -> Option<u64> {
        self.entries.get(1).and_then(|entry| entry.inventory_revision)
    }

    /// Replaces every snapshot entry with a single fresh one at position 1.
    pub fn install_snapshot(&mut self, content: impl Into<String>, revision: u64) {
        let head = self.entries.first().cloned();
        self.entries.retain(|entry| !entry.is_inventory_snapshot());
        let position = if head.is_some() { 1 } else { 0 };
        self.entries.insert(position, ConversationEntry::inventory_snapshot(content, revision));
    }

    /// Role/content pairs in stored order. With a window, only the instruction,
    /// the snapshot and the last `window` turns are returned; the log itself is
    /// left untouched.
    pub fn to_messages(&self, window: Option<usize>) -> Vec<ChatMessage> {
        let pinned = if self.snapshot_revision().is_some() { 2 } else { 1 };
        let pinned = pinned.min(self.entries.len());
        let tail = &self.entries[pinned..];
        let skip = match window {
            Some(window) => tail.len().saturating_sub(window),
            None => 0,
        };

        self.entries[..pinned]
            .iter()
            .chain(tail.iter().skip(skip))
            .map(ConversationEntry::to_message)
            .collect()
    }

    /// Distinct display names found on user entries.
    pub fn participants(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.role == Role::User)
            .filter_map(|entry| entry.user.clone())
            .filter(|user| !user.is_empty())
            .collect()
    }

    /// Drops every entry authored by `user`; returns how many were removed.
    pub fn forget_user(&mut self, user: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.user.as_deref() != Some(user));
        before - self.entries.len()
    }
}
