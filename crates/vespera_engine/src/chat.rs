//! The rolling chat buffer and the keyword helpers built on top of it.

use std::collections::VecDeque;
use vespera_core::ChatMessage;

/// Bounded FIFO of recent chat messages. Oldest messages are evicted
/// when a push would exceed capacity, so the length never exceeds the
/// configured bound.
#[derive(Debug)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// Change capacity at runtime (hot reload), evicting oldest entries
    /// when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Render the buffer as "name: text" lines, oldest first, for use as
    /// generation context. Empty string for an empty buffer.
    pub fn context_block(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.sender_name(), m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// True when `text` contains any of the configured priority keywords,
/// case-insensitively. Empty keywords are skipped.
pub fn has_priority_keyword(keywords: &[String], text: &str) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|kw| {
        let kw = kw.to_lowercase();
        !kw.is_empty() && lowered.contains(&kw)
    })
}

/// True when `text` mentions the persona by its alias, case-insensitively.
/// An empty alias never matches.
pub fn mentions(alias: &str, text: &str) -> bool {
    let alias = alias.to_lowercase();
    !alias.is_empty() && text.to_lowercase().contains(&alias)
}
