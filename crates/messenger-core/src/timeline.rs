use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::types::{Message, MessagePatch};

/// Errors that can occur while applying timeline operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// An operation referenced a message id that is not present in the window.
    #[error("timeline message with id '{0}' was not found")]
    MissingMessage(String),
}

/// Incremental operation applied to a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineOp {
    /// Insert a message at its ordered position (replacing a same-id message).
    Insert(Message),
    /// Patch fields of an existing message.
    Patch { message_id: String, patch: MessagePatch },
    /// Remove a message from the window.
    Remove { message_id: String },
}

/// Difference between two consecutive snapshots of the same conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineDiff {
    /// Ids that were not in the previous window.
    pub inserted: Vec<String>,
    /// Ids present in both windows whose fields changed.
    pub updated: Vec<String>,
    /// Ids that left the window.
    pub removed: Vec<String>,
    /// The newest message is one that was not shown before.
    pub grew_at_tail: bool,
}

impl TimelineDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Ordered message window of a single conversation.
///
/// Messages are kept sorted by `(created_at, id)` no matter in which order
/// they arrive, deduplicated by id, and capped at `max_items` (oldest dropped).
#[derive(Debug, Clone)]
pub struct ConversationTimeline {
    items: Vec<Message>,
    max_items: usize,
}

impl ConversationTimeline {
    /// Create a timeline with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.items.iter().find(|message| message.id == message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.get(message_id).is_some()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.items.last()
    }

    /// Replace the window with a full snapshot and report what changed.
    pub fn replace_snapshot(&mut self, messages: Vec<Message>) -> TimelineDiff {
        let next = order_dedupe_and_trim(messages, self.max_items);
        let diff = diff_windows(&self.items, &next);
        self.items = next;
        diff
    }

    /// Apply timeline operations in order.
    pub fn apply_ops(&mut self, ops: &[TimelineOp]) -> Result<(), TimelineMergeError> {
        for op in ops {
            match op {
                TimelineOp::Insert(message) => self.insert_ordered(message.clone()),
                TimelineOp::Patch { message_id, patch } => {
                    let message = self
                        .items
                        .iter_mut()
                        .find(|it| it.id == *message_id)
                        .ok_or_else(|| TimelineMergeError::MissingMessage(message_id.clone()))?;
                    patch.apply_to(message);
                }
                TimelineOp::Remove { message_id } => {
                    let idx = self
                        .items
                        .iter()
                        .position(|it| it.id == *message_id)
                        .ok_or_else(|| TimelineMergeError::MissingMessage(message_id.clone()))?;
                    self.items.remove(idx);
                }
            }
            self.trim_to_max();
        }

        Ok(())
    }

    fn insert_ordered(&mut self, message: Message) {
        if let Some(idx) = self.items.iter().position(|it| it.id == message.id) {
            self.items.remove(idx);
        }
        let idx = self
            .items
            .partition_point(|it| it.order_key() < message.order_key());
        self.items.insert(idx, message);
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }

        let excess = self.items.len() - self.max_items;
        self.items.drain(0..excess);
    }
}

fn order_dedupe_and_trim(messages: Vec<Message>, max_items: usize) -> Vec<Message> {
    let mut seen_ids = HashSet::new();
    let mut reversed = Vec::with_capacity(messages.len());

    for message in messages.into_iter().rev() {
        if seen_ids.insert(message.id.clone()) {
            reversed.push(message);
        }
    }

    reversed.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    if reversed.len() > max_items {
        let excess = reversed.len() - max_items;
        reversed.drain(0..excess);
    }
    reversed
}

fn diff_windows(previous: &[Message], next: &[Message]) -> TimelineDiff {
    let previous_by_id: HashMap<&str, &Message> = previous
        .iter()
        .map(|message| (message.id.as_str(), message))
        .collect();
    let next_ids: HashSet<&str> = next.iter().map(|message| message.id.as_str()).collect();

    let mut diff = TimelineDiff::default();
    for message in next {
        match previous_by_id.get(message.id.as_str()) {
            None => diff.inserted.push(message.id.clone()),
            Some(old) if *old != message => diff.updated.push(message.id.clone()),
            Some(_) => {}
        }
    }
    diff.removed = previous
        .iter()
        .filter(|message| !next_ids.contains(message.id.as_str()))
        .map(|message| message.id.clone())
        .collect();
    diff.grew_at_tail = next
        .last()
        .is_some_and(|newest| !previous_by_id.contains_key(newest.id.as_str()));
    diff
}
