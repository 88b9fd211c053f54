use serde::{Deserialize, Serialize};

use crate::types::{Message, MessagePatch};

/// Read status mark shown on the viewer's own messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReadMark {
    /// Sent, not yet read by the partner (single check).
    Sent,
    /// Read by the partner (double check).
    Read,
}

/// Derives read state from a message's read-marker set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadTracker;

impl ReadTracker {
    pub fn is_read(&self, message: &Message, partner_id: &str) -> bool {
        message.read_by.contains(partner_id)
    }

    /// Mark to display, only for messages authored by `viewer_id`.
    pub fn mark_for(
        &self,
        message: &Message,
        viewer_id: &str,
        partner_id: &str,
    ) -> Option<ReadMark> {
        if !message.is_authored_by(viewer_id) {
            return None;
        }
        Some(if self.is_read(message, partner_id) {
            ReadMark::Read
        } else {
            ReadMark::Sent
        })
    }

    /// Record that `reader_id` saw `message`. Returns the patch to commit,
    /// or `None` when the marker was already present.
    pub fn mark_read(&self, message: &mut Message, reader_id: &str) -> Option<MessagePatch> {
        let patch = MessagePatch::AddReader {
            reader_id: reader_id.to_owned(),
        };
        patch.apply_to(message).then_some(patch)
    }

    /// Ids of messages from other participants not yet read by `reader_id`.
    pub fn unread_by<'a>(
        self,
        window: &'a [Message],
        reader_id: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        window
            .iter()
            .filter(move |message| {
                !message.is_authored_by(reader_id) && !message.read_by.contains(reader_id)
            })
            .map(|message| message.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    fn message(id: &str, sender: &str) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: sender.to_owned(),
            content: Some("hi".to_owned()),
            media_files: Vec::new(),
            reply_to: None,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::new(),
            is_recalled: false,
            created_at_ms: 1,
        }
    }

    #[test]
    fn own_message_switches_from_single_to_double_mark() {
        let mut msg = message("m1", "@v");
        assert_eq!(ReadTracker.mark_for(&msg, "@v", "@p"), Some(ReadMark::Sent));

        ReadTracker.mark_read(&mut msg, "@p");
        assert_eq!(ReadTracker.mark_for(&msg, "@v", "@p"), Some(ReadMark::Read));
    }

    #[test]
    fn partner_messages_have_no_mark() {
        let msg = message("m1", "@p");
        assert_eq!(ReadTracker.mark_for(&msg, "@v", "@p"), None);
    }

    #[test]
    fn read_markers_only_grow() {
        let mut msg = message("m1", "@v");
        assert!(ReadTracker.mark_read(&mut msg, "@p").is_some());
        assert!(ReadTracker.mark_read(&mut msg, "@p").is_none());
        assert_eq!(msg.read_by.len(), 1);
        assert!(ReadTracker.is_read(&msg, "@p"));
    }

    #[test]
    fn lists_unread_partner_messages() {
        let mut read = message("m2", "@p");
        read.read_by.insert("@v".to_owned());
        let window = vec![message("m1", "@p"), read, message("m3", "@v")];

        let unread: Vec<&str> = ReadTracker.unread_by(&window, "@v").collect();
        assert_eq!(unread, vec!["m1"]);
    }
}
