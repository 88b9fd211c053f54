use serde::{Deserialize, Serialize};

use crate::{
    error::ConversationError,
    recall::RecallController,
    types::{Message, MessagePatch, ReactionKind},
};

/// Result of upserting a reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionChange {
    pub previous: Option<ReactionKind>,
    pub current: ReactionKind,
    /// Patch to commit, `None` when the reactor already had this reaction.
    pub patch: Option<MessagePatch>,
}

impl ReactionChange {
    pub fn is_noop(&self) -> bool {
        self.patch.is_none()
    }
}

/// Grouped reactions of one kind, for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub kind: ReactionKind,
    pub count: usize,
    pub reactor_ids: Vec<String>,
}

/// Upserts per-reactor reactions. One reaction per reactor, last write wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactionEngine;

impl ReactionEngine {
    /// Set `reactor_id`'s reaction on `message` to `kind`.
    ///
    /// Reacting again with the same kind changes nothing; a different kind
    /// replaces the previous one. Recalled messages reject reactions.
    pub fn react(
        &self,
        message: &mut Message,
        reactor_id: &str,
        kind: ReactionKind,
    ) -> Result<ReactionChange, ConversationError> {
        RecallController::ensure_actionable(message, "react to")?;

        let previous = message.reaction_of(reactor_id);
        if previous == Some(kind) {
            return Ok(ReactionChange {
                previous,
                current: kind,
                patch: None,
            });
        }

        let patch = MessagePatch::UpsertReaction {
            reactor_id: reactor_id.to_owned(),
            kind,
        };
        patch.apply_to(message);
        Ok(ReactionChange {
            previous,
            current: kind,
            patch: Some(patch),
        })
    }

    /// Group visible reactions by kind in picker order.
    ///
    /// Reactions on recalled messages stay in the data but are not shown.
    pub fn summarize(&self, message: &Message) -> Vec<ReactionSummary> {
        if message.is_recalled {
            return Vec::new();
        }

        ReactionKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let reactor_ids: Vec<String> = message
                    .reactions
                    .iter()
                    .filter(|(_, reaction)| **reaction == kind)
                    .map(|(reactor, _)| reactor.clone())
                    .collect();
                (!reactor_ids.is_empty()).then(|| ReactionSummary {
                    kind,
                    count: reactor_ids.len(),
                    reactor_ids,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::error::ConversationErrorCategory;

    fn message() -> Message {
        Message {
            id: "m1".to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: "@p".to_owned(),
            content: Some("hello".to_owned()),
            media_files: Vec::new(),
            reply_to: None,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::new(),
            is_recalled: false,
            created_at_ms: 1,
        }
    }

    #[test]
    fn reacting_twice_with_same_kind_keeps_one_entry() {
        let mut msg = message();
        let first = ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Like)
            .expect("first reaction should apply");
        let second = ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Like)
            .expect("repeat reaction should be accepted");

        assert!(!first.is_noop());
        assert!(second.is_noop());
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reaction_of("@v"), Some(ReactionKind::Like));
    }

    #[test]
    fn different_kind_replaces_previous_reaction() {
        let mut msg = message();
        ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Like)
            .expect("like should apply");
        let change = ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Heart)
            .expect("heart should apply");

        assert_eq!(change.previous, Some(ReactionKind::Like));
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reaction_of("@v"), Some(ReactionKind::Heart));
    }

    #[test]
    fn reactors_are_independent() {
        let mut msg = message();
        ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Wow)
            .expect("viewer reaction");
        ReactionEngine
            .react(&mut msg, "@p", ReactionKind::Sad)
            .expect("partner reaction");

        assert_eq!(msg.reaction_of("@v"), Some(ReactionKind::Wow));
        assert_eq!(msg.reaction_of("@p"), Some(ReactionKind::Sad));
    }

    #[test]
    fn recalled_message_rejects_reaction_unchanged() {
        let mut msg = message();
        msg.reactions.insert("@p".to_owned(), ReactionKind::Haha);
        msg.is_recalled = true;
        let before = msg.reactions.clone();

        let err = ReactionEngine
            .react(&mut msg, "@v", ReactionKind::Angry)
            .expect_err("recalled message must reject reactions");

        assert_eq!(err.category, ConversationErrorCategory::InvalidState);
        assert_eq!(msg.reactions, before);
    }

    #[test]
    fn summary_groups_in_picker_order_and_hides_recalled() {
        let mut msg = message();
        msg.reactions.insert("@a".to_owned(), ReactionKind::Heart);
        msg.reactions.insert("@b".to_owned(), ReactionKind::Like);
        msg.reactions.insert("@c".to_owned(), ReactionKind::Heart);

        let summary = ReactionEngine.summarize(&msg);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].kind, ReactionKind::Like);
        assert_eq!(summary[1].kind, ReactionKind::Heart);
        assert_eq!(summary[1].count, 2);
        assert_eq!(summary[1].reactor_ids, vec!["@a".to_owned(), "@c".to_owned()]);

        msg.is_recalled = true;
        assert!(ReactionEngine.summarize(&msg).is_empty());
    }

    #[test]
    fn parses_reaction_kinds_at_the_boundary() {
        assert_eq!("Heart".parse::<ReactionKind>(), Ok(ReactionKind::Heart));
        assert_eq!(" haha ".parse::<ReactionKind>(), Ok(ReactionKind::Haha));

        let empty = "".parse::<ReactionKind>().expect_err("empty must be rejected");
        assert_eq!(empty.category, ConversationErrorCategory::InvalidInput);
        let unknown = "meh"
            .parse::<ReactionKind>()
            .expect_err("unknown must be rejected");
        assert_eq!(unknown.code, "invalid_input");
    }
}
