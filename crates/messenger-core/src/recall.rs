use serde::{Deserialize, Serialize};

use crate::{
    error::ConversationError,
    types::{Message, MessagePatch},
};

/// Recall state of a message. `Recalled` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecallState {
    Active,
    Recalled,
}

impl RecallState {
    pub fn of(message: &Message) -> Self {
        if message.is_recalled {
            Self::Recalled
        } else {
            Self::Active
        }
    }
}

/// Drives the `Active -> Recalled` transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecallController;

impl RecallController {
    /// Recall `message` on behalf of `requester_id`.
    ///
    /// Only the sender may recall, and only once. On success the message is
    /// recalled in place and the patch to send to the store is returned.
    pub fn recall(
        &self,
        message: &mut Message,
        requester_id: &str,
    ) -> Result<MessagePatch, ConversationError> {
        if !message.is_authored_by(requester_id) {
            return Err(ConversationError::unauthorized(
                "recall",
                requester_id,
                &message.id,
            ));
        }
        if RecallState::of(message) != RecallState::Active {
            return Err(ConversationError::invalid_state("recall", &message.id));
        }

        let patch = MessagePatch::Recall;
        patch.apply_to(message);
        Ok(patch)
    }

    /// Reject `action` on a recalled message.
    pub fn ensure_actionable(message: &Message, action: &str) -> Result<(), ConversationError> {
        match RecallState::of(message) {
            RecallState::Active => Ok(()),
            RecallState::Recalled => Err(ConversationError::invalid_state(action, &message.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::{error::ConversationErrorCategory, types::ReactionKind};

    fn message(sender: &str) -> Message {
        let mut reactions = BTreeMap::new();
        reactions.insert("@p".to_owned(), ReactionKind::Like);
        Message {
            id: "m1".to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: sender.to_owned(),
            content: Some("secret".to_owned()),
            media_files: Vec::new(),
            reply_to: None,
            reactions,
            read_by: BTreeSet::new(),
            is_recalled: false,
            created_at_ms: 1,
        }
    }

    #[test]
    fn sender_can_recall_once() {
        let mut msg = message("@v");
        let patch = RecallController
            .recall(&mut msg, "@v")
            .expect("sender recall should work");

        assert_eq!(patch, MessagePatch::Recall);
        assert_eq!(RecallState::of(&msg), RecallState::Recalled);
        assert_eq!(msg.content, None);
        assert_eq!(msg.reactions.len(), 1, "stored reactions are kept");
    }

    #[test]
    fn rejects_recall_by_non_sender_without_state_change() {
        let mut msg = message("@v");
        let err = RecallController
            .recall(&mut msg, "@p")
            .expect_err("partner must not recall");

        assert_eq!(err.category, ConversationErrorCategory::Unauthorized);
        assert!(!msg.is_recalled);
        assert_eq!(msg.content.as_deref(), Some("secret"));
    }

    #[test]
    fn recalled_is_terminal() {
        let mut msg = message("@v");
        RecallController
            .recall(&mut msg, "@v")
            .expect("first recall should work");

        let err = RecallController
            .recall(&mut msg, "@v")
            .expect_err("second recall must fail");
        assert_eq!(err.category, ConversationErrorCategory::InvalidState);
        assert_eq!(RecallState::of(&msg), RecallState::Recalled);
    }

    #[test]
    fn recalled_messages_are_not_actionable() {
        let mut msg = message("@v");
        assert!(RecallController::ensure_actionable(&msg, "react to").is_ok());

        msg.is_recalled = true;
        let err = RecallController::ensure_actionable(&msg, "reply to")
            .expect_err("recalled message must reject actions");
        assert_eq!(err.code, "invalid_state");
    }
}
