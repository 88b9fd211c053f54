use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for user-facing handling and rollback behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConversationErrorCategory {
    /// Action attempted by an actor that does not own the target.
    Unauthorized,
    /// Target is in a state incompatible with the action.
    InvalidState,
    /// The store could not confirm an optimistic mutation.
    RemoteCommit,
    /// Malformed input rejected at the boundary.
    InvalidInput,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ConversationError {
    /// High-level error category.
    pub category: ConversationErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ConversationError {
    pub fn new(
        category: ConversationErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// `actor_id` tried to act on something it does not own.
    pub fn unauthorized(action: &str, actor_id: &str, message_id: &str) -> Self {
        Self::new(
            ConversationErrorCategory::Unauthorized,
            "unauthorized",
            format!("'{actor_id}' may not {action} message '{message_id}'"),
        )
    }

    /// The target message is recalled (or otherwise terminal).
    pub fn invalid_state(action: &str, message_id: &str) -> Self {
        Self::new(
            ConversationErrorCategory::InvalidState,
            "invalid_state",
            format!("cannot {action} message '{message_id}' in its current state"),
        )
    }

    /// The command needs a live conversation session.
    pub fn no_active_conversation(current: SessionState, action: &str) -> Self {
        Self::new(
            ConversationErrorCategory::InvalidState,
            "no_active_conversation",
            format!("cannot run '{action}' while session is {current:?}"),
        )
    }

    pub fn message_not_found(message_id: &str) -> Self {
        Self::new(
            ConversationErrorCategory::InvalidState,
            "message_not_found",
            format!("message '{message_id}' is not in the loaded window"),
        )
    }

    pub fn remote_commit(message: impl Into<String>) -> Self {
        Self::new(
            ConversationErrorCategory::RemoteCommit,
            "remote_commit_failed",
            message,
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(
            ConversationErrorCategory::InvalidInput,
            "invalid_input",
            message,
        )
    }

    /// Retrying the same action later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category, ConversationErrorCategory::RemoteCommit)
    }
}
