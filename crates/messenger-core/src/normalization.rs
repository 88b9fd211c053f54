use crate::{
    error::ConversationError,
    mutation::MutationState,
    types::{ConversationEvent, MutationAck, Notice},
};

/// Store result for a dispatched mutation, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The store acknowledged the write.
    Committed,
    /// The write could not be confirmed.
    Failed { error: ConversationError },
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Build the acknowledgement for a settled mutation.
pub fn normalize_mutation_outcome(
    mutation_id: u64,
    message_id: impl Into<String>,
    outcome: &MutationOutcome,
) -> MutationAck {
    let message_id = message_id.into();
    match outcome {
        MutationOutcome::Committed => MutationAck {
            mutation_id,
            message_id,
            state: MutationState::Committed,
            error_code: None,
        },
        MutationOutcome::Failed { error } => MutationAck {
            mutation_id,
            message_id,
            state: MutationState::RolledBack,
            error_code: Some(error.code.clone()),
        },
    }
}

/// Convert a locally rejected command into an `ActionRejected` event.
pub fn normalize_rejection(error: ConversationError) -> ConversationEvent {
    ConversationEvent::ActionRejected {
        code: error.code,
        message: error.message,
    }
}

/// Transient notice shown after a rollback.
pub fn rollback_notice(error: &ConversationError) -> Notice {
    Notice {
        code: error.code.clone(),
        message: format!("Your change could not be saved: {}", error.message),
        recoverable: error.is_recoverable(),
    }
}
