use crate::{
    error::ConversationError,
    types::{ConversationCommand, ConversationEvent, SessionState},
};

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    /// Validate a command against the current state and apply lifecycle
    /// transitions it implies.
    pub fn apply(
        &mut self,
        command: &ConversationCommand,
    ) -> Result<Vec<ConversationEvent>, ConversationError> {
        use ConversationCommand::*;

        match command {
            Open { .. } => Ok(self.transition_to(SessionState::Subscribing)),
            Close | Shutdown => Ok(self.transition_to(SessionState::Idle)),
            SendMessage { .. }
            | React { .. }
            | Recall { .. }
            | BeginReply { .. }
            | MarkRead => {
                self.require_live(command_name(command))?;
                Ok(Vec::new())
            }
            CancelReply | Pointer(_) | SetTheme(_) => {
                if self.state == SessionState::Idle {
                    Err(ConversationError::no_active_conversation(
                        self.state,
                        command_name(command),
                    ))
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// A snapshot was applied for the active subscription.
    pub fn on_snapshot(&mut self) -> Result<Vec<ConversationEvent>, ConversationError> {
        self.transition_from_any_of(
            &[SessionState::Subscribing, SessionState::Live],
            SessionState::Live,
            "apply snapshot",
        )
    }

    /// The snapshot stream of the active subscription ended.
    pub fn on_stream_lost(&mut self) -> Result<Vec<ConversationEvent>, ConversationError> {
        self.transition_from_any_of(
            &[SessionState::Subscribing, SessionState::Live],
            SessionState::Subscribing,
            "stream lost",
        )
    }

    pub fn require_live(&self, action: &str) -> Result<(), ConversationError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(ConversationError::no_active_conversation(self.state, action))
        }
    }

    fn transition_to(&mut self, next: SessionState) -> Vec<ConversationEvent> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        vec![ConversationEvent::LifecycleChanged { state: next }]
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionState],
        next: SessionState,
        action: &str,
    ) -> Result<Vec<ConversationEvent>, ConversationError> {
        if !expected.contains(&self.state) {
            return Err(ConversationError::no_active_conversation(self.state, action));
        }
        Ok(self.transition_to(next))
    }
}

fn command_name(command: &ConversationCommand) -> &'static str {
    match command {
        ConversationCommand::Open { .. } => "open",
        ConversationCommand::Close => "close",
        ConversationCommand::SendMessage { .. } => "send_message",
        ConversationCommand::React { .. } => "react",
        ConversationCommand::Recall { .. } => "recall",
        ConversationCommand::BeginReply { .. } => "begin_reply",
        ConversationCommand::CancelReply => "cancel_reply",
        ConversationCommand::MarkRead => "mark_read",
        ConversationCommand::Pointer(_) => "pointer",
        ConversationCommand::SetTheme(_) => "set_theme",
        ConversationCommand::Shutdown => "shutdown",
    }
}
