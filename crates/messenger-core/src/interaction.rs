use serde::{Deserialize, Serialize};

/// Pointer or touch input on the message list. Touch input maps onto the
/// same events (tap = enter + toggle, tap elsewhere = click outside).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PointerEvent {
    /// Pointer entered a message bubble.
    Enter { message_id: String },
    /// Pointer left a message bubble.
    Leave { message_id: String },
    /// Reaction button on a bubble was pressed.
    TogglePicker { message_id: String },
    /// Click or tap that landed outside any open picker.
    ClickOutside,
}

/// Transient hover / reaction-picker state of one conversation view.
///
/// At most one message is hovered and at most one picker is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionState {
    hovered_message_id: Option<String>,
    open_picker_message_id: Option<String>,
}

impl InteractionState {
    pub fn hovered_message_id(&self) -> Option<&str> {
        self.hovered_message_id.as_deref()
    }

    pub fn open_picker_message_id(&self) -> Option<&str> {
        self.open_picker_message_id.as_deref()
    }

    /// Apply one input event. Returns whether the state changed.
    pub fn apply(&mut self, event: &PointerEvent) -> bool {
        let before = self.clone();
        match event {
            PointerEvent::Enter { message_id } => {
                if self.hovered_message_id.as_deref() != Some(message_id.as_str()) {
                    // A picker belongs to the hovered bubble only.
                    if self.open_picker_message_id.as_deref() != Some(message_id.as_str()) {
                        self.open_picker_message_id = None;
                    }
                    self.hovered_message_id = Some(message_id.clone());
                }
            }
            PointerEvent::Leave { message_id } => {
                if self.hovered_message_id.as_deref() == Some(message_id.as_str())
                    || self.open_picker_message_id.as_deref() == Some(message_id.as_str())
                {
                    self.reset();
                }
            }
            PointerEvent::TogglePicker { message_id } => {
                if self.open_picker_message_id.as_deref() == Some(message_id.as_str()) {
                    self.open_picker_message_id = None;
                } else {
                    self.open_picker_message_id = Some(message_id.clone());
                    self.hovered_message_id = Some(message_id.clone());
                }
            }
            PointerEvent::ClickOutside => self.reset(),
        }
        *self != before
    }

    /// Close the picker if it is open on `message_id`.
    pub fn close_picker_for(&mut self, message_id: &str) {
        if self.open_picker_message_id.as_deref() == Some(message_id) {
            self.open_picker_message_id = None;
        }
    }

    /// Drop references to messages that are no longer shown.
    pub fn retain_present(&mut self, is_present: impl Fn(&str) -> bool) {
        if self
            .hovered_message_id
            .as_deref()
            .is_some_and(|id| !is_present(id))
        {
            self.hovered_message_id = None;
        }
        if self
            .open_picker_message_id
            .as_deref()
            .is_some_and(|id| !is_present(id))
        {
            self.open_picker_message_id = None;
        }
    }

    pub fn reset(&mut self) {
        self.hovered_message_id = None;
        self.open_picker_message_id = None;
    }
}
