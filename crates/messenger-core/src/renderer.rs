//! Conversation renderer: owns one conversation's confirmed window, its
//! optimistic mutations and transient interaction state, and projects them
//! into a [`RenderModel`].

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    error::{ConversationError, ConversationErrorCategory},
    interaction::{InteractionState, PointerEvent},
    mutation::{MutationKind, MutationLedger, MutationRequest, MutationState},
    normalization::{MutationOutcome, normalize_mutation_outcome},
    reactions::{ReactionEngine, ReactionSummary},
    read_tracker::{ReadMark, ReadTracker},
    recall::RecallController,
    reply::{ReplyPreview, ReplyResolver},
    theme::{BubblePaint, Color, ConversationTheme, ThemeResolver},
    timeline::{ConversationTimeline, TimelineDiff},
    types::{
        ConversationSnapshot, DraftMessage, MediaFile, Message, MutationAck, ReactionKind,
    },
};

/// Which side of the conversation a bubble sits on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BubbleSide {
    Own,
    Received,
}

/// Whether a message has been committed by the store yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    Sending,
    Sent,
}

/// Affordances the view may offer on a bubble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageActions {
    pub can_react: bool,
    pub can_reply: bool,
    pub can_recall: bool,
}

/// Display attributes of one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message_id: String,
    pub sender_id: String,
    pub side: BubbleSide,
    pub show_avatar: bool,
    /// Text body. Always `None` for recalled messages.
    pub text: Option<String>,
    /// Always empty for recalled messages.
    pub media: Vec<MediaFile>,
    pub is_recalled: bool,
    pub reply: Option<ReplyPreview>,
    pub read_mark: Option<ReadMark>,
    pub paint: BubblePaint,
    pub reactions: Vec<ReactionSummary>,
    pub viewer_reaction: Option<ReactionKind>,
    pub actions: MessageActions,
    pub delivery: DeliveryState,
    pub is_hovered: bool,
    pub picker_open: bool,
    pub created_at_ms: u64,
}

/// Full visual state of the active conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderModel {
    pub conversation_id: String,
    pub background_color: Color,
    pub items: Vec<RenderedMessage>,
    /// The newest message was not shown in the previous frame.
    pub scroll_to_newest: bool,
    /// Quote shown above the composer while a reply is being drafted.
    pub reply_target: Option<ReplyPreview>,
    pub hovered_message_id: Option<String>,
    pub open_picker_message_id: Option<String>,
}

/// Renderer of a single conversation.
///
/// Engines are pure and synchronous; the renderer applies their results
/// optimistically and hands back [`MutationRequest`]s for the caller to send
/// to the store.
#[derive(Debug, Clone)]
pub struct ConversationRenderer {
    conversation_id: String,
    viewer_id: String,
    partner_id: String,
    theme: ConversationTheme,
    confirmed: ConversationTimeline,
    view: ConversationTimeline,
    ledger: MutationLedger,
    interaction: InteractionState,
    reply_target: Option<String>,
    /// Set by the rebuild that grew the tail; cleared by the next interaction.
    scroll_to_newest: bool,
}

impl ConversationRenderer {
    pub fn new(
        conversation_id: impl Into<String>,
        viewer_id: impl Into<String>,
        partner_id: impl Into<String>,
        theme: ConversationTheme,
        max_items: usize,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            viewer_id: viewer_id.into(),
            partner_id: partner_id.into(),
            theme,
            confirmed: ConversationTimeline::new(max_items),
            view: ConversationTimeline::new(max_items),
            ledger: MutationLedger::default(),
            interaction: InteractionState::default(),
            reply_target: None,
            scroll_to_newest: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn theme(&self) -> ConversationTheme {
        self.theme
    }

    /// Messages as currently shown, optimistic changes included.
    pub fn messages(&self) -> &[Message] {
        self.view.messages()
    }

    pub fn interaction(&self) -> &InteractionState {
        &self.interaction
    }

    pub fn reply_target(&self) -> Option<&str> {
        self.reply_target.as_deref()
    }

    pub fn pending_mutations(&self) -> usize {
        self.ledger.pending_count()
    }

    /// Replace the confirmed window with a store snapshot.
    ///
    /// Returns the diff against the previous frame.
    pub fn apply_snapshot(
        &mut self,
        snapshot: ConversationSnapshot,
    ) -> Result<TimelineDiff, ConversationError> {
        if snapshot.conversation_id != self.conversation_id {
            return Err(ConversationError::new(
                ConversationErrorCategory::Internal,
                "snapshot_conversation_mismatch",
                format!(
                    "snapshot for '{}' applied to renderer of '{}'",
                    snapshot.conversation_id, self.conversation_id
                ),
            ));
        }

        self.confirmed.replace_snapshot(snapshot.messages);
        self.ledger.reconcile(&self.confirmed);
        let diff = self.rebuild_view();
        trace!(
            conversation_id = %self.conversation_id,
            revision = snapshot.revision,
            inserted = diff.inserted.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "applied snapshot"
        );
        Ok(diff)
    }

    /// React to a message as the viewer.
    ///
    /// Returns `None` when the viewer already has this reaction.
    pub fn react(
        &mut self,
        message_id: &str,
        kind: ReactionKind,
    ) -> Result<Option<MutationRequest>, ConversationError> {
        self.scroll_to_newest = false;
        let mut target = self.actionable_target(message_id, "react to")?;
        let change = ReactionEngine.react(&mut target, &self.viewer_id, kind)?;
        self.interaction.close_picker_for(message_id);

        let Some(patch) = change.patch else {
            return Ok(None);
        };
        Ok(Some(self.begin(MutationKind::Patch {
            message_id: message_id.to_owned(),
            patch,
        })))
    }

    /// Recall one of the viewer's own messages.
    pub fn recall(&mut self, message_id: &str) -> Result<MutationRequest, ConversationError> {
        self.scroll_to_newest = false;
        let mut target = self.committed_target(message_id, "recall")?;
        let patch = RecallController.recall(&mut target, &self.viewer_id)?;
        self.interaction.close_picker_for(message_id);

        Ok(self.begin(MutationKind::Patch {
            message_id: message_id.to_owned(),
            patch,
        }))
    }

    /// Start drafting a reply quoting `message_id`.
    pub fn begin_reply(&mut self, message_id: &str) -> Result<(), ConversationError> {
        self.scroll_to_newest = false;
        self.actionable_target(message_id, "reply to")?;
        self.reply_target = Some(message_id.to_owned());
        Ok(())
    }

    pub fn cancel_reply(&mut self) -> bool {
        self.scroll_to_newest = false;
        self.reply_target.take().is_some()
    }

    /// Send a message, quoting the reply target if one is set.
    ///
    /// The echo is shown immediately. Its timestamp never sorts before the
    /// current newest message.
    pub fn send(
        &mut self,
        body: &str,
        media: Vec<MediaFile>,
        now_ms: u64,
    ) -> Result<MutationRequest, ConversationError> {
        let body = body.trim();
        if body.is_empty() && media.is_empty() {
            return Err(ConversationError::invalid_input("message is empty"));
        }

        let created_at_ms = match self.view.newest() {
            Some(newest) => now_ms.max(newest.created_at_ms.saturating_add(1)),
            None => now_ms,
        };
        let mut draft = DraftMessage::new(self.viewer_id.clone(), created_at_ms)
            .with_media(media)
            .with_reply_to(self.reply_target.take());
        if !body.is_empty() {
            draft = draft.with_content(body);
        }

        Ok(self.begin(MutationKind::Append(draft)))
    }

    /// Mark every partner message in the window as read by the viewer.
    pub fn mark_read(&mut self) -> Vec<MutationRequest> {
        self.scroll_to_newest = false;
        let unread: Vec<String> = ReadTracker
            .unread_by(self.view.messages(), &self.viewer_id)
            .filter(|id| !self.ledger.is_pending_append(id))
            .map(str::to_owned)
            .collect();

        let mut requests = Vec::with_capacity(unread.len());
        for message_id in unread {
            let Some(mut target) = self.view.get(&message_id).cloned() else {
                continue;
            };
            if let Some(patch) = ReadTracker.mark_read(&mut target, &self.viewer_id) {
                requests.push(self.begin(MutationKind::Patch { message_id, patch }));
            }
        }
        requests
    }

    /// Settle a dispatched mutation.
    ///
    /// Returns `None` when the mutation is unknown or already settled.
    pub fn settle(&mut self, mutation_id: u64, outcome: &MutationOutcome) -> Option<MutationAck> {
        let (state, message_id) = self.ledger.settle(mutation_id, outcome.is_committed())?;
        match state {
            // The snapshot carrying this write may already be here.
            MutationState::Committed => self.ledger.reconcile(&self.confirmed),
            MutationState::RolledBack => debug!(
                conversation_id = %self.conversation_id,
                mutation_id,
                %message_id,
                "rolled back optimistic mutation"
            ),
            MutationState::Pending => {}
        }
        // A committed append stops being "sending" even before the snapshot
        // catches up, so the view is rebuilt in both cases.
        self.rebuild_view();
        Some(normalize_mutation_outcome(mutation_id, message_id, outcome))
    }

    /// Feed pointer/touch input. Returns whether the interaction state changed.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> bool {
        self.scroll_to_newest = false;
        match event {
            PointerEvent::Enter { message_id } if !self.view.contains(message_id) => false,
            PointerEvent::TogglePicker { message_id }
                if !self.actions_for(message_id).can_react =>
            {
                false
            }
            _ => self.interaction.apply(event),
        }
    }

    pub fn set_theme(&mut self, theme: ConversationTheme) {
        self.scroll_to_newest = false;
        self.theme = theme;
    }

    /// Project the current state into a render model.
    pub fn render(&self) -> RenderModel {
        let window = self.view.messages();
        let mut previous_sender: Option<&str> = None;
        let items = window
            .iter()
            .map(|message| {
                let show_avatar = previous_sender != Some(message.sender_id.as_str());
                previous_sender = Some(message.sender_id.as_str());
                self.render_message(message, window, show_avatar)
            })
            .collect();

        RenderModel {
            conversation_id: self.conversation_id.clone(),
            background_color: self.theme.background_color,
            items,
            scroll_to_newest: self.scroll_to_newest,
            reply_target: self
                .reply_target
                .as_deref()
                .map(|id| ReplyResolver.resolve(id, window)),
            hovered_message_id: self.interaction.hovered_message_id().map(str::to_owned),
            open_picker_message_id: self
                .interaction
                .open_picker_message_id()
                .map(str::to_owned),
        }
    }

    fn render_message(
        &self,
        message: &Message,
        window: &[Message],
        show_avatar: bool,
    ) -> RenderedMessage {
        let is_own = message.is_authored_by(&self.viewer_id);
        let is_recalled = message.is_recalled;
        let delivery = if self.ledger.is_pending_append(&message.id) {
            DeliveryState::Sending
        } else {
            DeliveryState::Sent
        };
        let actions = self.actions_for(&message.id);

        RenderedMessage {
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            side: if is_own {
                BubbleSide::Own
            } else {
                BubbleSide::Received
            },
            show_avatar,
            text: if is_recalled {
                None
            } else {
                message.content.clone()
            },
            media: if is_recalled {
                Vec::new()
            } else {
                message.media_files.clone()
            },
            is_recalled,
            reply: message
                .reply_to
                .as_deref()
                .map(|id| ReplyResolver.resolve(id, window)),
            read_mark: match delivery {
                DeliveryState::Sending => None,
                DeliveryState::Sent => {
                    ReadTracker.mark_for(message, &self.viewer_id, &self.partner_id)
                }
            },
            paint: ThemeResolver.paint(message, &self.theme, is_own, is_recalled),
            reactions: ReactionEngine.summarize(message),
            viewer_reaction: if is_recalled {
                None
            } else {
                message.reaction_of(&self.viewer_id)
            },
            actions,
            delivery,
            is_hovered: self.interaction.hovered_message_id() == Some(message.id.as_str()),
            picker_open: actions.can_react
                && self.interaction.open_picker_message_id() == Some(message.id.as_str()),
            created_at_ms: message.created_at_ms,
        }
    }

    fn actions_for(&self, message_id: &str) -> MessageActions {
        let Some(message) = self.view.get(message_id) else {
            return MessageActions::default();
        };
        if message.is_recalled || self.ledger.is_pending_append(message_id) {
            return MessageActions::default();
        }
        MessageActions {
            can_react: true,
            can_reply: true,
            can_recall: message.is_authored_by(&self.viewer_id),
        }
    }

    /// Copy of a committed message, for engines to mutate.
    fn committed_target(
        &self,
        message_id: &str,
        action: &str,
    ) -> Result<Message, ConversationError> {
        let message = self
            .view
            .get(message_id)
            .ok_or_else(|| ConversationError::message_not_found(message_id))?;
        if self.ledger.is_pending_append(message_id) {
            return Err(ConversationError::invalid_state(action, message_id));
        }
        Ok(message.clone())
    }

    fn actionable_target(
        &self,
        message_id: &str,
        action: &str,
    ) -> Result<Message, ConversationError> {
        let message = self.committed_target(message_id, action)?;
        RecallController::ensure_actionable(&message, action)?;
        Ok(message)
    }

    fn begin(&mut self, kind: MutationKind) -> MutationRequest {
        let mutation_id = self.ledger.begin(&self.viewer_id, kind.clone());
        self.rebuild_view();
        MutationRequest {
            mutation_id,
            conversation_id: self.conversation_id.clone(),
            kind,
        }
    }

    /// Recompute the shown window from the confirmed one plus live mutations.
    fn rebuild_view(&mut self) -> TimelineDiff {
        let mut next = self.confirmed.clone();
        self.ledger.overlay(&self.conversation_id, &mut next);
        let diff = self.view.replace_snapshot(next.messages().to_vec());
        self.scroll_to_newest = diff.grew_at_tail;

        let view = &self.view;
        self.interaction
            .retain_present(|id| view.get(id).is_some_and(|message| !message.is_recalled));
        if self
            .reply_target
            .as_deref()
            .is_some_and(|id| view.get(id).is_none_or(|message| message.is_recalled))
        {
            debug!(conversation_id = %self.conversation_id, "reply target went away");
            self.reply_target = None;
        }
        diff
    }
}
