use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConversationError, interaction::PointerEvent, mutation::MutationState,
    renderer::RenderModel, theme::ConversationTheme,
};

/// Coarse media classification derived from an attachment URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Image,
    Video,
    Document,
    Unknown,
}

impl MediaCategory {
    /// Short label used in reply summaries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Unknown => "attachment",
        }
    }
}

/// Attachment carried by a message. Immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFile {
    pub url: String,
    pub category: MediaCategory,
    pub original_name: String,
}

impl MediaFile {
    /// Build an attachment, classifying it from the URL.
    pub fn from_url(url: impl Into<String>, original_name: impl Into<String>) -> Self {
        let url = url.into();
        let category = crate::media::media_category_of(&url);
        Self {
            url,
            category,
            original_name: original_name.into(),
        }
    }
}

/// Fixed set of reactions a participant can leave on a message.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Heart,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl ReactionKind {
    /// All kinds in picker order.
    pub const ALL: [ReactionKind; 6] = [
        Self::Like,
        Self::Heart,
        Self::Haha,
        Self::Wow,
        Self::Sad,
        Self::Angry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Heart => "heart",
            Self::Haha => "haha",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = ConversationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ConversationError::invalid_input("reaction type is empty"));
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                ConversationError::invalid_input(format!("unsupported reaction type '{value}'"))
            })
    }
}

/// One message of a two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Stable id, assigned at creation and never reused.
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Text body. Cleared when the message is recalled.
    pub content: Option<String>,
    pub media_files: Vec<MediaFile>,
    /// Id of the quoted message in the same conversation.
    pub reply_to: Option<String>,
    /// Reactor id -> reaction. Keyed by reactor, so one entry per reactor.
    pub reactions: BTreeMap<String, ReactionKind>,
    /// Participants who have seen the message. Only grows.
    pub read_by: BTreeSet<String>,
    pub is_recalled: bool,
    /// Creation time in milliseconds since Unix epoch.
    pub created_at_ms: u64,
}

impl Message {
    /// Total-order key within a conversation: `(created_at, id)`.
    pub fn order_key(&self) -> (u64, &str) {
        (self.created_at_ms, self.id.as_str())
    }

    pub fn is_authored_by(&self, participant_id: &str) -> bool {
        self.sender_id == participant_id
    }

    pub fn reaction_of(&self, reactor_id: &str) -> Option<ReactionKind> {
        self.reactions.get(reactor_id).copied()
    }
}

/// Slot a patch writes to. Patches on the same `(message, actor, slot)` are
/// resolved last-write-wins; different slots never conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatchSlot {
    Reaction,
    Recall,
    ReadMarker,
}

/// Partial field update sent to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessagePatch {
    /// Insert or replace the reactor's reaction.
    UpsertReaction {
        reactor_id: String,
        kind: ReactionKind,
    },
    /// One-way transition into the recalled state.
    Recall,
    /// Add a participant to `read_by`.
    AddReader { reader_id: String },
}

impl MessagePatch {
    pub fn slot(&self) -> PatchSlot {
        match self {
            Self::UpsertReaction { .. } => PatchSlot::Reaction,
            Self::Recall => PatchSlot::Recall,
            Self::AddReader { .. } => PatchSlot::ReadMarker,
        }
    }

    /// Apply the patch in place. Returns `false` when the message already
    /// reflects it.
    pub fn apply_to(&self, message: &mut Message) -> bool {
        match self {
            Self::UpsertReaction { reactor_id, kind } => {
                match message.reactions.insert(reactor_id.clone(), *kind) {
                    Some(previous) => previous != *kind,
                    None => true,
                }
            }
            Self::Recall => {
                if message.is_recalled {
                    return false;
                }
                message.is_recalled = true;
                message.content = None;
                true
            }
            Self::AddReader { reader_id } => message.read_by.insert(reader_id.clone()),
        }
    }

    /// Whether `message` already carries the effect of this patch.
    pub fn is_reflected_in(&self, message: &Message) -> bool {
        match self {
            Self::UpsertReaction { reactor_id, kind } => {
                message.reaction_of(reactor_id) == Some(*kind)
            }
            Self::Recall => message.is_recalled,
            Self::AddReader { reader_id } => message.read_by.contains(reader_id),
        }
    }
}

/// New message composed locally, before the store commits it.
///
/// The id is generated on the client so the optimistic echo and the committed
/// message share it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftMessage {
    pub id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_files: Vec<MediaFile>,
    pub reply_to: Option<String>,
    pub created_at_ms: u64,
}

impl DraftMessage {
    pub fn new(sender_id: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            content: None,
            media_files: Vec::new(),
            reply_to: None,
            created_at_ms,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_media(mut self, media_files: Vec<MediaFile>) -> Self {
        self.media_files = media_files;
        self
    }

    pub fn with_reply_to(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Materialize the draft as a message of `conversation_id`.
    ///
    /// The sender is considered to have read their own message.
    pub fn into_message(self, conversation_id: impl Into<String>) -> Message {
        let mut read_by = BTreeSet::new();
        read_by.insert(self.sender_id.clone());
        Message {
            id: self.id,
            conversation_id: conversation_id.into(),
            sender_id: self.sender_id,
            content: self.content,
            media_files: self.media_files,
            reply_to: self.reply_to,
            reactions: BTreeMap::new(),
            read_by,
            is_recalled: false,
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Full ordered state of one conversation at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    /// Store-side revision, increasing with every committed write.
    pub revision: u64,
    pub messages: Vec<Message>,
}

/// Identity of the signed-in participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Lifecycle of the conversation session owned by the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation is open.
    Idle,
    /// A subscription is being (re)established; no snapshot applied yet.
    Subscribing,
    /// Snapshots are flowing and message actions are accepted.
    Live,
}

/// Attachment reference supplied with `SendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMedia {
    pub url: String,
    pub original_name: String,
}

/// Command channel input accepted by the conversation runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConversationCommand {
    /// Open (or switch to) a conversation with `partner_id`.
    Open {
        conversation_id: String,
        partner_id: String,
    },
    /// Close the active conversation.
    Close,
    /// Send a message, quoting the current reply target if one is set.
    SendMessage {
        body: String,
        media: Vec<OutgoingMedia>,
    },
    /// React to a message. `reaction` is validated at the boundary.
    React { message_id: String, reaction: String },
    /// Recall one of the viewer's own messages.
    Recall { message_id: String },
    /// Set the reply target for the next send.
    BeginReply { message_id: String },
    /// Clear the reply target.
    CancelReply,
    /// Mark all partner messages in the window as read by the viewer.
    MarkRead,
    /// Pointer or touch interaction with the message list.
    Pointer(PointerEvent),
    /// Override the theme of the active conversation (local only).
    SetTheme(ConversationTheme),
    /// Stop the runtime task.
    Shutdown,
}

/// Acknowledgement emitted when an optimistic mutation settles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationAck {
    pub mutation_id: u64,
    pub message_id: String,
    pub state: MutationState,
    /// Stable error code when the mutation was rolled back.
    pub error_code: Option<String>,
}

/// Transient user-visible notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub code: String,
    pub message: String,
    /// Whether retrying the action may succeed.
    pub recoverable: bool,
}

/// Event channel output emitted by the conversation runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConversationEvent {
    /// Session lifecycle transition.
    LifecycleChanged { state: SessionState },
    /// New render model for the active conversation.
    Frame(RenderModel),
    /// An optimistic mutation was committed or rolled back.
    MutationSettled(MutationAck),
    /// A command was rejected locally without a round trip.
    ActionRejected { code: String, message: String },
    /// Transient notice for the user.
    Notice(Notice),
    /// The snapshot stream ended; a resubscribe is scheduled.
    SubscriptionLost {
        conversation_id: String,
        retry_in_ms: Option<u64>,
    },
}
