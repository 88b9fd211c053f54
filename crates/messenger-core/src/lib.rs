//! Core conversation engine shared between the runtime and view consumers.
//!
//! This crate defines the message model, the pure reaction/reply/recall/read
//! engines, theming, the ordered timeline, the optimistic mutation ledger and
//! the renderer that ties them together, plus the command/event protocol and
//! channel abstractions used to drive it.

/// Async command/event channel primitives.
pub mod channel;
/// Stable conversation error types.
pub mod error;
/// Hover and reaction-picker state.
pub mod interaction;
/// Media classification from attachment URLs.
pub mod media;
/// Optimistic mutation ledger.
pub mod mutation;
/// Event normalization helpers (mutation acknowledgements, notices).
pub mod normalization;
/// Per-reactor reaction upserts and summaries.
pub mod reactions;
/// Read-marker tracking.
pub mod read_tracker;
/// Terminal recall transition.
pub mod recall;
/// Render model projection.
pub mod renderer;
/// Reply reference resolution against the loaded window.
pub mod reply;
/// Backoff policy used by resubscribe loops.
pub mod retry;
/// Conversation session lifecycle state machine.
pub mod state_machine;
/// Per-conversation theming.
pub mod theme;
/// Ordered message window utilities.
pub mod timeline;
/// Data model and protocol types (commands, events, payloads).
pub mod types;

pub use channel::{ConversationChannelError, ConversationChannels, EventStream};
pub use error::{ConversationError, ConversationErrorCategory};
pub use interaction::{InteractionState, PointerEvent};
pub use media::media_category_of;
pub use mutation::{MutationKind, MutationLedger, MutationRequest, MutationState};
pub use normalization::{
    MutationOutcome, normalize_mutation_outcome, normalize_rejection, rollback_notice,
};
pub use reactions::{ReactionChange, ReactionEngine, ReactionSummary};
pub use read_tracker::{ReadMark, ReadTracker};
pub use recall::{RecallController, RecallState};
pub use renderer::{
    BubbleSide, ConversationRenderer, DeliveryState, MessageActions, RenderModel,
    RenderedMessage,
};
pub use reply::{RECALLED_REPLY_TEXT, ReplyPreview, ReplyResolver, UNAVAILABLE_REPLY_TEXT};
pub use retry::RetryPolicy;
pub use state_machine::SessionStateMachine;
pub use theme::{BubblePaint, Color, ConversationTheme, ThemeRegistry, ThemeResolver};
pub use timeline::{ConversationTimeline, TimelineDiff, TimelineMergeError, TimelineOp};
pub use types::{
    ConversationCommand, ConversationEvent, ConversationSnapshot, DraftMessage, MediaCategory,
    MediaFile, Message, MessagePatch, MutationAck, Notice, OutgoingMedia, PatchSlot,
    ReactionKind, SessionState, Viewer,
};
