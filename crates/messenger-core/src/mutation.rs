use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    timeline::{ConversationTimeline, TimelineOp},
    types::{DraftMessage, MessagePatch, PatchSlot},
};

/// Lifecycle of one optimistic mutation: `Pending -> Committed | RolledBack`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Committed,
    RolledBack,
}

/// Local change applied before the store confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// A new message shown as an echo until committed.
    Append(DraftMessage),
    /// A field patch on an existing message.
    Patch {
        message_id: String,
        patch: MessagePatch,
    },
}

impl MutationKind {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Append(draft) => &draft.id,
            Self::Patch { message_id, .. } => message_id,
        }
    }

    fn slot(&self) -> Option<PatchSlot> {
        match self {
            Self::Append(_) => None,
            Self::Patch { patch, .. } => Some(patch.slot()),
        }
    }
}

/// Write the runtime must send to the store for a begun mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub mutation_id: u64,
    pub conversation_id: String,
    pub kind: MutationKind,
}

#[derive(Debug, Clone)]
struct MutationEntry {
    id: u64,
    actor_id: String,
    kind: MutationKind,
    state: MutationState,
}

impl MutationEntry {
    fn same_slot(&self, other: &MutationEntry) -> bool {
        self.actor_id == other.actor_id
            && self.kind.message_id() == other.kind.message_id()
            && self.kind.slot() == other.kind.slot()
    }
}

/// Optimistic mutations layered over the last confirmed snapshot.
///
/// Mutation ids double as local versions: entries are replayed in id order,
/// so the newest write to a `(message, actor, slot)` wins. Rolled-back entries
/// are dropped immediately; committed ones are kept until the confirmed
/// snapshot reflects them or a newer committed write to the same slot exists.
#[derive(Debug, Clone, Default)]
pub struct MutationLedger {
    next_id: u64,
    entries: Vec<MutationEntry>,
}

impl MutationLedger {
    /// Register a pending mutation and return its id.
    pub fn begin(&mut self, actor_id: &str, kind: MutationKind) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(MutationEntry {
            id,
            actor_id: actor_id.to_owned(),
            kind,
            state: MutationState::Pending,
        });
        id
    }

    pub fn state(&self, mutation_id: u64) -> Option<MutationState> {
        self.entry(mutation_id).map(|entry| entry.state)
    }

    /// Settle a pending mutation.
    ///
    /// Returns the new state and the target message id, or `None` when the id
    /// is unknown or already settled.
    pub fn settle(&mut self, mutation_id: u64, committed: bool) -> Option<(MutationState, String)> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.id == mutation_id && entry.state == MutationState::Pending)?;

        if committed {
            let entry = &mut self.entries[idx];
            entry.state = MutationState::Committed;
            Some((MutationState::Committed, entry.kind.message_id().to_owned()))
        } else {
            let entry = self.entries.remove(idx);
            Some((MutationState::RolledBack, entry.kind.message_id().to_owned()))
        }
    }

    /// Replay live entries on top of `timeline`.
    pub fn overlay(&self, conversation_id: &str, timeline: &mut ConversationTimeline) {
        for entry in &self.entries {
            let op = match &entry.kind {
                MutationKind::Append(draft) => {
                    if timeline.contains(&draft.id) {
                        continue;
                    }
                    TimelineOp::Insert(draft.clone().into_message(conversation_id))
                }
                MutationKind::Patch { message_id, patch } => {
                    if !timeline.contains(message_id) {
                        trace!(mutation_id = entry.id, %message_id, "patch target outside window");
                        continue;
                    }
                    TimelineOp::Patch {
                        message_id: message_id.clone(),
                        patch: patch.clone(),
                    }
                }
            };
            if let Err(err) = timeline.apply_ops(&[op]) {
                trace!(mutation_id = entry.id, error = %err, "skipping optimistic entry");
            }
        }
    }

    /// Drop committed entries the confirmed window already reflects.
    pub fn reconcile(&mut self, confirmed: &ConversationTimeline) {
        let snapshot = self.entries.clone();
        self.entries.retain(|entry| {
            if entry.state != MutationState::Committed {
                return true;
            }
            let reflected = match &entry.kind {
                MutationKind::Append(draft) => confirmed.contains(&draft.id),
                MutationKind::Patch { message_id, patch } => confirmed
                    .get(message_id)
                    .is_none_or(|message| patch.is_reflected_in(message)),
            };
            let superseded = snapshot.iter().any(|other| {
                other.id > entry.id
                    && other.state == MutationState::Committed
                    && other.same_slot(entry)
            });
            !(reflected || superseded)
        });
    }

    /// The message is an optimistic echo the store has not committed yet.
    pub fn is_pending_append(&self, message_id: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.state == MutationState::Pending
                && matches!(&entry.kind, MutationKind::Append(draft) if draft.id == message_id)
        })
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == MutationState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, mutation_id: u64) -> Option<&MutationEntry> {
        self.entries.iter().find(|entry| entry.id == mutation_id)
    }
}
