use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock, RwLockWriteGuard},
    time::Duration,
};

use messenger_core::{
    ConversationError, ConversationSnapshot, DraftMessage, Message, MessagePatch, Viewer,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    #[error("message store rejected the write: {0}")]
    Rejected(String),
    #[error("message '{0}' not found")]
    MessageNotFound(String),
    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),
}

impl From<StoreError> for ConversationError {
    fn from(err: StoreError) -> Self {
        ConversationError::remote_commit(err.to_string())
    }
}

/// Live, restartable stream of full conversation snapshots.
///
/// The stream has ended once `changed()` returns an error.
pub type SnapshotStream = watch::Receiver<ConversationSnapshot>;

/// Durable ordered message collection, one per conversation.
pub trait MessageStore: Send + Sync + 'static {
    fn subscribe(&self, conversation_id: &str) -> Result<SnapshotStream, StoreError>;

    fn append(
        &self,
        conversation_id: &str,
        draft: DraftMessage,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    fn patch(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Source of the signed-in participant.
pub trait IdentityProvider: Send + Sync {
    fn current_viewer(&self) -> Result<Viewer, StoreError>;
}

#[derive(Debug, Clone)]
pub struct StaticIdentity {
    viewer: Viewer,
}

impl StaticIdentity {
    pub fn new(viewer: Viewer) -> Self {
        Self { viewer }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_viewer(&self) -> Result<Viewer, StoreError> {
        Ok(self.viewer.clone())
    }
}

struct ConversationEntry {
    snapshot: ConversationSnapshot,
    sender: watch::Sender<ConversationSnapshot>,
}

impl ConversationEntry {
    fn new(conversation_id: &str) -> Self {
        let snapshot = ConversationSnapshot {
            conversation_id: conversation_id.to_owned(),
            revision: 0,
            messages: Vec::new(),
        };
        let (sender, _) = watch::channel(snapshot.clone());
        Self { snapshot, sender }
    }

    fn publish(&mut self) {
        self.snapshot.revision += 1;
        self.snapshot
            .messages
            .sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        self.sender.send_replace(self.snapshot.clone());
    }
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, ConversationEntry>,
    message_index: HashMap<String, String>,
    offline: bool,
    failing_writes: u32,
}

impl StoreState {
    fn check_writable(&mut self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".to_owned()));
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Rejected("injected write failure".to_owned()));
        }
        Ok(())
    }

    fn insert(&mut self, message: Message) -> Result<(), StoreError> {
        let entry = self
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(message.conversation_id.clone()))?;
        entry.snapshot.messages.retain(|existing| existing.id != message.id);
        self.message_index
            .insert(message.id.clone(), message.conversation_id.clone());
        entry.snapshot.messages.push(message);
        entry.publish();
        Ok(())
    }
}

/// In-process store with failure injection, used by tests and the smoke app.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    state: Arc<RwLock<StoreState>>,
    latency: Duration,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `latency` before it is applied.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn create_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .conversations
            .entry(conversation_id.to_owned())
            .or_insert_with(|| ConversationEntry::new(conversation_id));
        Ok(())
    }

    /// Store messages as-is, bypassing failure injection. Used to play the
    /// partner's side of a conversation.
    pub fn insert_messages(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        for message in messages {
            state.insert(message)?;
        }
        Ok(())
    }

    /// Apply a patch bypassing failure injection.
    pub fn apply_patch(&self, message_id: &str, patch: &MessagePatch) -> Result<(), StoreError> {
        let mut state = self.write()?;
        patch_in(&mut state, message_id, patch)
    }

    pub fn snapshot(&self, conversation_id: &str) -> Result<ConversationSnapshot, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("poisoned lock".to_owned()))?;
        state
            .conversations
            .get(conversation_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_owned()))
    }

    /// Reject every write (and new subscriptions) until switched back.
    pub fn set_offline(&self, offline: bool) -> Result<(), StoreError> {
        self.write()?.offline = offline;
        Ok(())
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) -> Result<(), StoreError> {
        self.write()?.failing_writes = count;
        Ok(())
    }

    /// End every open snapshot stream of `conversation_id`.
    pub fn close_streams(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let entry = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_owned()))?;
        let (sender, _) = watch::channel(entry.snapshot.clone());
        entry.sender = sender;
        debug!(%conversation_id, "closed snapshot streams");
        Ok(())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("poisoned lock".to_owned()))
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn patch_in(
    state: &mut StoreState,
    message_id: &str,
    patch: &MessagePatch,
) -> Result<(), StoreError> {
    let conversation_id = state
        .message_index
        .get(message_id)
        .ok_or_else(|| StoreError::MessageNotFound(message_id.to_owned()))?;
    let entry = state
        .conversations
        .get_mut(conversation_id)
        .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))?;
    let message = entry
        .snapshot
        .messages
        .iter_mut()
        .find(|message| message.id == message_id)
        .ok_or_else(|| StoreError::MessageNotFound(message_id.to_owned()))?;

    if message.is_recalled && matches!(patch, MessagePatch::UpsertReaction { .. }) {
        return Err(StoreError::Rejected(format!(
            "message '{message_id}' is recalled"
        )));
    }
    if patch.apply_to(message) {
        entry.publish();
    }
    Ok(())
}

impl MessageStore for InMemoryMessageStore {
    fn subscribe(&self, conversation_id: &str) -> Result<SnapshotStream, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("poisoned lock".to_owned()))?;
        if state.offline {
            return Err(StoreError::Unavailable("store is offline".to_owned()));
        }
        state
            .conversations
            .get(conversation_id)
            .map(|entry| entry.sender.subscribe())
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_owned()))
    }

    async fn append(
        &self,
        conversation_id: &str,
        draft: DraftMessage,
    ) -> Result<Message, StoreError> {
        self.simulate_latency().await;

        let mut state = self.write()?;
        state.check_writable()?;
        if let Some(existing) = state
            .conversations
            .get(conversation_id)
            .and_then(|entry| entry.snapshot.messages.iter().find(|m| m.id == draft.id))
        {
            trace!(message_id = %existing.id, "append already applied");
            return Ok(existing.clone());
        }

        let message = draft.into_message(conversation_id);
        state.insert(message.clone())?;
        trace!(%conversation_id, message_id = %message.id, "appended message");
        Ok(message)
    }

    async fn patch(&self, message_id: &str, patch: MessagePatch) -> Result<(), StoreError> {
        self.simulate_latency().await;

        let mut state = self.write()?;
        state.check_writable()?;
        patch_in(&mut state, message_id, &patch)
    }
}

/// Store handle bound to a single conversation.
pub struct ConversationScope<S: MessageStore> {
    inner: Arc<S>,
    conversation_id: String,
}

impl<S: MessageStore> Clone for ConversationScope<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

impl<S: MessageStore> ConversationScope<S> {
    pub fn new(inner: Arc<S>, conversation_id: impl Into<String>) -> Self {
        Self {
            inner,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn subscribe(&self) -> Result<SnapshotStream, StoreError> {
        self.inner.subscribe(&self.conversation_id)
    }

    pub async fn append(&self, draft: DraftMessage) -> Result<Message, StoreError> {
        self.inner.append(&self.conversation_id, draft).await
    }

    pub async fn patch(&self, message_id: &str, patch: MessagePatch) -> Result<(), StoreError> {
        self.inner.patch(message_id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use messenger_core::ReactionKind;

    use super::*;

    fn message(id: &str, conversation_id: &str, created_at_ms: u64) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: conversation_id.to_owned(),
            sender_id: "@p".to_owned(),
            content: Some("hello".to_owned()),
            media_files: Vec::new(),
            reply_to: None,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::new(),
            is_recalled: false,
            created_at_ms,
        }
    }

    fn store_with(conversation_id: &str) -> InMemoryMessageStore {
        let store = InMemoryMessageStore::new();
        store
            .create_conversation(conversation_id)
            .expect("create should work");
        store
    }

    #[tokio::test]
    async fn subscribers_see_ordered_snapshots() {
        let store = store_with("c1");
        let mut stream = store.subscribe("c1").expect("subscribe should work");
        assert!(stream.borrow().messages.is_empty());

        store
            .insert_messages(vec![message("m2", "c1", 20), message("m1", "c1", 10)])
            .expect("insert should work");

        stream.changed().await.expect("stream should be open");
        let snapshot = stream.borrow_and_update().clone();
        let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(snapshot.revision, 2);
    }

    #[tokio::test]
    async fn append_is_idempotent_per_draft_id() {
        let store = store_with("c1");
        let draft = DraftMessage::new("@v", 5).with_content("hi");

        let first = store
            .append("c1", draft.clone())
            .await
            .expect("append should work");
        let second = store.append("c1", draft).await.expect("retry should work");

        assert_eq!(first, second);
        assert_eq!(store.snapshot("c1").expect("snapshot").messages.len(), 1);
    }

    #[tokio::test]
    async fn patch_updates_message_and_publishes() {
        let store = store_with("c1");
        store
            .insert_messages(vec![message("m1", "c1", 1)])
            .expect("insert should work");

        store
            .patch(
                "m1",
                MessagePatch::UpsertReaction {
                    reactor_id: "@v".to_owned(),
                    kind: ReactionKind::Haha,
                },
            )
            .await
            .expect("patch should work");

        let snapshot = store.snapshot("c1").expect("snapshot");
        assert_eq!(
            snapshot.messages[0].reaction_of("@v"),
            Some(ReactionKind::Haha)
        );
    }

    #[tokio::test]
    async fn reaction_on_recalled_message_is_rejected() {
        let store = store_with("c1");
        let mut recalled = message("m1", "c1", 1);
        recalled.is_recalled = true;
        store
            .insert_messages(vec![recalled])
            .expect("insert should work");

        let err = store
            .patch(
                "m1",
                MessagePatch::UpsertReaction {
                    reactor_id: "@v".to_owned(),
                    kind: ReactionKind::Like,
                },
            )
            .await
            .expect_err("recalled message should refuse reactions");
        assert!(matches!(err, StoreError::Rejected(_)));

        let snapshot = store.snapshot("c1").expect("snapshot");
        assert!(snapshot.messages[0].reactions.is_empty());
    }

    #[tokio::test]
    async fn patch_unknown_message_fails() {
        let store = store_with("c1");
        let err = store
            .patch("nope", MessagePatch::Recall)
            .await
            .expect_err("unknown message should fail");
        assert_eq!(err, StoreError::MessageNotFound("nope".to_owned()));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = store_with("c1");
        store
            .insert_messages(vec![message("m1", "c1", 1)])
            .expect("insert should work");
        store.fail_next_writes(1).expect("inject should work");

        let err = store
            .patch("m1", MessagePatch::Recall)
            .await
            .expect_err("first write should fail");
        assert!(matches!(err, StoreError::Rejected(_)));
        store
            .patch("m1", MessagePatch::Recall)
            .await
            .expect("second write should pass");
    }

    #[tokio::test]
    async fn offline_store_rejects_writes_and_subscriptions() {
        let store = store_with("c1");
        store.set_offline(true).expect("toggle should work");

        assert!(matches!(
            store.subscribe("c1"),
            Err(StoreError::Unavailable(_))
        ));
        let err = store
            .append("c1", DraftMessage::new("@v", 1).with_content("x"))
            .await
            .expect_err("append should fail offline");
        assert!(matches!(err, StoreError::Unavailable(_)));

        let converted: ConversationError = err.into();
        assert_eq!(converted.code, "remote_commit_failed");
    }

    #[tokio::test]
    async fn closing_streams_ends_existing_subscriptions() {
        let store = store_with("c1");
        let mut stream = store.subscribe("c1").expect("subscribe should work");

        store.close_streams("c1").expect("close should work");
        assert!(stream.changed().await.is_err());

        let mut fresh = store.subscribe("c1").expect("resubscribe should work");
        store
            .insert_messages(vec![message("m1", "c1", 1)])
            .expect("insert should work");
        fresh.changed().await.expect("fresh stream should be open");
    }

    #[tokio::test]
    async fn scope_binds_appends_to_its_conversation() {
        let store = store_with("c1");
        store.create_conversation("c2").expect("create c2");
        let shared = Arc::new(store.clone());
        let scope = ConversationScope::new(Arc::clone(&shared), "c2");

        scope
            .append(DraftMessage::new("@v", 1).with_content("in c2"))
            .await
            .expect("append should work");

        assert!(store.snapshot("c1").expect("c1").messages.is_empty());
        assert_eq!(store.snapshot("c2").expect("c2").messages.len(), 1);
        assert_eq!(scope.conversation_id(), "c2");
    }

    #[test]
    fn subscribe_unknown_conversation_fails() {
        let store = InMemoryMessageStore::new();
        assert_eq!(
            store.subscribe("ghost").err(),
            Some(StoreError::ConversationNotFound("ghost".to_owned()))
        );
    }

    #[test]
    fn static_identity_returns_viewer() {
        let identity = StaticIdentity::new(Viewer {
            id: "@v".to_owned(),
            display_name: "V".to_owned(),
            avatar_ref: None,
        });
        assert_eq!(identity.current_viewer().expect("viewer").id, "@v");
    }
}
