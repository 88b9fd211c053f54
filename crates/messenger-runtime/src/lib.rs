//! Single-task conversation runtime.
//!
//! The runtime owns the active [`ConversationRenderer`], drives it from the
//! command channel and the store's snapshot stream, and dispatches optimistic
//! mutations to the store on spawned tasks. Every store round trip is tagged
//! with the session epoch it started in; results that come back after the
//! conversation was closed or switched are dropped.

mod resubscribe;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use messenger_core::{
    ConversationChannelError, ConversationChannels, ConversationCommand, ConversationError,
    ConversationEvent, ConversationRenderer, ConversationSnapshot, ConversationTheme,
    EventStream, MediaFile, MutationKind, MutationOutcome, MutationRequest, Notice, ReactionKind,
    RetryPolicy, SessionStateMachine, ThemeRegistry, Viewer, normalize_rejection,
    rollback_notice,
};
use messenger_store::{ConversationScope, MessageStore, SnapshotStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resubscribe::SubscriptionBackoff;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Cap on messages kept in the rendered window.
    pub timeline_max_items: usize,
    /// Theme of conversations without a local override.
    pub default_theme: ConversationTheme,
    /// Backoff for restarting a lost snapshot stream.
    pub resubscribe: RetryPolicy,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeline_max_items: 500,
            default_theme: ConversationTheme::default(),
            resubscribe: RetryPolicy::default(),
            command_buffer: 128,
            event_buffer: 512,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationRuntimeHandle {
    channels: ConversationChannels,
    shutdown: CancellationToken,
}

impl ConversationRuntimeHandle {
    pub async fn send(&self, command: ConversationCommand) -> Result<(), ConversationChannelError> {
        self.channels.send_command(command).await
    }

    /// Queue a command without waiting; fails when the runtime is behind.
    pub fn try_send(&self, command: ConversationCommand) -> Result<(), ConversationChannelError> {
        self.channels.try_send_command(command)
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop the runtime task and cancel pending resubscribe timers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

pub fn spawn_runtime<S: MessageStore>(
    store: Arc<S>,
    viewer: Viewer,
    config: RuntimeConfig,
) -> ConversationRuntimeHandle {
    let (channels, command_rx) =
        ConversationChannels::new(config.command_buffer, config.event_buffer);
    let shutdown = CancellationToken::new();
    let runtime = ConversationRuntime::new(
        store,
        viewer,
        config,
        channels.clone(),
        command_rx,
        shutdown.clone(),
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    ConversationRuntimeHandle { channels, shutdown }
}

/// Results of background work, fed back into the runtime loop.
enum Completion {
    Settled {
        epoch: u64,
        mutation_id: u64,
        outcome: MutationOutcome,
    },
    Resubscribe {
        epoch: u64,
    },
}

enum Wake {
    Command(ConversationCommand),
    Completion(Completion),
    /// `false` when the snapshot stream ended.
    Snapshot(bool),
    Shutdown,
}

struct ActiveConversation<S: MessageStore> {
    scope: ConversationScope<S>,
    renderer: ConversationRenderer,
    stream: Option<SnapshotStream>,
    backoff: SubscriptionBackoff,
    retry_cancel: CancellationToken,
}

struct ConversationRuntime<S: MessageStore> {
    store: Arc<S>,
    viewer: Viewer,
    config: RuntimeConfig,
    channels: ConversationChannels,
    command_rx: mpsc::Receiver<ConversationCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    shutdown: CancellationToken,
    state_machine: SessionStateMachine,
    themes: ThemeRegistry,
    epoch: u64,
    active: Option<ActiveConversation<S>>,
}

impl<S: MessageStore> ConversationRuntime<S> {
    fn new(
        store: Arc<S>,
        viewer: Viewer,
        config: RuntimeConfig,
        channels: ConversationChannels,
        command_rx: mpsc::Receiver<ConversationCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let themes = ThemeRegistry::new(config.default_theme);
        Self {
            store,
            viewer,
            config,
            channels,
            command_rx,
            completion_tx,
            completion_rx,
            shutdown,
            state_machine: SessionStateMachine::default(),
            themes,
            epoch: 0,
            active: None,
        }
    }

    async fn run(mut self) {
        info!(viewer_id = %self.viewer.id, "conversation runtime started");
        loop {
            let stream = self.active.as_mut().and_then(|active| active.stream.as_mut());
            let wake = tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                command = self.command_rx.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Shutdown,
                },
                Some(completion) = self.completion_rx.recv() => Wake::Completion(completion),
                open = next_snapshot(stream) => Wake::Snapshot(open),
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Command(command) => {
                    if let Err(err) = self.handle_command(command) {
                        debug!(code = %err.code, "command rejected");
                        self.channels.emit(normalize_rejection(err));
                    }
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                }
                Wake::Completion(completion) => self.handle_completion(completion),
                Wake::Snapshot(true) => self.take_snapshot(),
                Wake::Snapshot(false) => self.handle_stream_lost(),
            }
        }

        self.close_active();
        self.shutdown.cancel();
        info!("conversation runtime stopped");
    }

    fn handle_command(&mut self, command: ConversationCommand) -> Result<(), ConversationError> {
        let (candidate, events) = self.validate_transition(&command)?;

        match command {
            ConversationCommand::Open {
                conversation_id,
                partner_id,
            } => {
                self.commit_transition(candidate, events);
                self.open(conversation_id, partner_id);
            }
            ConversationCommand::Close => {
                self.close_active();
                self.commit_transition(candidate, events);
            }
            ConversationCommand::Shutdown => {
                self.commit_transition(candidate, events);
                self.shutdown.cancel();
            }
            ConversationCommand::SendMessage { body, media } => {
                let media = media
                    .into_iter()
                    .map(|media| MediaFile::from_url(media.url, media.original_name))
                    .collect();
                let request = self.renderer_mut()?.send(&body, media, now_ms())?;
                self.dispatch(request);
                self.emit_frame();
            }
            ConversationCommand::React {
                message_id,
                reaction,
            } => {
                let kind: ReactionKind = reaction.parse()?;
                if let Some(request) = self.renderer_mut()?.react(&message_id, kind)? {
                    self.dispatch(request);
                }
                self.emit_frame();
            }
            ConversationCommand::Recall { message_id } => {
                let request = self.renderer_mut()?.recall(&message_id)?;
                self.dispatch(request);
                self.emit_frame();
            }
            ConversationCommand::BeginReply { message_id } => {
                self.renderer_mut()?.begin_reply(&message_id)?;
                self.emit_frame();
            }
            ConversationCommand::CancelReply => {
                if self.renderer_mut()?.cancel_reply() {
                    self.emit_frame();
                }
            }
            ConversationCommand::MarkRead => {
                let requests = self.renderer_mut()?.mark_read();
                if !requests.is_empty() {
                    for request in requests {
                        self.dispatch(request);
                    }
                    self.emit_frame();
                }
            }
            ConversationCommand::Pointer(event) => {
                if self.renderer_mut()?.handle_pointer(&event) {
                    self.emit_frame();
                }
            }
            ConversationCommand::SetTheme(theme) => {
                let renderer = self.renderer_mut()?;
                renderer.set_theme(theme);
                let conversation_id = renderer.conversation_id().to_owned();
                self.themes.set_override(conversation_id, theme);
                self.emit_frame();
            }
        }

        Ok(())
    }

    fn open(&mut self, conversation_id: String, partner_id: String) {
        self.close_active();

        let theme = self.themes.resolve(&conversation_id);
        let renderer = ConversationRenderer::new(
            conversation_id.clone(),
            self.viewer.id.clone(),
            partner_id,
            theme,
            self.config.timeline_max_items,
        );
        info!(%conversation_id, epoch = self.epoch, "opening conversation");
        self.active = Some(ActiveConversation {
            scope: ConversationScope::new(Arc::clone(&self.store), conversation_id),
            renderer,
            stream: None,
            backoff: SubscriptionBackoff::new(self.config.resubscribe),
            retry_cancel: self.shutdown.child_token(),
        });
        self.subscribe_active();
    }

    /// Drop the active conversation. Bumps the epoch so results of work
    /// started for it are discarded.
    fn close_active(&mut self) {
        self.epoch += 1;
        if let Some(active) = self.active.take() {
            active.retry_cancel.cancel();
            debug!(
                conversation_id = %active.renderer.conversation_id(),
                pending = active.renderer.pending_mutations(),
                "closed conversation"
            );
        }
    }

    fn subscribe_active(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match active.scope.subscribe() {
            Ok(mut stream) => {
                let snapshot = stream.borrow_and_update().clone();
                active.stream = Some(stream);
                self.apply_snapshot(snapshot);
            }
            Err(err) => {
                warn!(
                    conversation_id = %active.scope.conversation_id(),
                    error = %err,
                    "subscribe failed"
                );
                self.schedule_resubscribe();
            }
        }
    }

    fn take_snapshot(&mut self) {
        let Some(stream) = self
            .active
            .as_mut()
            .and_then(|active| active.stream.as_mut())
        else {
            return;
        };
        let snapshot = stream.borrow_and_update().clone();
        self.apply_snapshot(snapshot);
    }

    fn apply_snapshot(&mut self, snapshot: ConversationSnapshot) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(err) = active.renderer.apply_snapshot(snapshot) {
            warn!(code = %err.code, message = %err.message, "dropping snapshot");
            return;
        }
        active.backoff.reset();

        match self.state_machine.on_snapshot() {
            Ok(events) => self.channels.emit_all(events),
            Err(err) => warn!(code = %err.code, "snapshot outside of a session"),
        }
        self.emit_frame();
    }

    fn handle_stream_lost(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.stream = None;
        warn!(
            conversation_id = %active.scope.conversation_id(),
            "snapshot stream ended"
        );

        let mut candidate = self.state_machine.clone();
        match candidate.on_stream_lost() {
            Ok(events) => self.commit_transition(candidate, events),
            Err(err) => warn!(code = %err.code, "stream loss outside of a session"),
        }
        self.schedule_resubscribe();
    }

    fn schedule_resubscribe(&mut self) {
        let epoch = self.epoch;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let conversation_id = active.scope.conversation_id().to_owned();

        let Some(delay) = active.backoff.next_delay() else {
            warn!(
                %conversation_id,
                attempts = active.backoff.attempt(),
                "giving up on subscription"
            );
            self.channels.emit_all([
                ConversationEvent::SubscriptionLost {
                    conversation_id,
                    retry_in_ms: None,
                },
                ConversationEvent::Notice(Notice {
                    code: "subscription_failed".to_owned(),
                    message: "Conversation updates are unavailable".to_owned(),
                    recoverable: false,
                }),
            ]);
            return;
        };

        debug!(
            %conversation_id,
            epoch,
            delay_ms = delay.as_millis() as u64,
            "resubscribe scheduled"
        );
        let cancel = active.retry_cancel.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = completion_tx.send(Completion::Resubscribe { epoch });
                }
            }
        });

        self.channels.emit(ConversationEvent::SubscriptionLost {
            conversation_id,
            retry_in_ms: Some(delay.as_millis() as u64),
        });
    }

    fn dispatch(&self, request: MutationRequest) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let MutationRequest {
            mutation_id, kind, ..
        } = request;
        let scope = active.scope.clone();
        let completion_tx = self.completion_tx.clone();
        let epoch = self.epoch;
        debug!(mutation_id, epoch, message_id = %kind.message_id(), "dispatching mutation");

        tokio::spawn(async move {
            let result = match kind {
                MutationKind::Append(draft) => scope.append(draft).await.map(|_| ()),
                MutationKind::Patch { message_id, patch } => scope.patch(&message_id, patch).await,
            };
            let outcome = match result {
                Ok(()) => MutationOutcome::Committed,
                Err(err) => MutationOutcome::Failed { error: err.into() },
            };
            let _ = completion_tx.send(Completion::Settled {
                epoch,
                mutation_id,
                outcome,
            });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Settled {
                epoch,
                mutation_id,
                outcome,
            } => {
                if epoch != self.epoch {
                    debug!(
                        mutation_id,
                        epoch,
                        current_epoch = self.epoch,
                        "discarding stale mutation result"
                    );
                    return;
                }
                let Some(active) = self.active.as_mut() else {
                    return;
                };
                let Some(ack) = active.renderer.settle(mutation_id, &outcome) else {
                    return;
                };

                let frame = ConversationEvent::Frame(active.renderer.render());
                let mut events = vec![ConversationEvent::MutationSettled(ack)];
                if let MutationOutcome::Failed { error } = &outcome {
                    warn!(
                        mutation_id,
                        code = %error.code,
                        message = %error.message,
                        "mutation rolled back"
                    );
                    events.push(ConversationEvent::Notice(rollback_notice(error)));
                }
                events.push(frame);
                self.channels.emit_all(events);
            }
            Completion::Resubscribe { epoch } => {
                if epoch != self.epoch {
                    debug!(epoch, current_epoch = self.epoch, "discarding stale resubscribe");
                    return;
                }
                self.subscribe_active();
            }
        }
    }

    fn emit_frame(&self) {
        if let Some(active) = &self.active {
            self.channels
                .emit(ConversationEvent::Frame(active.renderer.render()));
        }
    }

    fn renderer_mut(&mut self) -> Result<&mut ConversationRenderer, ConversationError> {
        let state = self.state_machine.state();
        self.active
            .as_mut()
            .map(|active| &mut active.renderer)
            .ok_or_else(|| ConversationError::no_active_conversation(state, "conversation action"))
    }

    fn validate_transition(
        &self,
        command: &ConversationCommand,
    ) -> Result<(SessionStateMachine, Vec<ConversationEvent>), ConversationError> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(command)?;
        Ok((candidate, events))
    }

    fn commit_transition(
        &mut self,
        candidate: SessionStateMachine,
        events: Vec<ConversationEvent>,
    ) {
        self.state_machine = candidate;
        self.channels.emit_all(events);
    }
}

async fn next_snapshot(stream: Option<&mut SnapshotStream>) -> bool {
    match stream {
        Some(stream) => stream.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, BTreeSet},
        time::Duration,
    };

    use messenger_core::{
        DeliveryState, Message, MutationState, PointerEvent, RenderModel, SessionState,
    };
    use messenger_store::InMemoryMessageStore;
    use tokio::time::{Instant, timeout};

    use super::*;

    const VIEWER: &str = "@v";
    const PARTNER: &str = "@p";

    fn message(id: &str, conversation_id: &str, sender: &str, created_at_ms: u64) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: conversation_id.to_owned(),
            sender_id: sender.to_owned(),
            content: Some(format!("body of {id}")),
            media_files: Vec::new(),
            reply_to: None,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::new(),
            is_recalled: false,
            created_at_ms,
        }
    }

    fn viewer() -> Viewer {
        Viewer {
            id: VIEWER.to_owned(),
            display_name: "Viewer".to_owned(),
            avatar_ref: None,
        }
    }

    fn seeded_store() -> InMemoryMessageStore {
        let store = InMemoryMessageStore::new();
        store.create_conversation("c1").expect("create c1");
        store.create_conversation("c2").expect("create c2");
        store
            .insert_messages(vec![
                message("m1", "c1", PARTNER, 1_000),
                message("m2", "c1", VIEWER, 2_000),
            ])
            .expect("seed c1");
        store
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig {
            resubscribe: RetryPolicy::new(10, 40).with_max_attempts(3),
            ..RuntimeConfig::default()
        }
    }

    fn open(conversation_id: &str) -> ConversationCommand {
        ConversationCommand::Open {
            conversation_id: conversation_id.to_owned(),
            partner_id: PARTNER.to_owned(),
        }
    }

    async fn next_event(events: &mut EventStream) -> ConversationEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive")
    }

    async fn wait_for<T>(
        events: &mut EventStream,
        mut pick: impl FnMut(ConversationEvent) -> Option<T>,
    ) -> T {
        loop {
            if let Some(found) = pick(next_event(events).await) {
                return found;
            }
        }
    }

    async fn wait_for_frame(
        events: &mut EventStream,
        mut accept: impl FnMut(&RenderModel) -> bool,
    ) -> RenderModel {
        wait_for(events, |event| match event {
            ConversationEvent::Frame(model) if accept(&model) => Some(model),
            _ => None,
        })
        .await
    }

    async fn wait_live(events: &mut EventStream) {
        wait_for(events, |event| match event {
            ConversationEvent::LifecycleChanged {
                state: SessionState::Live,
            } => Some(()),
            _ => None,
        })
        .await;
    }

    async fn open_live(
        store: InMemoryMessageStore,
        config: RuntimeConfig,
    ) -> (ConversationRuntimeHandle, EventStream) {
        let handle = spawn_runtime(Arc::new(store), viewer(), config);
        let mut events = handle.subscribe();
        handle.send(open("c1")).await.expect("command should enqueue");
        wait_live(&mut events).await;
        (handle, events)
    }

    #[tokio::test]
    async fn open_goes_live_and_renders_seeded_messages() {
        let handle = spawn_runtime(Arc::new(seeded_store()), viewer(), fast_config());
        let mut events = handle.subscribe();
        handle.send(open("c1")).await.expect("command should enqueue");

        assert_eq!(
            next_event(&mut events).await,
            ConversationEvent::LifecycleChanged {
                state: SessionState::Subscribing
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            ConversationEvent::LifecycleChanged {
                state: SessionState::Live
            }
        );
        let ConversationEvent::Frame(model) = next_event(&mut events).await else {
            panic!("expected first frame");
        };
        let ids: Vec<&str> = model.items.iter().map(|i| i.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn actions_without_open_conversation_are_rejected() {
        let handle = spawn_runtime(Arc::new(seeded_store()), viewer(), fast_config());
        let mut events = handle.subscribe();
        handle
            .send(ConversationCommand::React {
                message_id: "m1".to_owned(),
                reaction: "like".to_owned(),
            })
            .await
            .expect("command should enqueue");

        match next_event(&mut events).await {
            ConversationEvent::ActionRejected { code, .. } => {
                assert_eq!(code, "no_active_conversation")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_reaction_type_is_rejected_at_the_boundary() {
        let (handle, mut events) = open_live(seeded_store(), fast_config()).await;
        handle
            .send(ConversationCommand::React {
                message_id: "m1".to_owned(),
                reaction: "thumbs".to_owned(),
            })
            .await
            .expect("command should enqueue");

        let code = wait_for(&mut events, |event| match event {
            ConversationEvent::ActionRejected { code, .. } => Some(code),
            _ => None,
        })
        .await;
        assert_eq!(code, "invalid_input");
    }

    #[tokio::test]
    async fn recalled_message_refuses_reactions() {
        let store = seeded_store();
        let (handle, mut events) = open_live(store.clone(), fast_config()).await;
        handle
            .send(ConversationCommand::Recall {
                message_id: "m2".to_owned(),
            })
            .await
            .expect("command should enqueue");

        let ack = wait_for(&mut events, |event| match event {
            ConversationEvent::MutationSettled(ack) => Some(ack),
            _ => None,
        })
        .await;
        assert_eq!(ack.state, MutationState::Committed);
        assert!(store.snapshot("c1").expect("snapshot").messages[1].is_recalled);

        handle
            .send(ConversationCommand::React {
                message_id: "m2".to_owned(),
                reaction: "like".to_owned(),
            })
            .await
            .expect("command should enqueue");
        let code = wait_for(&mut events, |event| match event {
            ConversationEvent::ActionRejected { code, .. } => Some(code),
            _ => None,
        })
        .await;
        assert_eq!(code, "invalid_state");

        let stored = store.snapshot("c1").expect("snapshot");
        assert!(stored.messages[1].reactions.is_empty());
    }

    #[tokio::test]
    async fn mark_read_adds_viewer_to_partner_messages() {
        let store = seeded_store();
        let (handle, mut events) = open_live(store.clone(), fast_config()).await;
        handle
            .send(ConversationCommand::MarkRead)
            .await
            .expect("command should enqueue");

        let ack = wait_for(&mut events, |event| match event {
            ConversationEvent::MutationSettled(ack) => Some(ack),
            _ => None,
        })
        .await;
        assert_eq!(ack.message_id, "m1");
        assert_eq!(ack.state, MutationState::Committed);

        let stored = store.snapshot("c1").expect("snapshot");
        assert!(stored.messages[0].read_by.contains(VIEWER));
        assert!(!stored.messages[1].read_by.contains(PARTNER));
    }

    #[tokio::test]
    async fn failed_reaction_is_shown_then_rolled_back() {
        let store = seeded_store();
        let (handle, mut events) = open_live(store.clone(), fast_config()).await;
        store.fail_next_writes(1).expect("inject failure");

        handle
            .send(ConversationCommand::React {
                message_id: "m1".to_owned(),
                reaction: "heart".to_owned(),
            })
            .await
            .expect("command should enqueue");

        wait_for_frame(&mut events, |model| {
            model.items[0].viewer_reaction == Some(ReactionKind::Heart)
        })
        .await;

        let ack = wait_for(&mut events, |event| match event {
            ConversationEvent::MutationSettled(ack) => Some(ack),
            _ => None,
        })
        .await;
        assert_eq!(ack.state, MutationState::RolledBack);
        assert_eq!(ack.error_code.as_deref(), Some("remote_commit_failed"));

        let notice = wait_for(&mut events, |event| match event {
            ConversationEvent::Notice(notice) => Some(notice),
            _ => None,
        })
        .await;
        assert!(notice.recoverable);

        let model = wait_for_frame(&mut events, |_| true).await;
        assert_eq!(model.items[0].viewer_reaction, None);
    }

    #[tokio::test]
    async fn sent_message_is_echoed_then_committed() {
        let store = seeded_store();
        let (handle, mut events) = open_live(store.clone(), fast_config()).await;

        handle
            .send(ConversationCommand::SendMessage {
                body: "hello there".to_owned(),
                media: Vec::new(),
            })
            .await
            .expect("command should enqueue");

        let echo = wait_for_frame(&mut events, |model| model.items.len() == 3).await;
        assert!(echo.scroll_to_newest);

        let ack = wait_for(&mut events, |event| match event {
            ConversationEvent::MutationSettled(ack) => Some(ack),
            _ => None,
        })
        .await;
        assert_eq!(ack.state, MutationState::Committed);

        let committed = wait_for_frame(&mut events, |model| {
            model
                .items
                .last()
                .is_some_and(|item| item.delivery == DeliveryState::Sent)
        })
        .await;
        assert_eq!(
            committed.items.last().and_then(|item| item.text.as_deref()),
            Some("hello there")
        );
        assert_eq!(store.snapshot("c1").expect("snapshot").messages.len(), 3);
    }

    #[tokio::test]
    async fn stale_rollback_after_switch_is_discarded() {
        let store = seeded_store().with_latency(Duration::from_millis(150));
        let (handle, mut events) = open_live(store.clone(), fast_config()).await;
        store.fail_next_writes(1).expect("inject failure");

        handle
            .send(ConversationCommand::React {
                message_id: "m1".to_owned(),
                reaction: "sad".to_owned(),
            })
            .await
            .expect("command should enqueue");
        handle.send(open("c2")).await.expect("command should enqueue");
        wait_for_frame(&mut events, |model| model.conversation_id == "c2").await;

        let deadline = Instant::now() + Duration::from_millis(400);
        while let Ok(event) = tokio::time::timeout_at(deadline, events.recv()).await {
            let event = event.expect("event receive");
            assert!(
                !matches!(
                    event,
                    ConversationEvent::MutationSettled(_) | ConversationEvent::Notice(_)
                ),
                "stale result leaked into the new conversation: {event:?}"
            );
            if let ConversationEvent::Frame(model) = &event {
                assert_eq!(model.conversation_id, "c2");
            }
        }
    }

    #[tokio::test]
    async fn out_of_order_partner_messages_render_sorted() {
        let store = seeded_store();
        let (_handle, mut events) = open_live(store.clone(), fast_config()).await;

        store
            .insert_messages(vec![message("m4", "c1", PARTNER, 4_000)])
            .expect("insert m4");
        wait_for_frame(&mut events, |model| model.items.len() == 3).await;
        store
            .insert_messages(vec![message("m3", "c1", PARTNER, 3_000)])
            .expect("insert m3");

        let model = wait_for_frame(&mut events, |model| model.items.len() == 4).await;
        let ids: Vec<&str> = model.items.iter().map(|i| i.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
        assert!(!model.scroll_to_newest);
    }

    #[tokio::test]
    async fn lost_stream_is_resubscribed() {
        let store = seeded_store();
        let (_handle, mut events) = open_live(store.clone(), fast_config()).await;

        store.close_streams("c1").expect("close streams");
        let retry = wait_for(&mut events, |event| match event {
            ConversationEvent::SubscriptionLost { retry_in_ms, .. } => Some(retry_in_ms),
            _ => None,
        })
        .await;
        assert_eq!(retry, Some(10));

        wait_live(&mut events).await;
    }

    #[tokio::test]
    async fn gives_up_after_attempt_limit() {
        let store = seeded_store();
        let (_handle, mut events) = open_live(store.clone(), fast_config()).await;

        store.set_offline(true).expect("go offline");
        store.close_streams("c1").expect("close streams");

        let notice = wait_for(&mut events, |event| match event {
            ConversationEvent::Notice(notice) => Some(notice),
            _ => None,
        })
        .await;
        assert_eq!(notice.code, "subscription_failed");
        assert!(!notice.recoverable);
    }

    #[tokio::test]
    async fn pointer_and_theme_updates_emit_frames() {
        let (handle, mut events) = open_live(seeded_store(), fast_config()).await;
        handle
            .send(ConversationCommand::Pointer(PointerEvent::TogglePicker {
                message_id: "m1".to_owned(),
            }))
            .await
            .expect("command should enqueue");

        let model = wait_for_frame(&mut events, |model| {
            model.open_picker_message_id.is_some()
        })
        .await;
        assert!(model.items[0].picker_open);

        let theme = ConversationTheme {
            background_color: messenger_core::Color::rgb(0, 0, 0),
            message_color: messenger_core::Color::rgb(0x44, 0x44, 0x44),
        };
        handle
            .send(ConversationCommand::SetTheme(theme))
            .await
            .expect("command should enqueue");
        let model = wait_for_frame(&mut events, |model| {
            model.background_color == theme.background_color
        })
        .await;
        assert_eq!(model.items[0].paint.background_color, theme.message_color);
    }

    #[tokio::test]
    async fn shutdown_command_stops_the_runtime() {
        let (handle, mut events) = open_live(seeded_store(), fast_config()).await;
        handle
            .send(ConversationCommand::Shutdown)
            .await
            .expect("command should enqueue");

        wait_for(&mut events, |event| match event {
            ConversationEvent::LifecycleChanged {
                state: SessionState::Idle,
            } => Some(()),
            _ => None,
        })
        .await;

        timeout(Duration::from_secs(2), async {
            while handle.send(ConversationCommand::Close).await.is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("command channel should close after shutdown");
    }
}
