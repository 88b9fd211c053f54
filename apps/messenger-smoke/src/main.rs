mod config;
mod logging;

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use messenger_core::{
    ConversationCommand, ConversationEvent, DraftMessage, MessagePatch, MutationState,
    PointerEvent, RenderModel,
};
use messenger_runtime::{ConversationRuntimeHandle, spawn_runtime};
use messenger_store::{IdentityProvider, InMemoryMessageStore, StaticIdentity, StoreError};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::SmokeConfig;

const CONVERSATION_ID: &str = "smoke-conversation";

#[derive(Debug, Default)]
struct Tally {
    frames: usize,
    committed: usize,
    rolled_back: usize,
    rejected: usize,
    notices: usize,
    last_frame: Option<RenderModel>,
}

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid smoke configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), String> {
    let store = InMemoryMessageStore::new().with_latency(config.store_latency());
    seed_conversation(&store, &config).map_err(|err| err.to_string())?;

    let identity = StaticIdentity::new(messenger_core::Viewer {
        id: config.viewer_id.clone(),
        display_name: config.viewer_id.clone(),
        avatar_ref: None,
    });
    let viewer = identity.current_viewer().map_err(|err| err.to_string())?;

    let handle = spawn_runtime(Arc::new(store.clone()), viewer, config.runtime_config());
    let printer = tokio::spawn(collect_events(handle.subscribe()));

    script(&handle, &store, &config).await?;

    handle.shutdown();
    drop(handle);
    let tally = tokio::time::timeout(Duration::from_secs(5), printer)
        .await
        .map_err(|_| "event collector did not finish".to_owned())?
        .map_err(|err| format!("event collector panicked: {err}"))?;

    if let Some(frame) = &tally.last_frame {
        let json = serde_json::to_string_pretty(frame).map_err(|err| err.to_string())?;
        println!("{json}");
    }
    println!(
        "frames={} committed={} rolled_back={} rejected={} notices={}",
        tally.frames, tally.committed, tally.rolled_back, tally.rejected, tally.notices
    );

    if tally.rolled_back == 0 || tally.rejected < 2 || tally.committed == 0 {
        return Err("expected commits, a rollback and local rejections".to_owned());
    }
    Ok(())
}

fn seed_conversation(store: &InMemoryMessageStore, config: &SmokeConfig) -> Result<(), StoreError> {
    store.create_conversation(CONVERSATION_ID)?;
    let now = now_ms();
    store.insert_messages(vec![
        DraftMessage::new(&config.partner_id, now.saturating_sub(60_000))
            .with_content("hey, are you around?")
            .into_message(CONVERSATION_ID),
        DraftMessage::new(&config.partner_id, now.saturating_sub(30_000))
            .with_content("about that thing from last week")
            .with_reply_to(Some("message-outside-window".to_owned()))
            .into_message(CONVERSATION_ID),
    ])
}

async fn script(
    handle: &ConversationRuntimeHandle,
    store: &InMemoryMessageStore,
    config: &SmokeConfig,
) -> Result<(), String> {
    let pause = Duration::from_millis(config.store_latency_ms + 100);
    let send = move |command: ConversationCommand| async move {
        handle.send(command).await.map_err(|err| err.to_string())?;
        tokio::time::sleep(pause).await;
        Ok::<(), String>(())
    };

    send(ConversationCommand::Open {
        conversation_id: CONVERSATION_ID.to_owned(),
        partner_id: config.partner_id.clone(),
    })
    .await?;

    let partner_message = latest_from(store, &config.partner_id)?;
    for pointer in [
        PointerEvent::Enter {
            message_id: partner_message.clone(),
        },
        PointerEvent::TogglePicker {
            message_id: partner_message.clone(),
        },
    ] {
        // Pointer traffic is lossy; a full queue just drops the event.
        if let Err(err) = handle.try_send(ConversationCommand::Pointer(pointer)) {
            warn!(%err, "pointer event dropped");
        }
    }
    send(ConversationCommand::React {
        message_id: partner_message.clone(),
        reaction: "heart".to_owned(),
    })
    .await?;
    send(ConversationCommand::BeginReply {
        message_id: partner_message.clone(),
    })
    .await?;
    send(ConversationCommand::SendMessage {
        body: "yes, what's up?".to_owned(),
        media: Vec::new(),
    })
    .await?;
    send(ConversationCommand::MarkRead).await?;

    let own = latest_from(store, &config.viewer_id)?;
    info!(message_id = %own, "partner reads the reply");
    store
        .apply_patch(
            &own,
            &MessagePatch::AddReader {
                reader_id: config.partner_id.clone(),
            },
        )
        .map_err(|err| err.to_string())?;
    tokio::time::sleep(pause).await;

    send(ConversationCommand::React {
        message_id: partner_message.clone(),
        reaction: "thumbs".to_owned(),
    })
    .await?;

    store.fail_next_writes(1).map_err(|err| err.to_string())?;
    send(ConversationCommand::React {
        message_id: partner_message,
        reaction: "wow".to_owned(),
    })
    .await?;

    send(ConversationCommand::Recall {
        message_id: own.clone(),
    })
    .await?;
    send(ConversationCommand::React {
        message_id: own,
        reaction: "like".to_owned(),
    })
    .await?;

    send(ConversationCommand::Close).await?;
    handle
        .send(ConversationCommand::Shutdown)
        .await
        .map_err(|err| err.to_string())
}

/// Id of the newest stored message sent by `sender_id`.
fn latest_from(store: &InMemoryMessageStore, sender_id: &str) -> Result<String, String> {
    let snapshot = store
        .snapshot(CONVERSATION_ID)
        .map_err(|err| err.to_string())?;
    snapshot
        .messages
        .iter()
        .rev()
        .find(|message| message.is_authored_by(sender_id))
        .map(|message| message.id.clone())
        .ok_or_else(|| format!("no message from {sender_id}"))
}

async fn collect_events(mut events: messenger_core::EventStream) -> Tally {
    let mut tally = Tally::default();
    loop {
        match events.recv().await {
            Ok(ConversationEvent::Frame(frame)) => {
                tally.frames += 1;
                info!(
                    items = frame.items.len(),
                    scroll_to_newest = frame.scroll_to_newest,
                    "frame"
                );
                tally.last_frame = Some(frame);
            }
            Ok(ConversationEvent::MutationSettled(ack)) => {
                match ack.state {
                    MutationState::Committed => tally.committed += 1,
                    MutationState::RolledBack => tally.rolled_back += 1,
                    MutationState::Pending => {}
                }
                info!(mutation_id = ack.mutation_id, state = ?ack.state, "mutation settled");
            }
            Ok(ConversationEvent::ActionRejected { code, message }) => {
                tally.rejected += 1;
                info!(%code, %message, "action rejected");
            }
            Ok(ConversationEvent::Notice(notice)) => {
                tally.notices += 1;
                info!(code = %notice.code, message = %notice.message, "notice");
            }
            Ok(ConversationEvent::LifecycleChanged { state }) => {
                info!(?state, "lifecycle changed");
            }
            Ok(ConversationEvent::SubscriptionLost {
                conversation_id,
                retry_in_ms,
            }) => {
                warn!(%conversation_id, ?retry_in_ms, "subscription lost");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event collector lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tally
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
