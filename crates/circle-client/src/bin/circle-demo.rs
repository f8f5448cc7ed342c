//! Two simulated devices discovering each other and chatting over the
//! loopback transport.
//!
//! Each device gets its own in-memory SQLite store; `CIRCLE_*` variables
//! tune the controllers the same way they would on a real device.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

use circle_client::{App, ClientConfig};
use circle_net::{DeviceSettings, LoopbackMedium};
use circle_shared::types::{ChatState, PeerDevice, UserProfile};
use circle_store::SqliteStore;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    circle_client::init_tracing();
    info!("Starting {} demo v{}", circle_shared::constants::APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let medium = LoopbackMedium::new();
    let alice = spawn_device(&medium, &config, "Alice").await?;
    let bob = spawn_device(&medium, &config, "Bob").await?;

    futures::future::try_join(
        alice.controller().start_discovery(),
        bob.controller().start_discovery(),
    )
    .await?;

    let bob_id = profile_id(&bob)?;
    let peer = wait_for_peer(&alice, &bob_id).await?;
    info!(peer = %peer.unique_id, nickname = %peer.nickname, distance = ?peer.distance, "Alice sees Bob");

    // Written before any session exists, so it waits in the queue.
    let early = alice.controller().send_message("Are you nearby?").await?;
    info!(outcome = ?early, "Alice queued a message");

    alice.controller().open_conversation(peer).await?;
    alice.controller().send_message("Found you!").await?;

    let received = wait_chat(&bob, |s| s.messages.len() >= 2).await?;
    for message in &received.messages {
        info!(id = %message.id, status = %message.status, "Bob received: {}", message.content);
    }

    let reply = bob.controller().send_message("Hi Alice, over here.").await?;
    let state = wait_chat(&alice, |s| s.contains(reply.id())).await?;
    for message in &state.messages {
        let who = if message.is_from_me { "Alice" } else { "Bob" };
        info!(status = %message.status, "[{who}] {}", message.content);
    }

    futures::future::try_join_all([alice.shutdown(), bob.shutdown()]).await?;
    info!("Demo finished");
    Ok(())
}

async fn spawn_device(
    medium: &LoopbackMedium,
    config: &ClientConfig,
    nickname: &str,
) -> anyhow::Result<App> {
    let (transport, events) = medium.add_device(DeviceSettings::default());
    let store = Arc::new(SqliteStore::in_memory().context("opening in-memory store")?);
    let app = App::with_store(config.clone(), store, Arc::new(transport), events).await?;

    let mut profile = UserProfile::new();
    profile.nickname = nickname.to_string();
    profile.has_completed_setup = true;
    app.save_profile(profile).await?;
    Ok(app)
}

fn profile_id(app: &App) -> anyhow::Result<String> {
    match app.preferences().user_profile() {
        Some(profile) => Ok(profile.unique_id),
        None => bail!("device has no profile"),
    }
}

async fn wait_for_peer(app: &App, unique_id: &str) -> anyhow::Result<PeerDevice> {
    let mut peers = app.controller().discovered_peers();
    let found = tokio::time::timeout(
        STEP_TIMEOUT,
        peers.wait_for(|peers| peers.iter().any(|p| p.unique_id == unique_id)),
    )
    .await
    .context("timed out waiting for discovery")??;

    found
        .iter()
        .find(|p| p.unique_id == unique_id)
        .cloned()
        .context("peer vanished")
}

async fn wait_chat(app: &App, pred: impl FnMut(&ChatState) -> bool) -> anyhow::Result<ChatState> {
    let mut chat = app.controller().chat_state();
    let state = tokio::time::timeout(STEP_TIMEOUT, chat.wait_for(pred))
        .await
        .context("timed out waiting for chat")??;
    Ok(state.clone())
}
