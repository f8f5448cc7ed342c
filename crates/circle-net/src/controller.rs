//! Discovery and chat controller, run as a single tokio task.
//!
//! User commands, platform callbacks, finished history loads and elapsed
//! deadlines are all funnelled into one [`Input`] stream and applied by one
//! transition function, so no two mutations ever interleave. After every
//! input the resulting state is published on `watch` channels; readers get
//! immutable snapshots without touching controller state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use circle_shared::constants::{
    DEFAULT_ATTACH_TIMEOUT_SECS, DEFAULT_DISCOVERY_TIMEOUT_SECS, MESSAGE_TYPE, SERVICE_NAME,
    UNASSIGNED_PEER_ID,
};
use circle_shared::persistence::MessageStore;
use circle_shared::types::{
    ChatMessage, ChatState, MessageId, MessageRecord, PeerDevice, PeerHandle,
};

use crate::discovery::ProfileProvider;
use crate::peers::PeerRegistry;
use crate::persistence::{HistoryScope, PersistenceQueue};
use crate::ranging::{PlaceholderRanging, RangingStrategy};
use crate::session::{ActiveSession, Lifecycle, LifecycleState};
use crate::transport::{AwareTransport, TransportError, TransportEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Controller tuning knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Service name announced by publish and matched by subscribe.
    pub service_name: String,
    /// Message type tag passed with every payload.
    pub message_type: u8,
    /// How long an attach request may stay unanswered.
    pub attach_timeout: Duration,
    /// How long publish/subscribe may take to start.
    pub discovery_timeout: Duration,
    /// Connect to every newly discovered peer.
    pub auto_connect: bool,
    /// Ask the transport for precise ranging when the device allows it.
    pub precise_ranging: bool,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            message_type: MESSAGE_TYPE,
            attach_timeout: Duration::from_secs(DEFAULT_ATTACH_TIMEOUT_SECS),
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            auto_connect: false,
            precise_ranging: true,
            command_buffer: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Command / input types
// ---------------------------------------------------------------------------

/// Commands sent *into* the controller task.
#[derive(Debug)]
pub enum ControllerCommand {
    StartDiscovery,
    StopDiscovery,
    ConnectToPeer(PeerDevice),
    DisconnectFromPeer,
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<SendOutcome, ControllerError>>,
    },
    MarkMessageRead(MessageId),
    /// Connect and replay persisted history for the peer.
    OpenConversation(PeerDevice),
    LoadQueuedMessages(String),
    DeleteConversation(String),
    ClearError,
    SetAutoConnect(bool),
    Shutdown,
}

/// Everything the transition function consumes.
#[derive(Debug)]
pub(crate) enum Input {
    Command(ControllerCommand),
    Transport(TransportEvent),
    HistoryLoaded {
        peer_id: String,
        scope: HistoryScope,
        records: Vec<MessageRecord>,
    },
    DeadlineElapsed,
}

/// What happened to a message handed to `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(MessageId),
    /// No peer session; the message waits in the outbound queue.
    Queued(MessageId),
}

impl SendOutcome {
    pub fn id(&self) -> &MessageId {
        match self {
            SendOutcome::Sent(id) | SendOutcome::Queued(id) => id,
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("message content is blank")]
    EmptyMessage,

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Send error: {0}")]
    Transport(#[from] TransportError),

    #[error("controller stopped")]
    Closed,
}

// ---------------------------------------------------------------------------
// Controller state
// ---------------------------------------------------------------------------

pub struct Controller {
    pub(crate) config: ControllerConfig,
    pub(crate) transport: Arc<dyn AwareTransport>,
    pub(crate) profile: ProfileProvider,
    pub(crate) ranging: Box<dyn RangingStrategy>,
    pub(crate) persistence: PersistenceQueue,

    pub(crate) lifecycle: Lifecycle,
    /// The one active peer session, if any.
    pub(crate) session: Option<ActiveSession>,
    /// Peer whose conversation is open, used to tag persisted messages.
    pub(crate) conversation: Option<String>,
    pub(crate) outbound: Vec<ChatMessage>,
    pub(crate) registry: PeerRegistry,
    /// Precise ranging requests in flight, by handle.
    pub(crate) pending_ranging: HashMap<PeerHandle, String>,
    pub(crate) chat: ChatState,

    chat_tx: watch::Sender<ChatState>,
    peers_tx: watch::Sender<Vec<PeerDevice>>,
    lifecycle_tx: watch::Sender<LifecycleState>,
    internal_tx: mpsc::UnboundedSender<Input>,
}

/// Builds and spawns a controller task.
pub struct ControllerBuilder {
    transport: Arc<dyn AwareTransport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    profile: ProfileProvider,
    config: ControllerConfig,
    ranging: Box<dyn RangingStrategy>,
    store: Option<Arc<dyn MessageStore>>,
}

impl ControllerBuilder {
    pub fn new(
        transport: Arc<dyn AwareTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        profile: ProfileProvider,
    ) -> Self {
        Self {
            transport,
            events,
            profile,
            config: ControllerConfig::default(),
            ranging: Box::new(PlaceholderRanging::new()),
            store: None,
        }
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ranging(mut self, ranging: impl RangingStrategy) -> Self {
        self.ranging = Box::new(ranging);
        self
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Spawn the controller in a background tokio task.
    pub fn spawn(self) -> ControllerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = watch::channel(ChatState::default());
        let (peers_tx, peers_rx) = watch::channel(Vec::new());
        let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleState::Idle);

        let persistence = match self.store {
            Some(store) => PersistenceQueue::spawn(store),
            None => PersistenceQueue::disabled(),
        };

        let controller = Controller {
            config: self.config,
            transport: self.transport,
            profile: self.profile,
            ranging: self.ranging,
            persistence,
            lifecycle: Lifecycle::Idle,
            session: None,
            conversation: None,
            outbound: Vec::new(),
            registry: PeerRegistry::new(),
            pending_ranging: HashMap::new(),
            chat: ChatState::default(),
            chat_tx,
            peers_tx,
            lifecycle_tx,
            internal_tx,
        };

        tokio::spawn(controller.run(cmd_rx, self.events, internal_rx));

        ControllerHandle {
            cmd_tx,
            chat_rx,
            peers_rx,
            lifecycle_rx,
        }
    }
}

impl Controller {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ControllerCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Input>,
    ) {
        info!(service = %self.config.service_name, "Controller started");

        loop {
            let deadline = self.lifecycle.next_deadline();

            let input = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ControllerCommand::Shutdown) => {
                        info!("Controller shutdown requested");
                        break;
                    }
                    Some(cmd) => Input::Command(cmd),
                    None => {
                        info!("Command channel closed, shutting down controller");
                        break;
                    }
                },
                Some(event) = events.recv() => Input::Transport(event),
                Some(input) = internal_rx.recv() => input,
                _ = sleep_until(deadline) => Input::DeadlineElapsed,
            };

            self.apply(input);
            self.publish();
        }

        self.close_all_sessions();
        info!("Controller task terminated");
    }

    /// The single state-transition function.
    pub(crate) fn apply(&mut self, input: Input) {
        match input {
            Input::Command(cmd) => self.on_command(cmd),
            Input::Transport(event) => self.on_transport_event(event),
            Input::HistoryLoaded {
                peer_id,
                scope,
                records,
            } => self.on_history_loaded(peer_id, scope, records),
            Input::DeadlineElapsed => self.on_deadline(Instant::now()),
        }
    }

    fn on_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::StartDiscovery => self.start_discovery(),
            ControllerCommand::StopDiscovery => self.stop_discovery(),
            ControllerCommand::ConnectToPeer(peer) => self.connect_to_peer(peer),
            ControllerCommand::DisconnectFromPeer => self.disconnect_from_peer(),
            ControllerCommand::SendMessage { text, reply } => {
                let _ = reply.send(self.send_message(text));
            }
            ControllerCommand::MarkMessageRead(id) => self.mark_message_read(&id),
            ControllerCommand::OpenConversation(peer) => self.open_conversation(peer),
            ControllerCommand::LoadQueuedMessages(peer_id) => {
                self.request_history(peer_id, HistoryScope::QueuedOnly)
            }
            ControllerCommand::DeleteConversation(peer_id) => self.delete_conversation(peer_id),
            ControllerCommand::ClearError => self.chat.error = None,
            ControllerCommand::SetAutoConnect(enabled) => {
                debug!(enabled, "Auto-connect toggled");
                self.config.auto_connect = enabled;
            }
            ControllerCommand::Shutdown => {}
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Attached { session } => self.on_attached(session),
            TransportEvent::AttachFailed => self.on_attach_failed(),
            TransportEvent::DiscoveryStarted { role, session } => {
                self.on_discovery_started(role, session)
            }
            TransportEvent::DiscoveryFailed { role } => self.on_discovery_failed(role),
            TransportEvent::ServiceDiscovered { peer, service_info } => {
                self.on_service_discovered(peer, service_info.as_deref())
            }
            TransportEvent::MessageReceived {
                role,
                peer,
                payload,
            } => self.on_message_received(role, peer, &payload),
            TransportEvent::SessionTerminated { role } => self.on_session_terminated(role),
            TransportEvent::RangingCompleted { peer, outcome } => {
                self.on_ranging_completed(peer, outcome)
            }
        }
    }

    /// Set the user-visible error.
    pub(crate) fn surface(&mut self, error: impl Into<String>) {
        let error = error.into();
        debug!(error = %error, "Surfacing error");
        self.chat.error = Some(error);
    }

    /// Peer id used to tag persisted messages right now.
    pub(crate) fn conversation_peer_id(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.peer_id())
            .or(self.conversation.as_deref())
            .unwrap_or(UNASSIGNED_PEER_ID)
            .to_string()
    }

    pub(crate) fn persist(&self, message: &ChatMessage, peer_id: impl Into<String>) {
        self.persistence
            .insert(MessageRecord::from_message(message, peer_id));
    }

    /// Queue a history load whose result re-enters the controller as an input.
    pub(crate) fn request_history(&self, peer_id: String, scope: HistoryScope) {
        if !self.persistence.is_enabled() {
            debug!(peer = %peer_id, "No message store configured, skipping history");
            return;
        }
        let rx = self.persistence.load(peer_id.clone(), scope);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(records)) => {
                    let _ = tx.send(Input::HistoryLoaded {
                        peer_id,
                        scope,
                        records,
                    });
                }
                Ok(Err(e)) => warn!(peer = %peer_id, error = %e, "History load failed"),
                Err(_) => debug!(peer = %peer_id, "History load abandoned"),
            }
        });
    }

    /// Push changed snapshots to observers.
    fn publish(&self) {
        self.chat_tx.send_if_modified(|current| {
            if *current != self.chat {
                *current = self.chat.clone();
                true
            } else {
                false
            }
        });

        self.peers_tx.send_if_modified(|current| {
            if self.registry.differs_from(current) {
                *current = self.registry.snapshot();
                true
            } else {
                false
            }
        });

        let lifecycle = self.lifecycle.state();
        self.lifecycle_tx.send_if_modified(|current| {
            if *current != lifecycle {
                *current = lifecycle;
                true
            } else {
                false
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::Sender<ControllerCommand>,
    chat_rx: watch::Receiver<ChatState>,
    peers_rx: watch::Receiver<Vec<PeerDevice>>,
    lifecycle_rx: watch::Receiver<LifecycleState>,
}

impl ControllerHandle {
    async fn command(&self, cmd: ControllerCommand) -> Result<(), ControllerError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ControllerError::Closed)
    }

    pub async fn start_discovery(&self) -> Result<(), ControllerError> {
        self.command(ControllerCommand::StartDiscovery).await
    }

    pub async fn stop_discovery(&self) -> Result<(), ControllerError> {
        self.command(ControllerCommand::StopDiscovery).await
    }

    pub async fn connect_to_peer(&self, peer: PeerDevice) -> Result<(), ControllerError> {
        self.command(ControllerCommand::ConnectToPeer(peer)).await
    }

    pub async fn disconnect_from_peer(&self) -> Result<(), ControllerError> {
        self.command(ControllerCommand::DisconnectFromPeer).await
    }

    /// Send or queue a text message.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
    ) -> Result<SendOutcome, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.command(ControllerCommand::SendMessage {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn mark_message_read(&self, id: MessageId) -> Result<(), ControllerError> {
        self.command(ControllerCommand::MarkMessageRead(id)).await
    }

    pub async fn open_conversation(&self, peer: PeerDevice) -> Result<(), ControllerError> {
        self.command(ControllerCommand::OpenConversation(peer)).await
    }

    pub async fn load_queued_messages(
        &self,
        peer_id: impl Into<String>,
    ) -> Result<(), ControllerError> {
        self.command(ControllerCommand::LoadQueuedMessages(peer_id.into()))
            .await
    }

    pub async fn delete_conversation(
        &self,
        peer_id: impl Into<String>,
    ) -> Result<(), ControllerError> {
        self.command(ControllerCommand::DeleteConversation(peer_id.into()))
            .await
    }

    pub async fn clear_error(&self) -> Result<(), ControllerError> {
        self.command(ControllerCommand::ClearError).await
    }

    pub async fn set_auto_connect(&self, enabled: bool) -> Result<(), ControllerError> {
        self.command(ControllerCommand::SetAutoConnect(enabled)).await
    }

    /// Stop the controller task, closing every platform session.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.command(ControllerCommand::Shutdown).await
    }

    pub fn chat_state(&self) -> watch::Receiver<ChatState> {
        self.chat_rx.clone()
    }

    pub fn discovered_peers(&self) -> watch::Receiver<Vec<PeerDevice>> {
        self.peers_rx.clone()
    }

    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle_rx.clone()
    }

    /// Current chat snapshot.
    pub fn snapshot(&self) -> ChatState {
        self.chat_rx.borrow().clone()
    }

    pub fn is_currently_connected(&self) -> bool {
        self.chat_rx.borrow().is_connected
    }
}
