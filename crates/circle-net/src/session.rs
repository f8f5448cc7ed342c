//! Attach / publish / subscribe lifecycle and the single peer session.
//!
//! The lifecycle owns every platform session id. Pending steps carry a
//! deadline; when one passes the step is abandoned and a callback arriving
//! for it later is closed and ignored.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use circle_shared::types::{ChatState, PeerDevice, PeerHandle, PeerStatus};

use crate::controller::Controller;
use crate::discovery::{check_preconditions, peer_from_service_info, service_info_for};
use crate::ranging::{meters_from_mm, precise_ranging_allowed};
use crate::transport::{RangingOutcome, SessionId, SessionRole};

const RANGING_FAILED: &str = "Failed to measure distance to peer.";

/// State of one discovery role inside an attached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoleState {
    Closed,
    /// `deadline` is `None` when the configured timeout does not fit in an `Instant`.
    Pending { deadline: Option<Instant> },
    Active(SessionId),
}

impl RoleState {
    fn session(&self) -> Option<SessionId> {
        match self {
            RoleState::Active(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Attaching {
        deadline: Option<Instant>,
    },
    Attached {
        attach: SessionId,
        publish: RoleState,
        subscribe: RoleState,
    },
    /// Both discovery roles ended. Restartable with `start_discovery`.
    Terminated,
}

/// Observable view of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Attaching,
    Attached { publishing: bool, subscribing: bool },
    Terminated,
}

impl Lifecycle {
    pub(crate) fn state(&self) -> LifecycleState {
        match self {
            Lifecycle::Idle => LifecycleState::Idle,
            Lifecycle::Attaching { .. } => LifecycleState::Attaching,
            Lifecycle::Attached {
                publish, subscribe, ..
            } => LifecycleState::Attached {
                publishing: publish.session().is_some(),
                subscribing: subscribe.session().is_some(),
            },
            Lifecycle::Terminated => LifecycleState::Terminated,
        }
    }

    /// Earliest pending deadline, if any step is waiting on the platform.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match self {
            Lifecycle::Attaching { deadline } => *deadline,
            Lifecycle::Attached {
                publish, subscribe, ..
            } => [publish, subscribe]
                .into_iter()
                .filter_map(|role| match role {
                    RoleState::Pending { deadline } => *deadline,
                    _ => None,
                })
                .min(),
            _ => None,
        }
    }

    fn role_mut(&mut self, role: SessionRole) -> Option<&mut RoleState> {
        match self {
            Lifecycle::Attached {
                publish, subscribe, ..
            } => Some(match role {
                SessionRole::Publish => publish,
                SessionRole::Subscribe => subscribe,
            }),
            _ => None,
        }
    }

    pub(crate) fn is_active(&self, role: SessionRole) -> bool {
        match self {
            Lifecycle::Attached {
                publish, subscribe, ..
            } => match role {
                SessionRole::Publish => publish.session().is_some(),
                SessionRole::Subscribe => subscribe.session().is_some(),
            },
            _ => false,
        }
    }

    /// Open discovery sessions, publish first.
    pub(crate) fn discovery_sessions(&self) -> Vec<SessionId> {
        match self {
            Lifecycle::Attached {
                publish, subscribe, ..
            } => [publish.session(), subscribe.session()]
                .into_iter()
                .flatten()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The current peer session.
#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub handle: PeerHandle,
    /// `None` when the session began with an unknown sender.
    pub peer: Option<PeerDevice>,
}

impl ActiveSession {
    pub fn peer_id(&self) -> Option<&str> {
        self.peer.as_ref().map(|p| p.unique_id.as_str())
    }
}

impl Controller {
    // -- discovery lifecycle --------------------------------------------------

    pub(crate) fn start_discovery(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Attaching { .. }) {
            debug!("Attach already in flight, ignoring start");
            return;
        }

        let capabilities = self.transport.capabilities();
        let permissions = self.transport.permissions();
        let profile = (self.profile)();
        if let Err(e) = check_preconditions(&capabilities, &permissions, profile.as_ref()) {
            warn!(error = %e, "Discovery preconditions not met");
            self.surface(e.to_string());
            return;
        }

        if matches!(self.lifecycle, Lifecycle::Attached { .. }) {
            info!("Restarting discovery");
            self.close_all_sessions();
            // Queued messages survive; they flush on the next connect.
            self.end_peer_session();
            self.chat.is_connected = false;
        }

        match self.transport.attach() {
            Ok(()) => {
                info!("Attach requested");
                self.lifecycle = Lifecycle::Attaching {
                    deadline: Instant::now().checked_add(self.config.attach_timeout),
                };
            }
            Err(e) => {
                warn!(error = %e, "Attach request rejected");
                self.lifecycle = Lifecycle::Idle;
                self.surface(format!("Wi-Fi Aware attach error: {e}"));
            }
        }
    }

    pub(crate) fn stop_discovery(&mut self) {
        self.close_all_sessions();
        self.end_peer_session();
        self.conversation = None;
        self.outbound.clear();
        self.pending_ranging.clear();
        self.registry.clear();
        self.chat = ChatState::reset_with("Discovery stopped.");
        info!("Discovery stopped");
    }

    /// Close every platform session this controller holds. Each close is
    /// attempted even if an earlier one fails.
    pub(crate) fn close_all_sessions(&mut self) {
        if let Lifecycle::Attached {
            attach,
            publish,
            subscribe,
        } = self.lifecycle
        {
            for (label, session) in [
                ("publish", publish.session()),
                ("subscribe", subscribe.session()),
                ("attach", Some(attach)),
            ] {
                if let Some(session) = session {
                    self.close_quietly(label, session);
                }
            }
        }
        self.lifecycle = Lifecycle::Idle;
    }

    fn close_quietly(&self, label: &str, session: SessionId) {
        match self.transport.close(session) {
            Ok(()) => debug!(session = %session, kind = label, "Closed session"),
            Err(e) => warn!(session = %session, kind = label, error = %e, "Close failed, ignoring"),
        }
    }

    pub(crate) fn on_attached(&mut self, session: SessionId) {
        if !matches!(self.lifecycle, Lifecycle::Attaching { .. }) {
            warn!(session = %session, "Late attach callback, closing session");
            self.close_quietly("attach", session);
            return;
        }

        info!(session = %session, "Attached");
        self.lifecycle = Lifecycle::Attached {
            attach: session,
            publish: RoleState::Closed,
            subscribe: RoleState::Closed,
        };
        self.start_role(SessionRole::Publish);
        self.start_role(SessionRole::Subscribe);
        self.settle_attach();
    }

    pub(crate) fn on_attach_failed(&mut self) {
        if !matches!(self.lifecycle, Lifecycle::Attaching { .. }) {
            debug!("Attach failure for an abandoned attach, ignoring");
            return;
        }
        warn!("Attach failed");
        self.lifecycle = Lifecycle::Idle;
        self.surface("Failed to attach to Wi-Fi Aware.");
    }

    fn start_role(&mut self, role: SessionRole) {
        let Lifecycle::Attached { attach, .. } = self.lifecycle else {
            return;
        };

        if !self.transport.permissions().discovery_granted() {
            warn!(role = role.label(), "Permissions revoked, not starting session");
            return;
        }

        let result = match role {
            SessionRole::Publish => {
                let profile = match (self.profile)() {
                    Some(profile) if profile.has_identity() => profile,
                    _ => {
                        warn!("No profile identity, not publishing");
                        return;
                    }
                };
                match service_info_for(&profile) {
                    Ok(info) => self
                        .transport
                        .publish(attach, &self.config.service_name, info),
                    Err(e) => {
                        self.surface(format!("Publish session error: {e}"));
                        return;
                    }
                }
            }
            SessionRole::Subscribe => self.transport.subscribe(attach, &self.config.service_name),
        };

        match result {
            Ok(()) => {
                let deadline = Instant::now().checked_add(self.config.discovery_timeout);
                if let Some(slot) = self.lifecycle.role_mut(role) {
                    *slot = RoleState::Pending { deadline };
                }
                debug!(role = role.label(), "Discovery session requested");
            }
            Err(e) => {
                warn!(role = role.label(), error = %e, "Discovery session request rejected");
                self.surface(format!("{} session error: {e}", role.label()));
            }
        }
    }

    pub(crate) fn on_discovery_started(&mut self, role: SessionRole, session: SessionId) {
        if let Some(slot) = self.lifecycle.role_mut(role) {
            if matches!(slot, RoleState::Pending { .. }) {
                *slot = RoleState::Active(session);
                info!(role = role.label(), session = %session, "Discovery session started");
                return;
            }
        }
        warn!(role = role.label(), session = %session, "Late discovery session, closing");
        self.close_quietly(role.label(), session);
    }

    pub(crate) fn on_discovery_failed(&mut self, role: SessionRole) {
        if !self.take_role_if(role, |slot| matches!(slot, RoleState::Pending { .. })) {
            debug!(role = role.label(), "Failure for abandoned discovery session");
            return;
        }
        warn!(role = role.label(), "Discovery session failed to start");
        self.surface(format!("{} session error: configuration failed", role.label()));
        self.settle_attach();
    }

    pub(crate) fn on_session_terminated(&mut self, role: SessionRole) {
        if !self.take_role_if(role, |slot| matches!(slot, RoleState::Active(_))) {
            debug!(role = role.label(), "Termination of inactive session ignored");
            return;
        }

        warn!(role = role.label(), "Discovery session terminated by platform");
        self.end_peer_session();
        self.chat.is_connected = false;
        self.surface(format!("{} session terminated.", role.label()));
        self.settle_attach();
    }

    /// Close the role's slot if it matches. Returns whether it did.
    fn take_role_if(&mut self, role: SessionRole, pred: impl Fn(&RoleState) -> bool) -> bool {
        match self.lifecycle.role_mut(role) {
            Some(slot) if pred(slot) => {
                *slot = RoleState::Closed;
                true
            }
            _ => false,
        }
    }

    /// Once neither role is open or pending, release the attach session.
    fn settle_attach(&mut self) {
        if let Lifecycle::Attached {
            attach,
            publish: RoleState::Closed,
            subscribe: RoleState::Closed,
        } = self.lifecycle
        {
            info!("No discovery sessions left, releasing attach");
            self.close_quietly("attach", attach);
            self.lifecycle = Lifecycle::Terminated;
        }
    }

    pub(crate) fn on_deadline(&mut self, now: Instant) {
        if matches!(self.lifecycle, Lifecycle::Attaching { deadline: Some(deadline) } if deadline <= now) {
            warn!("Attach timed out");
            self.lifecycle = Lifecycle::Idle;
            self.surface("Timed out attaching to Wi-Fi Aware.");
            return;
        }

        let mut expired = Vec::new();
        if let Lifecycle::Attached {
            publish, subscribe, ..
        } = &mut self.lifecycle
        {
            for (role, slot) in [
                (SessionRole::Publish, publish),
                (SessionRole::Subscribe, subscribe),
            ] {
                if matches!(*slot, RoleState::Pending { deadline: Some(deadline) } if deadline <= now) {
                    *slot = RoleState::Closed;
                    expired.push(role);
                }
            }
        }

        for role in &expired {
            warn!(role = role.label(), "Discovery session timed out");
            self.surface(format!("{} session timed out.", role.label()));
        }
        if !expired.is_empty() {
            self.settle_attach();
        }
    }

    // -- peers ----------------------------------------------------------------

    pub(crate) fn on_service_discovered(&mut self, handle: PeerHandle, service_info: Option<&[u8]>) {
        if !self.lifecycle.is_active(SessionRole::Subscribe) {
            debug!(handle = %handle, "Discovery outside an active subscription, ignoring");
            return;
        }

        let mut peer = peer_from_service_info(handle, service_info);
        if !peer.has_identity() {
            return;
        }
        peer.distance = self.ranging.estimate(&peer);

        let mut is_current = false;
        if let Some(active) = self.session.as_mut() {
            if active.peer_id() == Some(peer.unique_id.as_str()) {
                peer.status = PeerStatus::Connected;
                active.handle = handle;
                active.peer = Some(peer.clone());
                is_current = true;
            }
        }

        let unique_id = peer.unique_id.clone();
        info!(peer = %unique_id, nickname = %peer.nickname, handle = %handle, "Discovered peer");
        self.registry.upsert(peer.clone());
        self.request_precise_ranging(handle, &unique_id);

        if self.config.auto_connect && !is_current {
            self.registry.set_status(&unique_id, PeerStatus::Connecting);
            self.connect_to_peer(peer);
        }
    }

    fn request_precise_ranging(&mut self, handle: PeerHandle, unique_id: &str) {
        if !self.config.precise_ranging {
            return;
        }
        let capabilities = self.transport.capabilities();
        let permissions = self.transport.permissions();
        if !precise_ranging_allowed(&capabilities, &permissions) {
            return;
        }

        match self.transport.start_ranging(handle) {
            Ok(()) => {
                self.pending_ranging.insert(handle, unique_id.to_string());
            }
            Err(e) => warn!(peer = %unique_id, error = %e, "Ranging request rejected"),
        }
    }

    pub(crate) fn on_ranging_completed(&mut self, handle: PeerHandle, outcome: RangingOutcome) {
        let Some(unique_id) = self.pending_ranging.remove(&handle) else {
            debug!(handle = %handle, "Unsolicited ranging result");
            return;
        };

        match outcome {
            RangingOutcome::Success { distance_mm } => {
                let meters = meters_from_mm(distance_mm);
                if self.registry.update_distance(&unique_id, meters) {
                    debug!(peer = %unique_id, meters, "Measured distance");
                }
            }
            RangingOutcome::NoResult => {
                warn!(peer = %unique_id, "Ranging returned no result");
                self.surface(RANGING_FAILED);
            }
            RangingOutcome::Failed { code } => {
                warn!(peer = %unique_id, code, "Ranging failed");
                self.surface(RANGING_FAILED);
            }
        }
    }

    // -- peer session ---------------------------------------------------------

    pub(crate) fn connect_to_peer(&mut self, peer: PeerDevice) {
        // Prefer the registry's view, it carries the freshest handle.
        let peer = self
            .registry
            .get(&peer.unique_id)
            .filter(|known| known.handle.is_some())
            .cloned()
            .unwrap_or(peer);

        let Some(handle) = peer.handle else {
            warn!(peer = %peer.unique_id, "Cannot connect, peer has no handle");
            self.surface("Peer has no transport handle.");
            return;
        };

        if let Some(previous) = self.session.take() {
            if let Some(previous_id) = previous.peer_id() {
                if previous_id != peer.unique_id {
                    info!(peer = %previous_id, "Superseding previous peer session");
                    self.registry.set_status(previous_id, PeerStatus::Discovered);
                }
            }
        }

        let mut peer = peer;
        peer.status = PeerStatus::Connected;
        self.registry.set_status(&peer.unique_id, PeerStatus::Connected);
        info!(peer = %peer.unique_id, handle = %handle, "Connected to peer");

        self.session = Some(ActiveSession {
            handle,
            peer: Some(peer),
        });
        self.chat.is_connected = true;
        self.chat.error = None;
        self.flush_outbound();
    }

    pub(crate) fn disconnect_from_peer(&mut self) {
        self.end_peer_session();
        self.conversation = None;
        self.chat = ChatState::reset_with("Disconnected from peer.");
        info!("Disconnected from peer");
    }

    /// Drop the active session, returning its peer to `Discovered`.
    pub(crate) fn end_peer_session(&mut self) {
        if let Some(active) = self.session.take() {
            if let Some(peer_id) = active.peer_id() {
                self.registry.set_status(peer_id, PeerStatus::Discovered);
            }
        }
    }
}
