//! In-memory transport connecting simulated devices.
//!
//! Every device added to a [`LoopbackMedium`] gets its own event channel.
//! Publishing and subscribing under the same service name makes devices
//! discover each other; sends are delivered straight into the peer's event
//! channel. Settings allow failures to be injected per device.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use circle_shared::types::PeerHandle;

use crate::transport::{
    AwareTransport, Capabilities, Permissions, RangingOutcome, SessionId, SessionRole,
    TransportError, TransportEvent,
};

/// How a device answers attach requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachBehavior {
    Succeed,
    /// Accept the request, then report `AttachFailed`.
    Fail,
    /// Refuse the request outright.
    Reject(String),
    /// Accept the request and never answer.
    Hang,
}

/// Per-device simulation knobs.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub capabilities: Capabilities,
    pub permissions: Permissions,
    pub attach: AttachBehavior,
    pub fail_sends: bool,
    pub fail_close: bool,
    /// Publish/subscribe requests are accepted but never confirmed.
    pub hang_discovery: bool,
    /// Distance other devices measure to this one. `None` yields no result.
    pub distance_mm: Option<u32>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                discovery_available: true,
                ranging_supported: false,
            },
            permissions: Permissions::all(),
            attach: AttachBehavior::Succeed,
            fail_sends: false,
            fail_close: false,
            hang_discovery: false,
            distance_mm: None,
        }
    }
}

/// A payload handed to the medium by one device.
#[derive(Debug, Clone)]
pub struct SentPayload {
    pub session: SessionId,
    pub to: PeerHandle,
    pub message_type: u8,
    pub payload: Bytes,
}

impl SentPayload {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct Device {
    handle: PeerHandle,
    events: mpsc::UnboundedSender<TransportEvent>,
    settings: DeviceSettings,
    attach: Option<SessionId>,
    publish: Option<(SessionId, String, Bytes)>,
    subscribe: Option<(SessionId, String)>,
    sent: Vec<SentPayload>,
    closed: Vec<SessionId>,
    attach_requests: usize,
}

impl Device {
    fn emit(&self, event: TransportEvent) {
        trace!(device = %self.handle, ?event, "Loopback event");
        // The receiver is gone once the device's controller shut down.
        let _ = self.events.send(event);
    }

    fn role_of(&self, session: SessionId) -> Option<SessionRole> {
        match (&self.publish, &self.subscribe) {
            (Some((id, ..)), _) if *id == session => Some(SessionRole::Publish),
            (_, Some((id, _))) if *id == session => Some(SessionRole::Subscribe),
            _ => None,
        }
    }

    /// The role under which this device hears messages.
    fn listening_role(&self) -> Option<SessionRole> {
        if self.publish.is_some() {
            Some(SessionRole::Publish)
        } else if self.subscribe.is_some() {
            Some(SessionRole::Subscribe)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Medium {
    next_session: u64,
    devices: Vec<Device>,
}

impl Medium {
    fn session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }
}

/// Shared air between simulated devices.
#[derive(Clone, Default)]
pub struct LoopbackMedium {
    inner: Arc<Mutex<Medium>>,
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Returns its transport and the event stream to hand to
    /// its controller.
    pub fn add_device(
        &self,
        settings: DeviceSettings,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut medium = lock(&self.inner);
        let index = medium.devices.len();
        let handle = PeerHandle(index as u64 + 1);
        medium.devices.push(Device {
            handle,
            events,
            settings,
            attach: None,
            publish: None,
            subscribe: None,
            sent: Vec::new(),
            closed: Vec::new(),
            attach_requests: 0,
        });
        debug!(device = %handle, "Loopback device added");

        (
            LoopbackTransport {
                medium: self.inner.clone(),
                index,
            },
            rx,
        )
    }
}

fn lock(medium: &Mutex<Medium>) -> MutexGuard<'_, Medium> {
    medium.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One simulated device's view of the medium.
#[derive(Clone)]
pub struct LoopbackTransport {
    medium: Arc<Mutex<Medium>>,
    index: usize,
}

impl LoopbackTransport {
    /// The handle other devices see this device under.
    pub fn handle(&self) -> PeerHandle {
        lock(&self.medium).devices[self.index].handle
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut DeviceSettings)) {
        f(&mut lock(&self.medium).devices[self.index].settings);
    }

    /// Every payload this device sent, in order.
    pub fn sent(&self) -> Vec<SentPayload> {
        lock(&self.medium).devices[self.index].sent.clone()
    }

    /// Every session id this device was asked to close.
    pub fn closed(&self) -> Vec<SessionId> {
        lock(&self.medium).devices[self.index].closed.clone()
    }

    /// How many attach requests reached the medium.
    pub fn attach_requests(&self) -> usize {
        lock(&self.medium).devices[self.index].attach_requests
    }

    /// Whether the device currently holds a session in `role`.
    pub fn has_session(&self, role: SessionRole) -> bool {
        let medium = lock(&self.medium);
        let device = &medium.devices[self.index];
        match role {
            SessionRole::Publish => device.publish.is_some(),
            SessionRole::Subscribe => device.subscribe.is_some(),
        }
    }

    /// Deliver an arbitrary event to this device.
    pub fn inject(&self, event: TransportEvent) {
        lock(&self.medium).devices[self.index].emit(event);
    }

    /// Platform-initiated termination of one discovery session.
    pub fn terminate(&self, role: SessionRole) {
        let mut medium = lock(&self.medium);
        let device = &mut medium.devices[self.index];
        let had = match role {
            SessionRole::Publish => device.publish.take().is_some(),
            SessionRole::Subscribe => device.subscribe.take().is_some(),
        };
        if had {
            device.emit(TransportEvent::SessionTerminated { role });
        }
    }
}

impl AwareTransport for LoopbackTransport {
    fn capabilities(&self) -> Capabilities {
        lock(&self.medium).devices[self.index].settings.capabilities
    }

    fn permissions(&self) -> Permissions {
        lock(&self.medium).devices[self.index].settings.permissions
    }

    fn attach(&self) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        medium.devices[self.index].attach_requests += 1;
        let behavior = medium.devices[self.index].settings.attach.clone();
        match behavior {
            AttachBehavior::Succeed => {
                let session = medium.session_id();
                let device = &mut medium.devices[self.index];
                device.attach = Some(session);
                device.emit(TransportEvent::Attached { session });
                Ok(())
            }
            AttachBehavior::Fail => {
                medium.devices[self.index].emit(TransportEvent::AttachFailed);
                Ok(())
            }
            AttachBehavior::Reject(reason) => Err(TransportError::Platform(reason)),
            AttachBehavior::Hang => Ok(()),
        }
    }

    fn publish(
        &self,
        attach: SessionId,
        service_name: &str,
        service_info: Bytes,
    ) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if medium.devices[self.index].attach != Some(attach) {
            return Err(TransportError::SessionClosed);
        }
        if !medium.devices[self.index].settings.permissions.discovery_granted() {
            return Err(TransportError::PermissionDenied(
                "location and nearby devices".into(),
            ));
        }
        if medium.devices[self.index].settings.hang_discovery {
            return Ok(());
        }

        let session = medium.session_id();
        let device = &mut medium.devices[self.index];
        device.publish = Some((session, service_name.to_string(), service_info.clone()));
        device.emit(TransportEvent::DiscoveryStarted {
            role: SessionRole::Publish,
            session,
        });
        let handle = device.handle;

        for other in medium.devices.iter().filter(|d| d.handle != handle) {
            if matches!(&other.subscribe, Some((_, name)) if name == service_name) {
                other.emit(TransportEvent::ServiceDiscovered {
                    peer: handle,
                    service_info: Some(service_info.clone()),
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self, attach: SessionId, service_name: &str) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if medium.devices[self.index].attach != Some(attach) {
            return Err(TransportError::SessionClosed);
        }
        if !medium.devices[self.index].settings.permissions.discovery_granted() {
            return Err(TransportError::PermissionDenied(
                "location and nearby devices".into(),
            ));
        }
        if medium.devices[self.index].settings.hang_discovery {
            return Ok(());
        }

        let session = medium.session_id();
        let device = &mut medium.devices[self.index];
        device.subscribe = Some((session, service_name.to_string()));
        device.emit(TransportEvent::DiscoveryStarted {
            role: SessionRole::Subscribe,
            session,
        });

        let me = &medium.devices[self.index];
        for other in medium.devices.iter().filter(|d| d.handle != me.handle) {
            if let Some((_, name, info)) = &other.publish {
                if name == service_name {
                    me.emit(TransportEvent::ServiceDiscovered {
                        peer: other.handle,
                        service_info: Some(info.clone()),
                    });
                }
            }
        }
        Ok(())
    }

    fn send_message(
        &self,
        session: SessionId,
        peer: PeerHandle,
        message_type: u8,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        let sender = &mut medium.devices[self.index];
        if sender.settings.fail_sends {
            return Err(TransportError::Platform("loopback send failure".into()));
        }
        if sender.role_of(session).is_none() {
            return Err(TransportError::SessionClosed);
        }
        sender.sent.push(SentPayload {
            session,
            to: peer,
            message_type,
            payload: payload.clone(),
        });
        let from = sender.handle;

        let Some(target) = medium.devices.iter().find(|d| d.handle == peer) else {
            return Err(TransportError::UnknownPeer(peer));
        };
        match target.listening_role() {
            Some(role) => target.emit(TransportEvent::MessageReceived {
                role,
                peer: from,
                payload,
            }),
            None => debug!(to = %peer, "Peer has no open session, payload lost"),
        }
        Ok(())
    }

    fn close(&self, session: SessionId) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        let device = &mut medium.devices[self.index];
        device.closed.push(session);
        if device.settings.fail_close {
            return Err(TransportError::Platform("loopback close failure".into()));
        }

        if device.attach == Some(session) {
            device.attach = None;
            device.publish = None;
            device.subscribe = None;
        } else if matches!(&device.publish, Some((id, ..)) if *id == session) {
            device.publish = None;
        } else if matches!(&device.subscribe, Some((id, _)) if *id == session) {
            device.subscribe = None;
        }
        Ok(())
    }

    fn start_ranging(&self, peer: PeerHandle) -> Result<(), TransportError> {
        let medium = lock(&self.medium);
        let device = &medium.devices[self.index];
        if !device.settings.capabilities.ranging_supported {
            return Err(TransportError::Unavailable);
        }
        if !device.settings.permissions.ranging_granted() {
            return Err(TransportError::PermissionDenied("wifi state".into()));
        }
        let Some(target) = medium.devices.iter().find(|d| d.handle == peer) else {
            return Err(TransportError::UnknownPeer(peer));
        };
        let outcome = match target.settings.distance_mm {
            Some(distance_mm) => RangingOutcome::Success { distance_mm },
            None => RangingOutcome::NoResult,
        };
        device.emit(TransportEvent::RangingCompleted { peer, outcome });
        Ok(())
    }
}
