use bytes::Bytes;
use tracing::{debug, error};

use circle_shared::types::PeerHandle;

use crate::transport::{AwareTransport, SessionId, TransportError};

/// Send one payload to `peer` over every open discovery session.
///
/// Either role may be the one the peer listens on, so all sessions are
/// attempted even when an earlier one fails. The first failure is returned.
pub fn transmit(
    transport: &dyn AwareTransport,
    sessions: &[SessionId],
    peer: PeerHandle,
    message_type: u8,
    payload: Bytes,
) -> Result<(), TransportError> {
    if sessions.is_empty() {
        return Err(TransportError::SessionClosed);
    }

    let mut first_error = None;
    for session in sessions {
        match transport.send_message(*session, peer, message_type, payload.clone()) {
            Ok(()) => {
                debug!(
                    session = %session,
                    peer = %peer,
                    len = payload.len(),
                    "Payload handed to transport"
                );
            }
            Err(e) => {
                error!(session = %session, peer = %peer, error = %e, "Send failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::transport::{Capabilities, Permissions};

    /// Fails sends on one session id, records the rest.
    struct Flaky {
        failing: SessionId,
        sent: Mutex<Vec<SessionId>>,
    }

    impl AwareTransport for Flaky {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                discovery_available: true,
                ranging_supported: false,
            }
        }
        fn permissions(&self) -> Permissions {
            Permissions::all()
        }
        fn attach(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn publish(&self, _: SessionId, _: &str, _: Bytes) -> Result<(), TransportError> {
            Ok(())
        }
        fn subscribe(&self, _: SessionId, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_message(
            &self,
            session: SessionId,
            _: PeerHandle,
            _: u8,
            _: Bytes,
        ) -> Result<(), TransportError> {
            if session == self.failing {
                return Err(TransportError::Platform("radio busy".into()));
            }
            self.sent.lock().unwrap().push(session);
            Ok(())
        }
        fn close(&self, _: SessionId) -> Result<(), TransportError> {
            Ok(())
        }
        fn start_ranging(&self, _: PeerHandle) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_all_sessions_attempted() {
        let transport = Flaky {
            failing: SessionId(1),
            sent: Mutex::new(Vec::new()),
        };
        let result = transmit(
            &transport,
            &[SessionId(1), SessionId(2)],
            PeerHandle(9),
            1,
            Bytes::from_static(b"{}"),
        );
        assert_eq!(result, Err(TransportError::Platform("radio busy".into())));
        assert_eq!(*transport.sent.lock().unwrap(), vec![SessionId(2)]);
    }

    #[test]
    fn test_no_sessions_is_an_error() {
        let transport = Flaky {
            failing: SessionId(1),
            sent: Mutex::new(Vec::new()),
        };
        let result = transmit(&transport, &[], PeerHandle(9), 1, Bytes::new());
        assert_eq!(result, Err(TransportError::SessionClosed));
    }
}
