//! Chat message channel: outbound sends and queueing, batch flush, inbound
//! classification, dedup, acknowledgments and history replay.

use bytes::Bytes;
use tracing::{debug, info, warn};

use circle_shared::error::ProtocolError;
use circle_shared::protocol::{
    decode_inbound, encode_batch, encode_chat, InboundChat, InboundFrame, StatusFrame,
};
use circle_shared::types::{
    ChatMessage, MessageId, MessageRecord, MessageStatus, PeerDevice, PeerHandle, PeerStatus,
};

use crate::controller::{Controller, ControllerError, SendOutcome};
use crate::messages::transmit;
use crate::persistence::HistoryScope;
use crate::session::ActiveSession;
use crate::transport::{SessionRole, TransportError};

const QUEUED_NOTICE: &str = "Not connected. Message queued.";

impl Controller {
    fn transmit_to(&self, handle: PeerHandle, payload: Bytes) -> Result<(), TransportError> {
        transmit(
            self.transport.as_ref(),
            &self.lifecycle.discovery_sessions(),
            handle,
            self.config.message_type,
            payload,
        )
    }

    pub(crate) fn send_message(&mut self, text: String) -> Result<SendOutcome, ControllerError> {
        if text.trim().is_empty() {
            return Err(ControllerError::EmptyMessage);
        }

        let Some(handle) = self.session.as_ref().map(|s| s.handle) else {
            let message = ChatMessage::outgoing(text, MessageStatus::Queued);
            let id = message.id.clone();
            info!(msg_id = %id, "Not connected, queueing message");
            self.persist(&message, self.conversation_peer_id());
            self.outbound.push(message.clone());
            self.chat.messages.push(message);
            self.surface(QUEUED_NOTICE);
            return Ok(SendOutcome::Queued(id));
        };

        let message = ChatMessage::outgoing(text, MessageStatus::Sent);
        let payload = encode_chat(&message)?;

        if let Err(e) = self.transmit_to(handle, Bytes::from(payload)) {
            self.surface(format!("Send error: {e}"));
            return Err(e.into());
        }

        debug!(msg_id = %message.id, peer = %handle, "Message sent");
        self.persist(&message, self.conversation_peer_id());
        let id = message.id.clone();
        self.chat.push_unique(message);
        Ok(SendOutcome::Sent(id))
    }

    /// Send the whole outbound queue as one array payload.
    ///
    /// Every flushed message becomes `Sent` and the queue empties even when
    /// the transmit fails.
    pub(crate) fn flush_outbound(&mut self) {
        if self.outbound.is_empty() {
            return;
        }
        let Some(handle) = self.session.as_ref().map(|s| s.handle) else {
            self.surface("No peer handle for batch send.");
            return;
        };

        let batch = std::mem::take(&mut self.outbound);
        info!(count = batch.len(), peer = %handle, "Flushing queued messages");

        let sent = encode_batch(&batch)
            .map_err(|e| e.to_string())
            .and_then(|payload| {
                self.transmit_to(handle, Bytes::from(payload))
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = sent {
            warn!(peer = %handle, error = %e, "Batch send failed");
            self.surface(format!("Batch send error: {e}"));
        }

        let peer_id = self.conversation_peer_id();
        for mut queued in batch {
            queued.status = MessageStatus::Sent;
            if let Some(shown) = self.chat.messages.iter_mut().find(|m| m.id == queued.id) {
                if shown.status == MessageStatus::Queued {
                    shown.status = MessageStatus::Sent;
                }
            }
            self.persist(&queued, peer_id.clone());
        }
    }

    pub(crate) fn on_message_received(&mut self, role: SessionRole, handle: PeerHandle, payload: &[u8]) {
        if !self.lifecycle.is_active(role) {
            debug!(role = role.label(), peer = %handle, "Message on a closed session, ignoring");
            return;
        }

        if self.session.is_none() {
            let peer = self.registry.find_by_handle(handle).cloned();
            if let Some(peer) = &peer {
                self.registry.set_status(&peer.unique_id, PeerStatus::Connected);
            }
            info!(peer = %handle, known = peer.is_some(), "First contact, adopting sender as current peer");
            self.session = Some(ActiveSession { handle, peer });
            self.chat.is_connected = true;
            self.chat.error = None;
            self.flush_outbound();
        }

        match decode_inbound(payload) {
            Ok(InboundFrame::Status(frame)) => self.apply_status(frame),
            Ok(InboundFrame::Single(chat)) => self.ingest(handle, chat),
            Ok(InboundFrame::Batch(items)) => {
                for item in items {
                    match item {
                        Ok(chat) => self.ingest(handle, chat),
                        Err(e) => {
                            warn!(peer = %handle, error = %e, "Bad element in batch");
                            self.surface(e.to_string());
                        }
                    }
                }
            }
            Err(ProtocolError::StatusFrame(reason)) => {
                debug!(peer = %handle, reason = %reason, "Ignoring unrecognised status frame");
            }
            Err(e) => {
                warn!(peer = %handle, error = %e, "Undecodable message");
                self.surface(e.to_string());
            }
        }
    }

    fn ingest(&mut self, handle: PeerHandle, chat: InboundChat) {
        let message = chat.into_message();
        if message.is_blank() {
            debug!(msg_id = %message.id, "Dropping blank message");
            return;
        }
        if self.chat.contains(&message.id) {
            debug!(msg_id = %message.id, "Duplicate message ignored");
            return;
        }

        let peer_id = self
            .registry
            .find_by_handle(handle)
            .map(|p| p.unique_id.clone())
            .unwrap_or_else(|| self.conversation_peer_id());
        debug!(msg_id = %message.id, peer = %peer_id, "Message received");

        self.persist(&message, peer_id);
        let ack = StatusFrame::new(message.id.clone(), MessageStatus::Delivered);
        self.chat.messages.push(message);
        self.send_status(handle, &ack);
    }

    fn send_status(&self, handle: PeerHandle, frame: &StatusFrame) {
        if let Err(e) = self.transmit_to(handle, Bytes::from(frame.encode())) {
            debug!(msg_id = %frame.message_id, status = %frame.status, error = %e, "Status frame not sent");
        }
    }

    /// Apply a peer's delivery/read report to one of our own messages.
    fn apply_status(&mut self, frame: StatusFrame) {
        let Some(message) = self
            .chat
            .messages
            .iter_mut()
            .find(|m| m.id == frame.message_id && m.is_from_me)
        else {
            debug!(msg_id = %frame.message_id, "Status for unknown message");
            return;
        };

        message.status = frame.status;
        let updated = message.clone();
        debug!(msg_id = %updated.id, status = %updated.status, "Peer reported status");
        self.persist(&updated, self.conversation_peer_id());
    }

    pub(crate) fn mark_message_read(&mut self, id: &MessageId) {
        let Some(handle) = self.session.as_ref().map(|s| s.handle) else {
            debug!(msg_id = %id, "No peer session, read receipt dropped");
            return;
        };

        self.send_status(handle, &StatusFrame::new(id.clone(), MessageStatus::Read));

        if let Some(message) = self
            .chat
            .messages
            .iter_mut()
            .find(|m| &m.id == id && !m.is_from_me)
        {
            message.status = MessageStatus::Read;
            let updated = message.clone();
            self.persist(&updated, self.conversation_peer_id());
        }
    }

    // -- history --------------------------------------------------------------

    pub(crate) fn open_conversation(&mut self, peer: PeerDevice) {
        let peer_id = peer.unique_id.clone();
        info!(peer = %peer_id, "Opening conversation");
        self.conversation = Some(peer_id.clone());
        self.connect_to_peer(peer);
        self.request_history(peer_id.clone(), HistoryScope::All);
        self.request_history(peer_id, HistoryScope::QueuedOnly);
    }

    pub(crate) fn on_history_loaded(
        &mut self,
        peer_id: String,
        scope: HistoryScope,
        records: Vec<MessageRecord>,
    ) {
        if matches!(&self.conversation, Some(open) if *open != peer_id) {
            debug!(peer = %peer_id, "History for a conversation no longer open");
            return;
        }

        let mut messages: Vec<ChatMessage> = records
            .into_iter()
            .map(MessageRecord::into_message)
            .collect();
        messages.sort_by_key(|m| m.timestamp);

        // Only messages new to the chat are re-queued; anything already shown
        // is either still in the outbound queue or has been flushed.
        let mut added = 0usize;
        for message in messages {
            let requeue = message.is_from_me && message.status == MessageStatus::Queued;
            if !self.chat.push_unique(message.clone()) {
                continue;
            }
            added += 1;
            if requeue && !self.outbound.iter().any(|m| m.id == message.id) {
                self.outbound.push(message);
            }
        }
        debug!(peer = %peer_id, ?scope, added, queued = self.outbound.len(), "History replayed");

        if self.session.is_some() {
            self.flush_outbound();
        }
    }

    pub(crate) fn delete_conversation(&mut self, peer_id: String) {
        info!(peer = %peer_id, "Deleting conversation");
        self.persistence.delete_by_peer(peer_id.clone());
        if self.conversation.as_deref() == Some(peer_id.as_str()) {
            self.chat.messages.clear();
        }
    }
}
