//! Protocol dispatch for connected sessions.
//!
//! The gateway is the thin layer between the transport (a WebSocket in the
//! hosting binary) and the room broker: it decodes inbound frames into
//! [`ClientEvent`]s, dispatches them, and translates every rejection into an
//! explicit `error` event on the offending session. A bad frame is answered,
//! never silently dropped.
//!
//! Authorisation failures are reported uniformly: whether the target
//! appointment is missing or simply not the caller's, the session sees the
//! same `forbidden` rejection, so the channel cannot be used to enumerate
//! appointment ids.

use std::sync::Arc;

use consult_core::PortalError;

use crate::broker::RoomBroker;
use crate::events::{ClientEvent, ErrorCode, ServerEvent};
use crate::session::SessionHandle;

/// Uniform rejection text for unauthorised join/send attempts.
const NOT_ALLOWED: &str = "not allowed";

#[derive(Clone)]
pub struct Gateway {
    broker: Arc<RoomBroker>,
}

impl Gateway {
    pub fn new(broker: Arc<RoomBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<RoomBroker> {
        &self.broker
    }

    /// Decodes one raw text frame and dispatches it for `session`.
    pub async fn handle_text(&self, session: &SessionHandle, raw: &str) {
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                tracing::debug!(session = %session.id(), "rejecting malformed frame: {}", e);
                let _ = session.send(ServerEvent::error(
                    ErrorCode::Validation,
                    "malformed or unrecognised event",
                ));
            }
        }
    }

    /// Dispatches one decoded client event for `session`.
    pub async fn dispatch(&self, session: &SessionHandle, event: ClientEvent) {
        match event {
            ClientEvent::Join { appointment_id } => {
                if let Err(e) = self.broker.join(&appointment_id, session).await {
                    self.report(session, e);
                }
            }
            ClientEvent::Leave { appointment_id } => {
                self.broker.leave(&appointment_id, session.id()).await;
            }
            ClientEvent::SendMessage {
                appointment_id,
                message,
            } => {
                if let Err(e) = self
                    .broker
                    .send_message(&appointment_id, session.identity(), &message)
                    .await
                {
                    self.report(session, e);
                }
            }
        }
    }

    /// Removes the session from every room it joined. Must be called exactly
    /// when the transport connection ends, however it ends.
    pub async fn disconnect(&self, session: &SessionHandle) {
        self.broker.disconnect(session.id()).await;
    }

    fn report(&self, session: &SessionHandle, err: PortalError) {
        let event = match &err {
            // Missing and not-yours produce the same rejection on the wire.
            PortalError::Forbidden | PortalError::NotFound => {
                ServerEvent::error(ErrorCode::Forbidden, NOT_ALLOWED)
            }
            PortalError::Text(e) => ServerEvent::error(ErrorCode::Validation, e.to_string()),
            PortalError::InvalidId(e) => ServerEvent::error(ErrorCode::Validation, e.clone()),
            _ if err.is_storage_failure() => {
                tracing::error!(session = %session.id(), "storage failure during send: {}", err);
                ServerEvent::error(ErrorCode::Storage, "message could not be saved")
            }
            other => {
                tracing::warn!(session = %session.id(), "unexpected dispatch failure: {}", other);
                ServerEvent::error(ErrorCode::Validation, other.to_string())
            }
        };
        let _ = session.send(event);
    }
}
