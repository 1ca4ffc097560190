//! Wire events for the realtime consultation channel.
//!
//! Every inbound frame is decoded into a tagged [`ClientEvent`] variant with
//! validated fields; unrecognised or malformed payloads are rejected at the
//! gateway rather than failing deep inside the broker. Outbound traffic is a
//! [`ServerEvent`], serialised the same way: a `{"event": …, "data": …}`
//! envelope with camelCase field names.

use chrono::{DateTime, Utc};
use consult_core::{AppointmentId, ChatMessage, IdentityId};

/// An event sent by a connected client.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Request to join the chat room for an appointment.
    #[serde(rename_all = "camelCase")]
    Join { appointment_id: AppointmentId },
    /// Request to leave the chat room for an appointment.
    #[serde(rename_all = "camelCase")]
    Leave { appointment_id: AppointmentId },
    /// Request to send a chat message to an appointment's room.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        appointment_id: AppointmentId,
        message: String,
    },
}

/// Classification of a rejected client event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    /// The caller is not permitted to act on the target room. Deliberately
    /// covers "no such appointment" as well, so a rejection never reveals
    /// whether the appointment exists.
    Forbidden,
    /// The event payload was malformed or its message text invalid.
    Validation,
    /// The persistence backend failed; the message was not delivered.
    Storage,
}

/// An event sent by the server to one or more sessions.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Join/leave notices, broadcast to a room.
    #[serde(rename_all = "camelCase")]
    Status { text: String },
    /// Fan-out of a persisted chat message.
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        sender_id: IdentityId,
        sender_name: String,
        message: String,
        sequence: u64,
        timestamp: DateTime<Utc>,
    },
    /// Authorisation or validation failure, sent only to the offending session.
    #[serde(rename_all = "camelCase")]
    Error { code: ErrorCode, text: String },
}

impl ServerEvent {
    pub fn status(text: impl Into<String>) -> Self {
        ServerEvent::Status { text: text.into() }
    }

    /// Builds the fan-out event for a message the store has already committed.
    pub fn receive_message(stored: &ChatMessage, sender_name: &str) -> Self {
        ServerEvent::ReceiveMessage {
            sender_id: stored.sender_id.clone(),
            sender_name: sender_name.to_owned(),
            message: stored.message.clone(),
            sequence: stored.sequence,
            timestamp: stored.created_at,
        }
    }

    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            text: text.into(),
        }
    }
}
