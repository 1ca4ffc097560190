//! Live session handles.
//!
//! A session is one live, authenticated connection, distinct from the
//! identity holding it: the same person may keep several tabs open, each with
//! its own session. The handle pairs the bound identity with the session's
//! outbox; the transport layer drains the matching receiver into the socket.

use std::fmt;
use std::sync::Arc;

use consult_core::Identity;
use tokio::sync::mpsc;

use crate::events::ServerEvent;

/// Process-unique session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The session's outbox receiver has been dropped (connection closed).
#[derive(Debug, thiserror::Error)]
#[error("session outbox is closed")]
pub struct SessionClosed;

/// Handle to one connected session: its identity binding plus outbox.
///
/// Cheap to clone; all clones feed the same outbox.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    identity: Arc<Identity>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        identity: Identity,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            identity: Arc::new(identity),
            outbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues an event for delivery to this session.
    ///
    /// Never blocks: the outbox is unbounded, so one slow consumer cannot
    /// stall a room. Fails only once the receiving side has gone away.
    pub fn send(&self, event: ServerEvent) -> Result<(), SessionClosed> {
        self.outbox.send(event).map_err(|_| SessionClosed)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_core::{IdentityId, NonEmptyText, Role};

    fn test_identity() -> Identity {
        Identity {
            id: IdentityId::from("p-1"),
            role: Role::Patient,
            display_name: NonEmptyText::new("Aisha Khan").unwrap(),
        }
    }

    #[test]
    fn test_send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionHandle::new(SessionId(1), test_identity(), tx);

        session
            .send(ServerEvent::status("hello"))
            .expect("send should succeed");

        let received = rx.try_recv().expect("event should be queued");
        assert_eq!(received, ServerEvent::status("hello"));
    }

    #[test]
    fn test_send_fails_once_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionHandle::new(SessionId(2), test_identity(), tx);
        drop(rx);

        let result = session.send(ServerEvent::status("hello"));
        assert!(result.is_err());
    }
}
