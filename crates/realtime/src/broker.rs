//! Room membership and fan-out.
//!
//! The broker maps each appointment to the live set of sessions currently
//! subscribed to its chat, and mediates all join/leave/broadcast traffic. It
//! is an explicit instance owned by the service process; there is no ambient
//! global room table, all access goes through its public operations.
//!
//! ## Ordering
//!
//! All operations on one room serialise through that room's own
//! `tokio::sync::Mutex`, so `send_message` can hold authorise, persist and
//! broadcast as a single critical section: two concurrent sends on the same
//! room can never broadcast out of persistence order. Unrelated rooms never
//! contend.
//!
//! ## Room lifecycle
//!
//! A room is created on first join and retired as soon as its last member
//! leaves. Retirement happens under both the registry lock and the room lock,
//! and joiners re-check the `retired` flag after acquiring the room lock, so
//! a join racing the last leave can never land in an orphaned room.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use consult_core::{
    AccessGuard, AppointmentId, ChatMessage, Identity, MessageStore, PortalError, PortalResult,
};
use tokio::sync::{mpsc, Mutex};

use crate::events::ServerEvent;
use crate::session::{SessionHandle, SessionId};

/// Membership state for one live room.
#[derive(Default)]
struct RoomMembers {
    sessions: HashMap<SessionId, SessionHandle>,
    /// Set when the room is removed from the registry; joiners must retry.
    retired: bool,
}

struct Room {
    members: Mutex<RoomMembers>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: Mutex::new(RoomMembers::default()),
        }
    }
}

/// In-memory registry of appointment chat rooms.
///
/// Owns no message data: every outgoing message is committed to the
/// [`MessageStore`] before any fan-out, and the broker only ever relays what
/// the store returned.
pub struct RoomBroker {
    guard: AccessGuard,
    store: Arc<MessageStore>,
    rooms: StdMutex<HashMap<AppointmentId, Arc<Room>>>,
    /// Which rooms each session has joined, for an exact disconnect sweep.
    memberships: StdMutex<HashMap<SessionId, HashSet<AppointmentId>>>,
    next_session_id: AtomicU64,
}

impl RoomBroker {
    pub fn new(guard: AccessGuard, store: Arc<MessageStore>) -> Self {
        Self {
            guard,
            store,
            rooms: StdMutex::new(HashMap::new()),
            memberships: StdMutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Binds an identity to a fresh session and returns its handle together
    /// with the outbox receiver the transport layer must drain.
    pub fn open_session(
        &self,
        identity: Identity,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(id, identity, tx), rx)
    }

    /// Admits a session into an appointment's room.
    ///
    /// Idempotent: joining a room the session is already in is a no-op and
    /// emits no second notice. On a first join the membership is registered
    /// before the join notice goes out, so a broadcast racing the join cannot
    /// miss the newcomer.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Forbidden`] if the session's identity is not a
    /// party to the appointment, or the appointment does not exist; the
    /// guard fails closed and the two cases are indistinguishable.
    pub async fn join(
        &self,
        appointment_id: &AppointmentId,
        session: &SessionHandle,
    ) -> PortalResult<()> {
        if !self.guard.can_join_room(session.identity(), appointment_id) {
            return Err(PortalError::Forbidden);
        }

        loop {
            let room = self.room_or_create(appointment_id);
            let mut members = room.members.lock().await;
            if members.retired {
                // Lost the race against the last leave; the registry entry is
                // gone, take a fresh one.
                continue;
            }

            if members.sessions.contains_key(&session.id()) {
                return Ok(());
            }
            members.sessions.insert(session.id(), session.clone());
            self.record_membership(session.id(), appointment_id);

            tracing::debug!(appointment_id = %appointment_id, session = %session.id(), "session joined room");
            let notice = ServerEvent::status(format!(
                "{} has joined the chat.",
                session.identity().display_name
            ));
            self.fan_out(appointment_id, &mut members, &notice);
            return Ok(());
        }
    }

    /// Removes a session from an appointment's room.
    ///
    /// Idempotent: leaving a room the session is not in is a no-op. The
    /// remaining members receive a leave notice; a room left empty is retired
    /// immediately.
    pub async fn leave(&self, appointment_id: &AppointmentId, session_id: SessionId) {
        let Some(room) = self.room(appointment_id) else {
            return;
        };

        let mut members = room.members.lock().await;
        let Some(departed) = members.sessions.remove(&session_id) else {
            return;
        };
        self.forget_membership(session_id, appointment_id);

        tracing::debug!(appointment_id = %appointment_id, session = %session_id, "session left room");
        let notice = ServerEvent::status(format!(
            "{} has left the chat.",
            departed.identity().display_name
        ));
        self.fan_out(appointment_id, &mut members, &notice);

        if members.sessions.is_empty() {
            members.retired = true;
            let mut rooms = self
                .rooms
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if rooms
                .get(appointment_id)
                .is_some_and(|current| Arc::ptr_eq(current, &room))
            {
                rooms.remove(appointment_id);
            }
        }
    }

    /// Delivers an event to every session currently in the room.
    ///
    /// Best effort: sessions whose connection has gone away are pruned rather
    /// than failing the call, and delivery to one session never blocks the
    /// others. A room with no members is a no-op.
    pub async fn broadcast(&self, appointment_id: &AppointmentId, event: ServerEvent) {
        let Some(room) = self.room(appointment_id) else {
            return;
        };
        let mut members = room.members.lock().await;
        if !members.retired {
            self.fan_out(appointment_id, &mut members, &event);
        }
    }

    /// Validates, persists and fans out one chat message.
    ///
    /// The three steps are strictly ordered (authorise, then append to the
    /// store, then broadcast the stored record) and run inside the room's
    /// critical section. If the append fails nothing is broadcast and the
    /// error is returned to the caller; other rooms and sessions are
    /// unaffected.
    ///
    /// # Errors
    ///
    /// - [`PortalError::Forbidden`] if the sender may not send to this room
    /// - [`PortalError::Text`] for empty or oversized message text
    /// - a storage error if the append could not be committed
    pub async fn send_message(
        &self,
        appointment_id: &AppointmentId,
        sender: &Identity,
        text: &str,
    ) -> PortalResult<ChatMessage> {
        if !self.guard.can_send(sender, appointment_id) {
            return Err(PortalError::Forbidden);
        }

        match self.room(appointment_id) {
            Some(room) => {
                let mut members = room.members.lock().await;
                let stored = self.store.append(appointment_id, &sender.id, text)?;
                let event = ServerEvent::receive_message(&stored, sender.display_name.as_str());
                if !members.retired {
                    self.fan_out(appointment_id, &mut members, &event);
                }
                Ok(stored)
            }
            // Nobody is listening; the store is still the source of truth and
            // later history reads will include the message.
            None => self.store.append(appointment_id, &sender.id, text),
        }
    }

    /// Removes a session from every room it joined.
    ///
    /// Called on abrupt disconnect as well as orderly shutdown; both are
    /// treated identically and leave no membership entries behind.
    pub async fn disconnect(&self, session_id: SessionId) {
        let joined: Vec<AppointmentId> = {
            let mut memberships = self
                .memberships
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            memberships
                .remove(&session_id)
                .map(|rooms| rooms.into_iter().collect())
                .unwrap_or_default()
        };

        for appointment_id in joined {
            self.leave(&appointment_id, session_id).await;
        }
    }

    fn room(&self, appointment_id: &AppointmentId) -> Option<Arc<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(appointment_id)
            .cloned()
    }

    fn room_or_create(&self, appointment_id: &AppointmentId) -> Arc<Room> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(appointment_id.clone())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone()
    }

    fn record_membership(&self, session_id: SessionId, appointment_id: &AppointmentId) {
        let mut memberships = self
            .memberships
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memberships
            .entry(session_id)
            .or_default()
            .insert(appointment_id.clone());
    }

    fn forget_membership(&self, session_id: SessionId, appointment_id: &AppointmentId) {
        let mut memberships = self
            .memberships
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(rooms) = memberships.get_mut(&session_id) {
            rooms.remove(appointment_id);
            if rooms.is_empty() {
                memberships.remove(&session_id);
            }
        }
    }

    /// Delivers `event` to every member, pruning sessions whose outbox has
    /// closed. Must be called with the room's member lock held.
    fn fan_out(
        &self,
        appointment_id: &AppointmentId,
        members: &mut RoomMembers,
        event: &ServerEvent,
    ) {
        let mut dead = Vec::new();
        for (session_id, handle) in &members.sessions {
            if handle.send(event.clone()).is_err() {
                dead.push(*session_id);
            }
        }

        for session_id in dead {
            tracing::debug!(
                appointment_id = %appointment_id,
                session = %session_id,
                "pruning session with closed outbox"
            );
            members.sessions.remove(&session_id);
            self.forget_membership(session_id, appointment_id);
        }
    }
}
