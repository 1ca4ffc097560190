//! Appointment access decisions.
//!
//! The single authorisation boundary for the messaging subsystem. Every
//! entry point that admits a session to a room or accepts a message must
//! route through this guard rather than re-deriving the rule, so join and
//! send can never diverge.

use std::sync::Arc;

use crate::appointment::{Appointment, AppointmentService};
use crate::identity::Identity;
use crate::ids::AppointmentId;

/// Pure decision function over appointment membership. No side effects.
#[derive(Clone)]
pub struct AccessGuard {
    appointments: Arc<AppointmentService>,
}

impl AccessGuard {
    pub fn new(appointments: Arc<AppointmentService>) -> Self {
        Self { appointments }
    }

    /// True iff `identity` is a party (patient or doctor) to `appointment`.
    pub fn can_access(&self, identity: &Identity, appointment: &Appointment) -> bool {
        identity.id == appointment.patient_id || identity.id == appointment.doctor_id
    }

    /// True iff `identity` may join the chat room for `appointment_id`.
    ///
    /// Fails closed: an appointment that does not exist (or cannot be read)
    /// admits nobody, so a caller cannot distinguish "missing" from "not
    /// yours".
    pub fn can_join_room(&self, identity: &Identity, appointment_id: &AppointmentId) -> bool {
        match self.appointments.load(appointment_id) {
            Ok(appointment) => self.can_access(identity, &appointment),
            Err(_) => false,
        }
    }

    /// True iff `identity` may send a message to the room for `appointment_id`.
    ///
    /// The same predicate as [`can_join_room`], reused rather than duplicated.
    ///
    /// [`can_join_room`]: AccessGuard::can_join_room
    pub fn can_send(&self, identity: &Identity, appointment_id: &AppointmentId) -> bool {
        self.can_join_room(identity, appointment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::identity::{IdentityId, InMemoryDirectory};
    use consult_types::{NonEmptyText, Role};
    use tempfile::TempDir;

    fn identity(id: &str, role: Role, name: &str) -> Identity {
        Identity {
            id: IdentityId::from(id),
            role,
            display_name: NonEmptyText::new(name).unwrap(),
        }
    }

    fn guard_with_appointment() -> (TempDir, AccessGuard, AppointmentId) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let directory = InMemoryDirectory::new();
        directory.insert(identity("p-1", Role::Patient, "Aisha Khan"));
        directory.insert(identity("d-1", Role::Doctor, "Dr Patel"));

        let cfg = Arc::new(CoreConfig::new(temp_dir.path().to_path_buf()));
        let appointments = Arc::new(AppointmentService::new(cfg, Arc::new(directory)));
        let appointment = appointments
            .book(
                IdentityId::from("p-1"),
                IdentityId::from("d-1"),
                "2026-03-14 10:00".into(),
                String::new(),
            )
            .expect("book should succeed");

        (temp_dir, AccessGuard::new(appointments), appointment.id)
    }

    #[test]
    fn test_parties_may_join() {
        let (_tmp, guard, appointment_id) = guard_with_appointment();

        assert!(guard.can_join_room(&identity("p-1", Role::Patient, "Aisha Khan"), &appointment_id));
        assert!(guard.can_join_room(&identity("d-1", Role::Doctor, "Dr Patel"), &appointment_id));
    }

    #[test]
    fn test_stranger_may_not_join() {
        let (_tmp, guard, appointment_id) = guard_with_appointment();

        let stranger = identity("d-9", Role::Doctor, "Dr Nobody");
        assert!(!guard.can_join_room(&stranger, &appointment_id));
    }

    #[test]
    fn test_missing_appointment_fails_closed() {
        let (_tmp, guard, _appointment_id) = guard_with_appointment();

        let patient = identity("p-1", Role::Patient, "Aisha Khan");
        assert!(!guard.can_join_room(&patient, &AppointmentId::new()));
    }

    #[test]
    fn test_send_rule_matches_join_rule() {
        let (_tmp, guard, appointment_id) = guard_with_appointment();

        let patient = identity("p-1", Role::Patient, "Aisha Khan");
        let stranger = identity("p-9", Role::Patient, "Someone Else");
        let missing = AppointmentId::new();

        assert_eq!(
            guard.can_join_room(&patient, &appointment_id),
            guard.can_send(&patient, &appointment_id)
        );
        assert_eq!(
            guard.can_join_room(&stranger, &appointment_id),
            guard.can_send(&stranger, &appointment_id)
        );
        assert_eq!(
            guard.can_join_room(&patient, &missing),
            guard.can_send(&patient, &missing)
        );
    }
}
