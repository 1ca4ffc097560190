//! Appointment lifecycle management.
//!
//! This module owns the appointment entity and its status transitions. An
//! appointment is created in `Scheduled` state when a patient books a
//! consultation; the assigned doctor moves it to `Completed` exactly once by
//! recording a prescription. No transition is reversible and appointments are
//! never deleted.
//!
//! ## Storage Layout
//!
//! Appointments are stored as JSON in a sharded structure:
//!
//! ```text
//! appointments/
//!   <s1>/
//!     <s2>/
//!       <id>/
//!         appointment.json       # current record, rewritten on transition
//!         prescriptions.jsonl    # append-only prescription log
//!         chat.jsonl             # append-only chat log (see messages.rs)
//! ```
//!
//! where `s1` and `s2` are the first four hex characters of the appointment
//! id.
//!
//! ## Pure Data Operations
//!
//! No API concerns here: authentication, HTTP servers and realtime transport
//! belong to the hosting binary and the realtime crate.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use consult_types::Role;

use crate::config::CoreConfig;
use crate::error::{PortalError, PortalResult};
use crate::identity::{IdentityDirectory, IdentityId};
use crate::ids::{AppointmentId, RoomToken};

/// Name of the appointment record file inside an appointment directory.
pub const APPOINTMENT_FILE_NAME: &str = "appointment.json";

/// Name of the append-only prescription log inside an appointment directory.
pub const PRESCRIPTIONS_FILE_NAME: &str = "prescriptions.jsonl";

/// Lifecycle status of an appointment.
///
/// `Scheduled` is the initial state; `Completed` and `Cancelled` are terminal.
/// The only transition this core performs is `Scheduled -> Completed`;
/// `Cancelled` is reserved for a future cancellation collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// True if a `Scheduled -> Completed` transition is permitted from this state.
    pub fn can_complete(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled)
    }
}

/// A booked consultation between one patient and one doctor.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_id: IdentityId,
    pub doctor_id: IdentityId,
    /// Caller-supplied scheduling string, stored as given.
    pub scheduled_at: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: String,
    pub room_token: RoomToken,
    pub created_at: DateTime<Utc>,
}

/// A prescription recorded by the assigned doctor when completing an appointment.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Prescription {
    pub doctor_id: IdentityId,
    pub patient_id: IdentityId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Service owning appointment records and their lifecycle.
///
/// Cheap to clone; all clones share the per-appointment transition locks so
/// that concurrent `complete` calls on the same appointment serialise.
#[derive(Clone)]
pub struct AppointmentService {
    cfg: Arc<CoreConfig>,
    directory: Arc<dyn IdentityDirectory>,
    transition_locks: Arc<Mutex<HashMap<AppointmentId, Arc<Mutex<()>>>>>,
}

impl AppointmentService {
    pub fn new(cfg: Arc<CoreConfig>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            cfg,
            directory,
            transition_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Books a new appointment for `patient_id` with `doctor_id`.
    ///
    /// Both references must resolve in the identity directory to the matching
    /// role. On success the appointment is persisted in `Scheduled` state with
    /// a freshly generated opaque room token.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidReference`] if either id does not resolve
    /// to an identity of the required role, or a storage error if the record
    /// cannot be written.
    pub fn book(
        &self,
        patient_id: IdentityId,
        doctor_id: IdentityId,
        scheduled_at: String,
        notes: String,
    ) -> PortalResult<Appointment> {
        self.require_role(&patient_id, Role::Patient)?;
        self.require_role(&doctor_id, Role::Doctor)?;

        let appointment = Appointment {
            id: AppointmentId::new(),
            patient_id,
            doctor_id,
            scheduled_at,
            status: AppointmentStatus::Scheduled,
            notes,
            room_token: RoomToken::generate(),
            created_at: Utc::now(),
        };

        let appointment_dir = self.appointment_dir(&appointment.id);
        fs::create_dir_all(&appointment_dir).map_err(PortalError::StorageDirCreation)?;
        self.write_record(&appointment)?;

        tracing::info!(appointment_id = %appointment.id, "appointment booked");
        Ok(appointment)
    }

    /// Completes an appointment by recording a prescription.
    ///
    /// Only the assigned doctor may complete, and only while the appointment
    /// is `Scheduled`. The prescription is persisted before the status
    /// transition; a second `complete` on an already-completed appointment
    /// fails with [`PortalError::InvalidState`] and leaves the record
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`PortalError::NotFound`] if the appointment does not exist
    /// - [`PortalError::Forbidden`] if `acting_doctor_id` is not the
    ///   appointment's doctor
    /// - [`PortalError::InvalidState`] if the appointment is not `Scheduled`
    pub fn complete(
        &self,
        appointment_id: &AppointmentId,
        acting_doctor_id: &IdentityId,
        prescription_text: String,
    ) -> PortalResult<()> {
        let lock = self.transition_lock(appointment_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut appointment = self.load(appointment_id)?;

        if appointment.doctor_id != *acting_doctor_id {
            return Err(PortalError::Forbidden);
        }
        if !appointment.status.can_complete() {
            return Err(PortalError::InvalidState);
        }

        let prescription = Prescription {
            doctor_id: appointment.doctor_id.clone(),
            patient_id: appointment.patient_id.clone(),
            text: prescription_text,
            created_at: Utc::now(),
        };
        self.append_prescription(appointment_id, &prescription)?;

        appointment.status = AppointmentStatus::Completed;
        self.write_record(&appointment)?;

        tracing::info!(appointment_id = %appointment_id, "appointment completed");
        Ok(())
    }

    /// Loads an appointment record.
    ///
    /// This is the read path used by the access guard and the REST surface.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::NotFound`] if no record exists for `id`.
    pub fn load(&self, id: &AppointmentId) -> PortalResult<Appointment> {
        let path = self.appointment_file(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortalError::NotFound)
            }
            Err(e) => return Err(PortalError::FileRead(e)),
        };
        serde_json::from_str(&contents).map_err(PortalError::Deserialization)
    }

    /// Lists the prescriptions recorded for an appointment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::NotFound`] if the appointment does not exist.
    pub fn prescriptions(&self, id: &AppointmentId) -> PortalResult<Vec<Prescription>> {
        // Existence check keeps the contract aligned with `load`.
        self.load(id)?;

        let path = self.appointment_dir(id).join(PRESCRIPTIONS_FILE_NAME);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortalError::FileRead(e)),
        };

        let mut prescriptions = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Prescription>(line) {
                Ok(prescription) => prescriptions.push(prescription),
                Err(e) => {
                    tracing::warn!(appointment_id = %id, "skipping unparseable prescription line: {}", e);
                }
            }
        }
        Ok(prescriptions)
    }

    /// Lists all appointments where `patient_id` is the patient, newest first.
    pub fn list_for_patient(&self, patient_id: &IdentityId) -> Vec<Appointment> {
        self.scan(|appointment| appointment.patient_id == *patient_id)
    }

    /// Lists all appointments where `doctor_id` is the doctor, newest first.
    pub fn list_for_doctor(&self, doctor_id: &IdentityId) -> Vec<Appointment> {
        self.scan(|appointment| appointment.doctor_id == *doctor_id)
    }

    /// Directory holding all files for one appointment.
    pub fn appointment_dir(&self, id: &AppointmentId) -> PathBuf {
        id.sharded_dir(&self.cfg.appointments_dir())
    }

    fn appointment_file(&self, id: &AppointmentId) -> PathBuf {
        self.appointment_dir(id).join(APPOINTMENT_FILE_NAME)
    }

    fn require_role(&self, id: &IdentityId, role: Role) -> PortalResult<()> {
        match self.directory.lookup(id) {
            Some(identity) if identity.role == role => Ok(()),
            _ => Err(PortalError::InvalidReference {
                role,
                id: id.clone(),
            }),
        }
    }

    fn transition_lock(&self, id: &AppointmentId) -> Arc<Mutex<()>> {
        let mut locks = self
            .transition_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    /// Rewrites the appointment record via a temp file and rename, so a
    /// half-written record can never replace a valid one.
    fn write_record(&self, appointment: &Appointment) -> PortalResult<()> {
        let json =
            serde_json::to_string_pretty(appointment).map_err(PortalError::Serialization)?;
        let path = self.appointment_file(&appointment.id);
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, json).map_err(PortalError::FileWrite)?;
        fs::rename(&tmp_path, &path).map_err(PortalError::FileWrite)?;
        Ok(())
    }

    fn append_prescription(
        &self,
        id: &AppointmentId,
        prescription: &Prescription,
    ) -> PortalResult<()> {
        use std::io::Write;

        let mut line =
            serde_json::to_string(prescription).map_err(PortalError::Serialization)?;
        line.push('\n');

        let path = self.appointment_dir(id).join(PRESCRIPTIONS_FILE_NAME);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(PortalError::FileWrite)?;
        file.write_all(line.as_bytes())
            .map_err(PortalError::FileWrite)?;
        Ok(())
    }

    /// Walks the sharded appointment tree and collects matching records,
    /// newest first. Unparseable records are logged and skipped.
    fn scan(&self, matches: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        let mut appointments = Vec::new();

        let appointments_dir = self.cfg.appointments_dir();
        let s1_iter = match fs::read_dir(&appointments_dir) {
            Ok(it) => it,
            Err(_) => return appointments,
        };
        for s1 in s1_iter.flatten() {
            let s1_path = s1.path();
            if !s1_path.is_dir() {
                continue;
            }

            let s2_iter = match fs::read_dir(&s1_path) {
                Ok(it) => it,
                Err(_) => continue,
            };

            for s2 in s2_iter.flatten() {
                let s2_path = s2.path();
                if !s2_path.is_dir() {
                    continue;
                }

                let id_iter = match fs::read_dir(&s2_path) {
                    Ok(it) => it,
                    Err(_) => continue,
                };

                for id_ent in id_iter.flatten() {
                    let record_path = id_ent.path().join(APPOINTMENT_FILE_NAME);
                    if !record_path.is_file() {
                        continue;
                    }

                    if let Ok(contents) = fs::read_to_string(&record_path) {
                        match serde_json::from_str::<Appointment>(&contents) {
                            Ok(appointment) if matches(&appointment) => {
                                appointments.push(appointment);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(
                                    "failed to parse appointment record: {} - {}",
                                    record_path.display(),
                                    e
                                );
                            }
                        }
                    }
                }
            }
        }

        appointments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        appointments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, InMemoryDirectory};
    use consult_types::NonEmptyText;
    use std::path::Path;
    use tempfile::TempDir;

    fn seeded_directory() -> Arc<InMemoryDirectory> {
        let directory = InMemoryDirectory::new();
        directory.insert(Identity {
            id: IdentityId::from("p-1"),
            role: Role::Patient,
            display_name: NonEmptyText::new("Aisha Khan").unwrap(),
        });
        directory.insert(Identity {
            id: IdentityId::from("d-1"),
            role: Role::Doctor,
            display_name: NonEmptyText::new("Dr Patel").unwrap(),
        });
        directory.insert(Identity {
            id: IdentityId::from("d-2"),
            role: Role::Doctor,
            display_name: NonEmptyText::new("Dr Okafor").unwrap(),
        });
        Arc::new(directory)
    }

    fn test_service(data_dir: &Path) -> AppointmentService {
        let cfg = Arc::new(CoreConfig::new(data_dir.to_path_buf()));
        AppointmentService::new(cfg, seeded_directory())
    }

    fn book_default(service: &AppointmentService) -> Appointment {
        service
            .book(
                IdentityId::from("p-1"),
                IdentityId::from("d-1"),
                "2026-03-14 10:00".into(),
                "persistent cough".into(),
            )
            .expect("book should succeed")
    }

    #[test]
    fn test_book_creates_scheduled_appointment() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let appointment = book_default(&service);

        assert_eq!(appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(appointment.patient_id, IdentityId::from("p-1"));
        assert_eq!(appointment.doctor_id, IdentityId::from("d-1"));
        assert!(appointment.room_token.as_str().starts_with("consult-"));

        let reloaded = service
            .load(&appointment.id)
            .expect("booked appointment should load");
        assert_eq!(reloaded.status, AppointmentStatus::Scheduled);
        assert_eq!(reloaded.room_token, appointment.room_token);
    }

    #[test]
    fn test_book_rejects_unknown_patient() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let err = service
            .book(
                IdentityId::from("ghost"),
                IdentityId::from("d-1"),
                "2026-03-14 10:00".into(),
                String::new(),
            )
            .expect_err("unknown patient should fail");

        assert!(matches!(
            err,
            PortalError::InvalidReference {
                role: Role::Patient,
                ..
            }
        ));
    }

    #[test]
    fn test_book_rejects_role_mismatch() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        // A patient id supplied where a doctor is required.
        let err = service
            .book(
                IdentityId::from("p-1"),
                IdentityId::from("p-1"),
                "2026-03-14 10:00".into(),
                String::new(),
            )
            .expect_err("patient-as-doctor should fail");

        assert!(matches!(
            err,
            PortalError::InvalidReference {
                role: Role::Doctor,
                ..
            }
        ));
    }

    #[test]
    fn test_complete_transitions_and_records_prescription() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());
        let appointment = book_default(&service);

        service
            .complete(
                &appointment.id,
                &IdentityId::from("d-1"),
                "take rest".into(),
            )
            .expect("complete should succeed");

        let reloaded = service
            .load(&appointment.id)
            .expect("appointment should load");
        assert_eq!(reloaded.status, AppointmentStatus::Completed);

        let prescriptions = service
            .prescriptions(&appointment.id)
            .expect("prescriptions should load");
        assert_eq!(prescriptions.len(), 1);
        assert_eq!(prescriptions[0].text, "take rest");
        assert_eq!(prescriptions[0].patient_id, IdentityId::from("p-1"));
    }

    #[test]
    fn test_complete_twice_fails_invalid_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());
        let appointment = book_default(&service);

        service
            .complete(&appointment.id, &IdentityId::from("d-1"), "take rest".into())
            .expect("first complete should succeed");

        let err = service
            .complete(&appointment.id, &IdentityId::from("d-1"), "again".into())
            .expect_err("second complete should fail");
        assert!(matches!(err, PortalError::InvalidState));

        // The status and prescription log are unchanged by the failed call.
        let reloaded = service
            .load(&appointment.id)
            .expect("appointment should load");
        assert_eq!(reloaded.status, AppointmentStatus::Completed);
        let prescriptions = service
            .prescriptions(&appointment.id)
            .expect("prescriptions should load");
        assert_eq!(prescriptions.len(), 1);
    }

    #[test]
    fn test_complete_by_other_doctor_fails_forbidden() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());
        let appointment = book_default(&service);

        let err = service
            .complete(&appointment.id, &IdentityId::from("d-2"), "notes".into())
            .expect_err("other doctor should be rejected");
        assert!(matches!(err, PortalError::Forbidden));

        let reloaded = service
            .load(&appointment.id)
            .expect("appointment should load");
        assert_eq!(reloaded.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn test_complete_missing_appointment_fails_not_found() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let err = service
            .complete(&AppointmentId::new(), &IdentityId::from("d-1"), "x".into())
            .expect_err("missing appointment should fail");
        assert!(matches!(err, PortalError::NotFound));
    }

    #[test]
    fn test_load_missing_appointment_fails_not_found() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let err = service
            .load(&AppointmentId::new())
            .expect_err("missing appointment should fail");
        assert!(matches!(err, PortalError::NotFound));
    }

    #[test]
    fn test_list_for_patient_and_doctor() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let first = book_default(&service);
        let second = service
            .book(
                IdentityId::from("p-1"),
                IdentityId::from("d-2"),
                "2026-03-15 09:00".into(),
                String::new(),
            )
            .expect("book should succeed");

        let for_patient = service.list_for_patient(&IdentityId::from("p-1"));
        assert_eq!(for_patient.len(), 2);

        let for_d1 = service.list_for_doctor(&IdentityId::from("d-1"));
        assert_eq!(for_d1.len(), 1);
        assert_eq!(for_d1[0].id, first.id);

        let for_d2 = service.list_for_doctor(&IdentityId::from("d-2"));
        assert_eq!(for_d2.len(), 1);
        assert_eq!(for_d2[0].id, second.id);

        let for_other = service.list_for_patient(&IdentityId::from("d-1"));
        assert!(for_other.is_empty());
    }

    #[test]
    fn test_list_skips_unparseable_record() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        book_default(&service);

        // Plant a corrupt record alongside the valid one.
        let bogus_id = AppointmentId::new();
        let bogus_dir = service.appointment_dir(&bogus_id);
        fs::create_dir_all(&bogus_dir).expect("should create directory");
        fs::write(bogus_dir.join(APPOINTMENT_FILE_NAME), "{not json")
            .expect("should write corrupt record");

        let for_patient = service.list_for_patient(&IdentityId::from("p-1"));
        assert_eq!(for_patient.len(), 1, "corrupt record should be skipped");
    }

    #[test]
    fn test_prescriptions_missing_appointment_fails_not_found() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let service = test_service(temp_dir.path());

        let err = service
            .prescriptions(&AppointmentId::new())
            .expect_err("missing appointment should fail");
        assert!(matches!(err, PortalError::NotFound));
    }
}
