//! Identity types consumed from the external identity collaborator.
//!
//! The portal core does not own registration, login or profile data. It only
//! consumes `(id, role, display name)` triples through the
//! [`IdentityDirectory`] lookup contract; the surrounding session layer is
//! trusted to have authenticated the caller before this core sees it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::RwLock;

use consult_types::{NonEmptyText, Role};

use crate::error::{PortalError, PortalResult};

/// Opaque identity reference issued by the identity collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// The fields of an identity this core consumes.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub role: Role,
    pub display_name: NonEmptyText,
}

/// Lookup contract fulfilled by the external identity collaborator.
pub trait IdentityDirectory: Send + Sync {
    /// Resolves an identity reference, or `None` if it is unknown.
    fn lookup(&self, id: &IdentityId) -> Option<Identity>;
}

/// Process-local directory of identities.
///
/// Stands in for the external identity store: the hosting process seeds it at
/// startup (see [`InMemoryDirectory::load_from_file`]) or inserts entries as
/// its own registration flow creates them.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<IdentityId, Identity>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an identity.
    pub fn insert(&self, identity: Identity) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(identity.id.clone(), identity);
    }

    /// Loads a directory from a JSON array of identities.
    ///
    /// # Errors
    ///
    /// Returns `PortalError` if the file cannot be read or does not parse as
    /// a list of `{id, role, display_name}` records.
    pub fn load_from_file(path: &Path) -> PortalResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(PortalError::FileRead)?;
        let identities: Vec<Identity> =
            serde_json::from_str(&contents).map_err(PortalError::Deserialization)?;

        let directory = Self::new();
        for identity in identities {
            directory.insert(identity);
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn lookup(&self, id: &IdentityId) -> Option<Identity> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, role: Role, name: &str) -> Identity {
        Identity {
            id: IdentityId::from(id),
            role,
            display_name: NonEmptyText::new(name).expect("display name should succeed"),
        }
    }

    #[test]
    fn test_lookup_returns_inserted_identity() {
        let directory = InMemoryDirectory::new();
        directory.insert(identity("p-1", Role::Patient, "Aisha Khan"));

        let found = directory
            .lookup(&IdentityId::from("p-1"))
            .expect("identity should be found");
        assert_eq!(found.role, Role::Patient);
        assert_eq!(found.display_name.as_str(), "Aisha Khan");
    }

    #[test]
    fn test_lookup_unknown_id_returns_none() {
        let directory = InMemoryDirectory::new();
        assert!(directory.lookup(&IdentityId::from("ghost")).is_none());
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let directory = InMemoryDirectory::new();
        directory.insert(identity("d-1", Role::Doctor, "Dr Patel"));
        directory.insert(identity("d-1", Role::Doctor, "Dr A. Patel"));

        let found = directory
            .lookup(&IdentityId::from("d-1"))
            .expect("identity should be found");
        assert_eq!(found.display_name.as_str(), "Dr A. Patel");
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_load_from_file_parses_seed() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let seed_path = dir.path().join("identities.json");
        std::fs::write(
            &seed_path,
            r#"[
                {"id": "p-1", "role": "patient", "display_name": "Aisha Khan"},
                {"id": "d-1", "role": "doctor", "display_name": "Dr Patel"}
            ]"#,
        )
        .expect("seed file should be written");

        let directory =
            InMemoryDirectory::load_from_file(&seed_path).expect("seed should load");
        assert_eq!(directory.len(), 2);
        let doctor = directory
            .lookup(&IdentityId::from("d-1"))
            .expect("doctor should be found");
        assert_eq!(doctor.role, Role::Doctor);
    }

    #[test]
    fn test_load_from_file_rejects_malformed_seed() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let seed_path = dir.path().join("identities.json");
        std::fs::write(&seed_path, "{not json").expect("seed file should be written");

        let result = InMemoryDirectory::load_from_file(&seed_path);
        assert!(matches!(result, Err(PortalError::Deserialization(_))));
    }
}
