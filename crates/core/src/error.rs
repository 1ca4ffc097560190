use consult_types::Role;

use crate::identity::IdentityId;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{role} reference does not resolve to a registered {role}: {id}")]
    InvalidReference { role: Role, id: IdentityId },
    #[error("appointment not found")]
    NotFound,
    #[error("not a party to this appointment")]
    Forbidden,
    #[error("appointment is not in a state that allows this transition")]
    InvalidState,
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Text(#[from] consult_types::TextError),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialise record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialise record: {0}")]
    Deserialization(serde_json::Error),
}

impl PortalError {
    /// True for failures of the persistence backend itself, as opposed to
    /// per-request domain rejections.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            PortalError::StorageDirCreation(_)
                | PortalError::FileWrite(_)
                | PortalError::FileRead(_)
                | PortalError::Serialization(_)
                | PortalError::Deserialization(_)
        )
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
