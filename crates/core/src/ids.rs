//! Identifier types for appointment records.
//!
//! Appointment identifiers use the portal's canonical UUID representation
//! (32 lowercase hex characters, no hyphens) so they can double as stable
//! storage path components.

use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::error::{PortalError, PortalResult};

/// Canonical appointment identifier (32 lowercase hex characters, no hyphens).
///
/// Once constructed, the contained UUID is guaranteed to be in canonical form.
/// Use this wrapper whenever accepting an appointment id from outside the core
/// (API request, realtime event) or deriving a sharded storage path.
///
/// # Construction
/// - [`AppointmentId::new`] generates a fresh identifier at booking time.
/// - [`AppointmentId::parse`] validates an externally supplied identifier.
///
/// # Display format
/// Always the canonical 32-character lowercase hex form without hyphens; the
/// same string serves as the room key for the appointment's chat room.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppointmentId(Uuid);

impl Default for AppointmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentId {
    /// Generates a new appointment identifier in canonical form.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses an identifier that must already be in canonical form.
    ///
    /// This does **not** normalise other common UUID forms (for example,
    /// hyphenated or uppercase); callers must provide the canonical
    /// representation.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidId`] if `input` is not canonical.
    pub fn parse(input: &str) -> PortalResult<Self> {
        if Self::is_canonical(input) {
            // SAFETY: is_canonical guarantees valid hex, so parse_str will succeed
            let uuid = Uuid::parse_str(input).expect("is_canonical guarantees valid UUID");
            return Ok(Self(uuid));
        }
        Err(PortalError::InvalidId(format!(
            "appointment id must be 32 lowercase hex characters without hyphens, got: '{}'",
            input
        )))
    }

    /// Returns true if `input` is in canonical form.
    ///
    /// Purely syntactic: exactly 32 bytes, lowercase hex only.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<id>/` where `s1`/`s2` are the first two
    /// hex character pairs of the identifier.
    ///
    /// The two-level sharding keeps directory fan-out bounded as the number of
    /// appointment records grows.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        let s1 = &canonical[0..2];
        let s2 = &canonical[2..4];
        parent_dir.join(s1).join(s2).join(&canonical)
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for AppointmentId {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentId::parse(s)
    }
}

impl serde::Serialize for AppointmentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for AppointmentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AppointmentId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Opaque per-appointment room token, generated once at booking time.
///
/// The token is handed to the video-call collaborator as-is; it carries no
/// authorisation weight and is never parsed by this core.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoomToken(String);

impl RoomToken {
    /// Generates a fresh opaque token (`consult-` plus 12 hex characters).
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("consult-{}", &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
