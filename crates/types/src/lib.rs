//! Validated value types shared across the consultation portal.
//!
//! These newtypes guarantee their invariants at construction time so the rest
//! of the system never re-validates text it has already accepted.

use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input text exceeded the permitted length
    #[error("Text exceeds the maximum of {max} characters")]
    TooLong { max: usize },
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace
/// character. The input is automatically trimmed of leading and trailing
/// whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Chat message text: trimmed, non-empty, and bounded in length.
///
/// The bound exists so one oversized frame cannot bloat the append-only
/// message log; [`MessageText::MAX_CHARS`] is the single place it is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageText(String);

impl MessageText {
    /// Maximum number of characters a single chat message may contain.
    pub const MAX_CHARS: usize = 4096;

    /// Creates a new `MessageText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. Returns
    /// [`TextError::Empty`] if nothing remains, or [`TextError::TooLong`] if
    /// the trimmed text exceeds [`MessageText::MAX_CHARS`] characters.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.chars().count() > Self::MAX_CHARS {
            return Err(TextError::TooLong {
                max: Self::MAX_CHARS,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MessageText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for MessageText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for MessageText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MessageText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// The role an identity holds within the portal.
///
/// Roles are assigned by the external identity collaborator; this core only
/// consumes them for reference checks at booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Pharmacy,
}

impl Role {
    /// Returns the lowercase wire name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Pharmacy => "pharmacy",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, thiserror::Error)]
#[error("unknown role: '{0}'")]
pub struct RoleParseError(String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "pharmacy" => Ok(Role::Pharmacy),
            other => Err(RoleParseError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_text_trims_whitespace() {
        let text = NonEmptyText::new("  Aisha Khan  ").expect("non-empty input should succeed");
        assert_eq!(text.as_str(), "Aisha Khan");
    }

    #[test]
    fn test_non_empty_text_rejects_whitespace_only() {
        let err = NonEmptyText::new("   \t\n").expect_err("whitespace-only input should fail");
        assert!(matches!(err, TextError::Empty));
    }

    #[test]
    fn test_message_text_accepts_trimmed_content() {
        let text = MessageText::new("  hello  ").expect("message should succeed");
        assert_eq!(text.as_str(), "hello");
    }

    #[test]
    fn test_message_text_rejects_empty() {
        let err = MessageText::new("").expect_err("empty message should fail");
        assert!(matches!(err, TextError::Empty));
    }

    #[test]
    fn test_message_text_rejects_oversized() {
        let oversized = "a".repeat(MessageText::MAX_CHARS + 1);
        let err = MessageText::new(&oversized).expect_err("oversized message should fail");
        assert!(matches!(
            err,
            TextError::TooLong {
                max: MessageText::MAX_CHARS
            }
        ));
    }

    #[test]
    fn test_message_text_accepts_maximum_length() {
        let at_limit = "a".repeat(MessageText::MAX_CHARS);
        let text = MessageText::new(&at_limit).expect("message at the limit should succeed");
        assert_eq!(text.as_str().len(), MessageText::MAX_CHARS);
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Patient, Role::Doctor, Role::Pharmacy] {
            let parsed: Role = role.as_str().parse().expect("role name should parse");
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn test_role_rejects_unknown_name() {
        let result: Result<Role, _> = "admin".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_role_serde_uses_lowercase() {
        let json = serde_json::to_string(&Role::Doctor).expect("role should serialise");
        assert_eq!(json, "\"doctor\"");

        let parsed: Role = serde_json::from_str("\"pharmacy\"").expect("role should deserialise");
        assert_eq!(parsed, Role::Pharmacy);
    }

    #[test]
    fn test_non_empty_text_serde_round_trip() {
        let text = NonEmptyText::new("Dr Patel").expect("text should succeed");
        let json = serde_json::to_string(&text).expect("text should serialise");
        let back: NonEmptyText = serde_json::from_str(&json).expect("text should deserialise");
        assert_eq!(back, text);
    }

    #[test]
    fn test_non_empty_text_serde_rejects_empty() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }
}
