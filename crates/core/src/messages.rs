//! Durable, ordered chat message log.
//!
//! The message store is the single source of truth for consultation chat:
//! an append-only JSON Lines file per appointment, with a per-appointment
//! strictly increasing sequence number as the primary sort key. Messages are
//! immutable once appended and are never deleted.
//!
//! Callers that fan messages out to live sessions must append here first; a
//! message that was broadcast but not durably stored would be a correctness
//! violation, so the broker only broadcasts what this store has returned.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use consult_types::MessageText;

use crate::config::CoreConfig;
use crate::error::{PortalError, PortalResult};
use crate::identity::IdentityId;
use crate::ids::AppointmentId;

/// Name of the append-only chat log inside an appointment directory.
pub const CHAT_LOG_FILE_NAME: &str = "chat.jsonl";

/// One persisted chat message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub appointment_id: AppointmentId,
    /// Strictly increasing within one appointment; the primary sort key.
    pub sequence: u64,
    pub sender_id: IdentityId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Cached append position for one appointment's log.
///
/// `None` until the log has been opened once; initialised from the last
/// persisted line so a restarted process resumes the sequence correctly.
struct LogCursor {
    next_sequence: Option<u64>,
}

/// Durable append-only store for consultation chat messages.
///
/// Appends to the same appointment serialise on a per-appointment lock so the
/// sequence stays strictly increasing under concurrent writers; appends to
/// different appointments do not contend.
pub struct MessageStore {
    cfg: Arc<CoreConfig>,
    logs: Mutex<HashMap<AppointmentId, Arc<Mutex<LogCursor>>>>,
}

impl MessageStore {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a message to an appointment's chat log.
    ///
    /// The text is validated (trimmed, non-empty, bounded) before anything is
    /// written. On success the returned record carries the assigned sequence
    /// number and creation timestamp, and the append has been committed to
    /// the log file.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Text`] for empty or oversized text, or a
    /// storage error if the log cannot be written.
    pub fn append(
        &self,
        appointment_id: &AppointmentId,
        sender_id: &IdentityId,
        text: &str,
    ) -> PortalResult<ChatMessage> {
        let text = MessageText::new(text)?;

        let cursor = self.log_cursor(appointment_id);
        let mut cursor = cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let sequence = match cursor.next_sequence {
            Some(next) => next,
            None => self.recover_next_sequence(appointment_id)?,
        };

        let message = ChatMessage {
            appointment_id: appointment_id.clone(),
            sequence,
            sender_id: sender_id.clone(),
            message: text.as_str().to_owned(),
            created_at: Utc::now(),
        };
        self.append_line(appointment_id, &message)?;

        // Only advance the cursor once the line is on disk.
        cursor.next_sequence = Some(sequence + 1);
        Ok(message)
    }

    /// Returns all messages for an appointment in ascending sequence order.
    ///
    /// A fresh read each call; safe to call concurrently with [`append`].
    /// An appointment with no log yet yields an empty list. Unparseable lines
    /// are logged and skipped.
    ///
    /// [`append`]: MessageStore::append
    pub fn list_by_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> PortalResult<Vec<ChatMessage>> {
        let contents = match fs::read_to_string(self.chat_log_file(appointment_id)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortalError::FileRead(e)),
        };

        let mut messages = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(
                        appointment_id = %appointment_id,
                        "skipping unparseable chat line: {}",
                        e
                    );
                }
            }
        }

        messages.sort_by_key(|m| m.sequence);
        Ok(messages)
    }

    fn chat_log_file(&self, appointment_id: &AppointmentId) -> PathBuf {
        appointment_id
            .sharded_dir(&self.cfg.appointments_dir())
            .join(CHAT_LOG_FILE_NAME)
    }

    fn log_cursor(&self, appointment_id: &AppointmentId) -> Arc<Mutex<LogCursor>> {
        let mut logs = self
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        logs.entry(appointment_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LogCursor {
                    next_sequence: None,
                }))
            })
            .clone()
    }

    /// Reads the existing log to find the next sequence after a cold start.
    fn recover_next_sequence(&self, appointment_id: &AppointmentId) -> PortalResult<u64> {
        let last = self
            .list_by_appointment(appointment_id)?
            .last()
            .map(|m| m.sequence)
            .unwrap_or(0);
        Ok(last + 1)
    }

    fn append_line(
        &self,
        appointment_id: &AppointmentId,
        message: &ChatMessage,
    ) -> PortalResult<()> {
        use std::io::Write;

        let mut line = serde_json::to_string(message).map_err(PortalError::Serialization)?;
        line.push('\n');

        let path = self.chat_log_file(appointment_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(PortalError::StorageDirCreation)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(PortalError::FileWrite)?;
        file.write_all(line.as_bytes())
            .map_err(PortalError::FileWrite)?;
        Ok(())
    }
}
