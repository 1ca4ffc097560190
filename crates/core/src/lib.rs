//! # Consult Core
//!
//! Core business logic for the consultation portal.
//!
//! This crate contains pure data operations and storage management:
//! - Appointment booking and the `Scheduled -> Completed` lifecycle
//! - The durable, ordered per-appointment chat log
//! - Access decisions over appointment membership
//! - The identity collaborator contract
//!
//! **No API concerns**: HTTP servers, WebSocket transport and realtime room
//! state belong in the hosting binary and `consult-realtime`.

pub mod access;
pub mod appointment;
pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod messages;

pub use access::AccessGuard;
pub use appointment::{Appointment, AppointmentService, AppointmentStatus, Prescription};
pub use config::CoreConfig;
pub use error::{PortalError, PortalResult};
pub use identity::{Identity, IdentityDirectory, IdentityId, InMemoryDirectory};
pub use ids::{AppointmentId, RoomToken};
pub use messages::{ChatMessage, MessageStore};

pub use consult_types::{MessageText, NonEmptyText, Role, TextError};
