//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use std::path::{Path, PathBuf};

/// Name of the appointments directory under the portal data directory.
pub const APPOINTMENTS_DIR_NAME: &str = "appointments";

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    portal_data_dir: PathBuf,
}

impl CoreConfig {
    /// Create a new `CoreConfig` rooted at `portal_data_dir`.
    ///
    /// The directory itself is created lazily by the services that write
    /// under it; startup only fixes the location.
    pub fn new(portal_data_dir: PathBuf) -> Self {
        Self { portal_data_dir }
    }

    pub fn portal_data_dir(&self) -> &Path {
        &self.portal_data_dir
    }

    /// Directory holding the sharded per-appointment record directories.
    pub fn appointments_dir(&self) -> PathBuf {
        self.portal_data_dir.join(APPOINTMENTS_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appointments_dir_is_under_data_dir() {
        let cfg = CoreConfig::new(PathBuf::from("/portal_data"));
        assert_eq!(
            cfg.appointments_dir(),
            PathBuf::from("/portal_data/appointments")
        );
    }
}
