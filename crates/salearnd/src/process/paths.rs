//! Derives runtime artefact paths for the daemon lifecycle.
//!
//! The runtime directory is the socket's parent; it houses the singleton
//! lock and pid files so everything the daemon writes lives in one place.

use std::fs;
use std::path::{Path, PathBuf};

use salearnd_config::Config;

use super::errors::LaunchError;

#[derive(Debug, Clone)]
pub(crate) struct ProcessPaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
}

impl ProcessPaths {
    pub(super) fn derive(config: &Config) -> Result<Self, LaunchError> {
        let socket_path = config.daemon_socket().path();
        let runtime_dir = socket_path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .map(|parent| parent.as_std_path().to_path_buf())
            .ok_or_else(|| LaunchError::MissingSocketParent {
                path: socket_path.to_string(),
            })?;
        fs::create_dir_all(&runtime_dir).map_err(|source| LaunchError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            lock_path: runtime_dir.join("salearnd.lock"),
            pid_path: runtime_dir.join("salearnd.pid"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    pub(crate) fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    pub(crate) fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    pub(crate) fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }
}
