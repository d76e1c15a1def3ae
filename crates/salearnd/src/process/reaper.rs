//! Asynchronous reclamation of finished per-connection children.

use std::io;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::signal::SIGCHLD;
use signal_hook::iterator::Signals;
use signal_hook::iterator::backend::Handle;
use thiserror::Error;

/// Errors surfaced while arming the reaper.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// Installing the SIGCHLD handler or its thread failed.
    #[error("failed to arm child reaper: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Background reaper for finished per-connection children.
///
/// Armed once before the accept loop so no child can finish unobserved.
/// Pure resource hygiene: it logs nothing and has no other side effect.
pub(crate) struct ChildReaper {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl ChildReaper {
    /// Installs the SIGCHLD handler and starts the reaping thread.
    pub(crate) fn arm() -> Result<Self, ReaperError> {
        let mut signals =
            Signals::new([SIGCHLD]).map_err(|source| ReaperError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("child-reaper".to_owned())
            .spawn(move || {
                for _ in signals.forever() {
                    drain_finished_children();
                }
            })
            .map_err(|source| ReaperError::Install { source })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stops the signal stream and reaps anything still outstanding.
    pub(crate) fn disarm(mut self) {
        self.stop();
        drain_finished_children();
    }

    fn stop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ChildReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains every finished child without blocking.
///
/// One delivered SIGCHLD can cover several exits, so reaping continues
/// until the kernel reports no further reclaimable children.
fn drain_finished_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::time::{Duration, Instant};

    use super::*;

    fn zombie_count() -> usize {
        // Linux exposes child state via /proc; count our zombie children.
        let me = std::process::id();
        let mut zombies = 0;
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        for entry in entries.flatten() {
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            let fields: Vec<&str> = stat.split_whitespace().collect();
            if fields.len() > 3 && fields[2] == "Z" && fields[3] == me.to_string() {
                zombies += 1;
            }
        }
        zombies
    }

    #[test]
    fn reaper_drains_finished_children() {
        let reaper = ChildReaper::arm().expect("arm reaper");

        for _ in 0..4 {
            Command::new("true").spawn().expect("spawn child");
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && zombie_count() > 0 {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(zombie_count(), 0, "all finished children should be reaped");

        reaper.disarm();
    }
}
