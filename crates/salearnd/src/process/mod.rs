//! Daemon process supervision: daemonisation, singleton guard, child
//! reaping, and shutdown handling.

pub(crate) mod daemonizer;
mod errors;
mod guard;
pub(crate) mod launch;
mod paths;
pub(crate) mod reaper;
pub(crate) mod shutdown;

pub use daemonizer::DaemonizeError;
pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};
pub use reaper::ReaperError;
pub use shutdown::ShutdownError;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "SALEARND_FOREGROUND";
