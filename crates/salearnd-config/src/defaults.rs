use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::socket::DaemonSocket;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default path of the training command the daemon execs.
pub const DEFAULT_LEARN_COMMAND: &str = "/usr/bin/sa-learn";

/// Default listen backlog. Local clients are bursty but low-volume.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 5;

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the daemon.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Default path of the training command.
pub fn default_learn_command() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_LEARN_COMMAND)
}

/// Computes the default socket endpoint for the daemon.
///
/// Root deployments land in `/run`; unprivileged ones fall back to the XDG
/// runtime directory and finally a per-uid namespace under the temporary
/// directory.
pub fn default_socket_endpoint() -> DaemonSocket {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> DaemonSocket {
    if unsafe { geteuid() } == 0 {
        return DaemonSocket::new("/run/salearnd/salearnd.sock");
    }

    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("salearnd");
    if apply_namespace {
        base.push(user_namespace());
    }

    DaemonSocket::new(base.join("salearnd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> DaemonSocket {
    let mut base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.push("salearnd");
    DaemonSocket::new(base.join("salearnd.sock"))
}
