//! Connection handling abstractions for the daemon listener.

use std::os::unix::net::UnixStream;

use nix::unistd::{ForkResult, fork};
use tracing::{debug, warn};

use super::LISTENER_TARGET;
use crate::request::RequestHandler;

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: UnixStream);
}

/// Handler that isolates each connection in a forked child process.
///
/// The parent keeps no reference to the connection once the child owns it
/// and never waits on the child; finished children are reclaimed
/// asynchronously by the reaper.
#[derive(Debug)]
pub(crate) struct ForkingConnectionHandler {
    handler: RequestHandler,
}

impl ForkingConnectionHandler {
    pub(crate) fn new(handler: RequestHandler) -> Self {
        Self { handler }
    }
}

impl ConnectionHandler for ForkingConnectionHandler {
    fn handle(&self, stream: UnixStream) {
        // SAFETY: the child calls nothing that depends on other threads'
        // state; it reads the connection, parses the header, and either
        // execs or `_exit`s.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                if let Err(error) = self.handler.serve(stream) {
                    warn!(target: LISTENER_TARGET, %error, "request failed");
                }
                // A successful serve never returns: the image was replaced.
                unsafe { libc::_exit(1) }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(
                    target: LISTENER_TARGET,
                    pid = child.as_raw(),
                    "connection handed to child"
                );
                drop(stream);
            }
            Err(errno) => {
                // Resource exhaustion: drop the client, keep serving others.
                warn!(
                    target: LISTENER_TARGET,
                    error = %errno,
                    "failed to fork connection handler"
                );
                drop(stream);
            }
        }
    }
}
