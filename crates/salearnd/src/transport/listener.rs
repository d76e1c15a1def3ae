//! Listener implementation for the daemon's Unix socket.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::{info, warn};

use salearnd_config::DaemonSocket;

use super::{ConnectionHandler, LISTENER_TARGET};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// Listener bound to the daemon's Unix socket.
#[derive(Debug)]
pub(crate) struct SocketListener {
    socket: DaemonSocket,
    listener: UnixListener,
}

impl SocketListener {
    /// Binds the socket, reclaiming a stale socket file first.
    ///
    /// The backlog is deliberately small: clients are local and bursty, not
    /// sustained.
    pub(crate) fn bind(socket: &DaemonSocket, backlog: i32) -> Result<Self, ListenerError> {
        let path = socket.path().as_std_path();
        reclaim_stale_socket(path)?;

        let raw = Socket::new(Domain::UNIX, Type::STREAM, None)
            .map_err(|source| ListenerError::CreateSocket { source })?;
        let address = SockAddr::unix(path).map_err(|source| ListenerError::Address {
            path: display(path),
            source,
        })?;
        raw.bind(&address).map_err(|source| ListenerError::Bind {
            path: display(path),
            source,
        })?;
        raw.listen(backlog).map_err(|source| ListenerError::Listen {
            path: display(path),
            source,
        })?;
        raw.set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;

        Ok(Self {
            socket: socket.clone(),
            listener: raw.into(),
        })
    }

    /// Runs the accept loop until the shutdown flag is raised.
    ///
    /// Accepted connections are handed to the handler and never waited on.
    /// A signal-interrupted accept is retried; any other accept failure is
    /// fatal, since the daemon cannot usefully continue without its
    /// endpoint. The socket file is removed on every exit path.
    pub(crate) fn run(
        self,
        handler: Arc<dyn ConnectionHandler>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), ListenerError> {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.socket,
            "socket listener active"
        );
        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(error) = stream.set_nonblocking(false) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "failed to restore blocking mode; dropping connection"
                        );
                        continue;
                    }
                    handler.handle(stream);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    self.remove_socket_file();
                    return Err(ListenerError::Accept { source });
                }
            }
        }
        self.remove_socket_file();
        Ok(())
    }

    fn remove_socket_file(&self) {
        match fs::remove_file(self.socket.path().as_std_path()) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: LISTENER_TARGET,
                    endpoint = %self.socket,
                    error = %error,
                    "failed to remove socket file"
                );
            }
            _ => {}
        }
    }
}

/// Removes a stale socket file at the bind path.
///
/// A connectable socket means another daemon is alive and the bind must be
/// refused; a refused or dangling socket is leftover state from an earlier
/// run. Anything that is not a socket is left untouched.
fn reclaim_stale_socket(path: &Path) -> Result<(), ListenerError> {
    if !path.exists() {
        return Ok(());
    }

    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::Metadata {
        path: display(path),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotSocket {
            path: display(path),
        });
    }

    match UnixStream::connect(path) {
        Ok(_stream) => Err(ListenerError::AlreadyInUse {
            path: display(path),
        }),
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| ListenerError::Cleanup {
                path: display(path),
                source,
            })
        }
        Err(source) => Err(ListenerError::Probe {
            path: display(path),
            source,
        }),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Creating the socket failed.
    #[error("failed to create unix socket: {source}")]
    CreateSocket {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bind path could not be converted to a socket address.
    #[error("invalid unix socket path {path}: {source}")]
    Address {
        /// Configured bind path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding the socket failed.
    #[error("failed to bind unix listener at {path}: {source}")]
    Bind {
        /// Configured bind path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Marking the socket as listening failed.
    #[error("failed to listen on {path}: {source}")]
    Listen {
        /// Configured bind path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Enabling non-blocking accepts failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Accepting a connection failed.
    #[error("failed to accept connection: {source}")]
    Accept {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading metadata for an existing socket path failed.
    #[error("failed to read metadata for {path}: {source}")]
    Metadata {
        /// Existing path at the bind location.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bind path exists but is not a socket.
    #[error("socket path {path} is not a socket")]
    NotSocket {
        /// Existing path at the bind location.
        path: String,
    },
    /// Another daemon is already serving the socket.
    #[error("existing unix socket {path} is already in use")]
    AlreadyInUse {
        /// Existing socket path.
        path: String,
    },
    /// Probing an existing socket failed.
    #[error("failed to probe existing unix socket {path}: {source}")]
    Probe {
        /// Existing socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket file failed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    Cleanup {
        /// Stale socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
