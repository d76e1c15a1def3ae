//! Per-connection request serving.
//!
//! Runs inside the forked child that owns exactly one connection. Every
//! path out of [`RequestHandler::serve`] terminates the child: success is an
//! exec that replaces the process image, and every failure is reported to
//! the caller so the child can exit with a failure status. Nothing is ever
//! written back on the connection.

use std::convert::Infallible;
use std::io;
use std::os::unix::net::UnixStream;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::info;

use crate::command::{ExecError, LearnInvocation};
use crate::protocol::{self, Header, HeaderError};

pub(crate) const REQUEST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::request");

/// Serves a single accepted connection.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    learn_command: Utf8PathBuf,
}

impl RequestHandler {
    /// Builds a handler that execs the given training command.
    #[must_use]
    pub fn new(learn_command: impl Into<Utf8PathBuf>) -> Self {
        Self {
            learn_command: learn_command.into(),
        }
    }

    /// Reads and validates the header, then replaces the process image with
    /// the training command fed by the remainder of the connection.
    pub fn serve(&self, mut stream: UnixStream) -> Result<Infallible, RequestError> {
        let line = protocol::read_header_line(&mut stream)
            .map_err(|source| RequestError::ReadHeader { source })?;
        let header = Header::parse(&line)?;

        info!(
            target: REQUEST_TARGET,
            mode = %header.mode,
            user = %header.user,
            "learn request accepted"
        );

        let invocation = LearnInvocation::new(self.learn_command.clone(), header.mode, header.user);
        invocation.exec_with_stdin(stream).map_err(RequestError::from)
    }
}

/// Errors that terminate a per-connection child with a failure status.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Reading the header line from the connection failed.
    #[error("failed to read header: {source}")]
    ReadHeader {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Header validation failed.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Spawning the training command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}
