//! Invocation of the external training command.
//!
//! The invocation is consumed exactly once per connection: the connection is
//! rewired onto standard input and the current process image is replaced by
//! the training command. Argument order matches what the command expects:
//! mode flag, user flag and token, then the literal asking it to read the
//! message body from standard input.

use std::convert::Infallible;
use std::ffi::{CString, NulError};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::unistd::{dup2, execvp};
use thiserror::Error;

use crate::protocol::LearnMode;

/// Flag introducing the user token.
pub const USER_FLAG: &str = "-u";

/// Literal telling the training command to read the body from stdin.
pub const STDIN_SENTINEL: &str = "-";

/// One-shot description of the command spawned for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnInvocation {
    program: Utf8PathBuf,
    mode: LearnMode,
    user: String,
}

impl LearnInvocation {
    /// Builds an invocation for the given program, mode, and user.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>, mode: LearnMode, user: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            mode,
            user: user.into(),
        }
    }

    /// Program path the invocation execs.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        self.program.as_ref()
    }

    /// Full argument vector, program name included.
    ///
    /// The user token appears verbatim: no escaping or sanitisation is
    /// performed. The argv-vector exec means no shell ever interprets it;
    /// socket access is the trust boundary.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        vec![
            self.program.to_string(),
            self.mode.flag().to_owned(),
            USER_FLAG.to_owned(),
            self.user.clone(),
            STDIN_SENTINEL.to_owned(),
        ]
    }

    /// Rewires the connection onto standard input and replaces the current
    /// process image with the training command.
    ///
    /// On success this never returns; the remainder of the connection's byte
    /// stream is the spawned command's standard input. The original stream
    /// handle is released after the rewire so no duplicate reference to the
    /// connection outlives it.
    pub fn exec_with_stdin(self, stream: UnixStream) -> Result<Infallible, ExecError> {
        let argv = self.cstring_argv()?;

        dup2(stream.as_raw_fd(), libc::STDIN_FILENO)
            .map_err(|source| ExecError::RewireStdin { source })?;
        drop(stream);

        match execvp(&argv[0], &argv) {
            Err(source) => Err(ExecError::Exec {
                program: self.program,
                source,
            }),
            Ok(never) => match never {},
        }
    }

    fn cstring_argv(&self) -> Result<Vec<CString>, ExecError> {
        self.argv()
            .into_iter()
            .map(|argument| CString::new(argument).map_err(|source| ExecError::NulByte { source }))
            .collect()
    }
}

/// Errors surfaced while spawning the training command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// An argument contained an interior NUL byte.
    #[error("argument contains an interior NUL byte")]
    NulByte {
        /// Underlying conversion error.
        #[source]
        source: NulError,
    },
    /// The connection could not be rewired onto standard input.
    #[error("failed to rewire connection onto stdin: {source}")]
    RewireStdin {
        /// Underlying OS error.
        source: Errno,
    },
    /// Image replacement failed (missing binary, permissions).
    #[error("failed to exec '{program}': {source}")]
    Exec {
        /// Program that failed to exec.
        program: Utf8PathBuf,
        /// Underlying OS error.
        source: Errno,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LearnMode::Spam, "--spam")]
    #[case(LearnMode::Ham, "--ham")]
    fn argv_selects_mode_flag(#[case] mode: LearnMode, #[case] flag: &str) {
        let invocation = LearnInvocation::new("/usr/bin/sa-learn", mode, "alice");
        assert_eq!(
            invocation.argv(),
            vec!["/usr/bin/sa-learn", flag, "-u", "alice", "-"]
        );
    }

    #[test]
    fn argv_forwards_user_verbatim() {
        let user = "alice+folder@example.org;--dump";
        let invocation = LearnInvocation::new("/usr/bin/sa-learn", LearnMode::Ham, user);
        assert_eq!(invocation.argv()[3], user);
    }

    #[test]
    fn nul_byte_in_user_is_rejected_before_rewiring() {
        let (ours, _theirs) = UnixStream::pair().expect("socket pair");
        let invocation = LearnInvocation::new("/usr/bin/sa-learn", LearnMode::Spam, "ali\0ce");
        let error = invocation
            .exec_with_stdin(ours)
            .expect_err("NUL byte must be rejected");
        assert!(matches!(error, ExecError::NulByte { .. }));
    }
}
