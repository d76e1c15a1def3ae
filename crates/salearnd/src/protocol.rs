//! Wire header for learn requests.
//!
//! A client sends one ASCII line, `<MODE> <USER>`, terminated by a newline,
//! then streams the raw message body. The header is read a single byte at a
//! time: the connection is also the body's file descriptor, so reading in
//! chunks would swallow body bytes that belong to the spawned command.

use std::io::{self, Read};
use std::str::{self, FromStr};

use strum::{Display, EnumString};
use thiserror::Error;

/// Upper bound on the buffered header line, in bytes.
///
/// A line reaching the bound without a newline is treated as the complete
/// header; bytes past the bound stay on the connection as body content.
pub const MAX_HEADER_BYTES: usize = 4096;

/// Training mode requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LearnMode {
    /// Teach the classifier the body is spam.
    Spam,
    /// Teach the classifier the body is ham.
    Ham,
}

impl LearnMode {
    /// Command line flag selecting this mode on the training command.
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            Self::Spam => "--spam",
            Self::Ham => "--ham",
        }
    }
}

/// Parsed request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Requested training mode.
    pub mode: LearnMode,
    /// Account the training applies to, forwarded verbatim.
    pub user: String,
}

impl Header {
    /// Parses a captured header line.
    ///
    /// The line is split on ASCII whitespace; the first token is the mode,
    /// the second the user. Tokens beyond the second are ignored. The user
    /// token is not validated beyond being present and whitespace-free;
    /// socket access is the trust boundary.
    pub fn parse(line: &[u8]) -> Result<Self, HeaderError> {
        let text = str::from_utf8(line).map_err(|_| HeaderError::InvalidEncoding)?;
        let mut tokens = text.split_whitespace();
        let (Some(mode), Some(user)) = (tokens.next(), tokens.next()) else {
            return Err(HeaderError::MissingTokens);
        };
        let mode = LearnMode::from_str(mode)
            .map_err(|_| HeaderError::UnknownMode(mode.to_owned()))?;
        Ok(Self {
            mode,
            user: user.to_owned(),
        })
    }
}

/// Errors surfaced while validating a header line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Header held fewer than two tokens.
    #[error("invalid header line")]
    MissingTokens,
    /// Mode token matched neither recognised literal.
    #[error("invalid mode: {0}")]
    UnknownMode(String),
    /// Header bytes were not valid UTF-8.
    #[error("header is not valid UTF-8")]
    InvalidEncoding,
}

/// Reads the header line from the start of a connection.
///
/// Stops at the first newline (consumed, not returned), at end of stream, or
/// at [`MAX_HEADER_BYTES`]; the absence of a newline is not an error.
pub fn read_header_line<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];
    while line.len() < MAX_HEADER_BYTES {
        let read = read_byte_with_retry(reader, &mut byte)?;
        if read == 0 || byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(line)
}

fn read_byte_with_retry<R: Read>(reader: &mut R, byte: &mut [u8; 1]) -> io::Result<usize> {
    loop {
        match reader.read(byte) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}
