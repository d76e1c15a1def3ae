//! Socket listener for the daemon's Unix endpoint.
//!
//! The transport module binds the configured Unix socket, reclaims stale
//! socket files left by earlier runs, and hands each accepted connection to
//! an isolated per-connection process.

mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub(crate) use self::handler::{ConnectionHandler, ForkingConnectionHandler};
pub use self::listener::ListenerError;
pub(crate) use self::listener::SocketListener;
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
