//! Privilege-separation daemon feeding a local training command.
//!
//! `salearnd` listens on a Unix domain socket configured via
//! [`salearnd_config`]. Each accepted connection carries a one-line header
//! (`<MODE> <USER>`, where MODE is a case-insensitive `SPAM` or `HAM`)
//! followed by a raw message body. The daemon forks one isolated process per
//! connection; that process validates the header, rewires the remainder of
//! the connection onto standard input, and replaces itself with the
//! configured training command. Nothing is written back to the caller.
//!
//! The crate is organised around the daemon lifecycle: [`telemetry`]
//! installs the logging sink, the process module supervises daemonisation,
//! the singleton guard, child reaping, and shutdown signals, the transport
//! layer owns the listening socket and per-connection isolation, and
//! [`protocol`] and [`command`] cover the wire header and the exec'd
//! invocation.

pub mod command;
mod process;
pub mod protocol;
mod request;
pub mod telemetry;
mod transport;

pub use process::{
    DaemonizeError, LaunchError, LaunchMode, ReaperError, ShutdownError, run_daemon,
};
pub use request::{RequestError, RequestHandler};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;
