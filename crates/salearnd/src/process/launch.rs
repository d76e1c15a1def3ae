//! Supervises daemon launch sequencing and runtime orchestration.

use std::env;
use std::sync::Arc;

use tracing::info;

use salearnd_config::{Config, ConfigError};

use crate::request::RequestHandler;
use crate::telemetry;
use crate::transport::{ConnectionHandler, ForkingConnectionHandler, SocketListener};

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::ProcessGuard;
use super::paths::ProcessPaths;
use super::reaper::ChildReaper;
use super::shutdown::ShutdownFlag;
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Trait abstracting configuration loading for testability.
pub(crate) trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load()
    }
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, D> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) loader: L,
}

/// Runs the daemon using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        mode: LaunchMode::detect(),
        daemonizer: SystemDaemonizer::new(),
        loader: SystemConfigLoader,
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, D>(plan: LaunchPlan<L, D>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
{
    let LaunchPlan {
        mode,
        daemonizer,
        loader,
    } = plan;

    let config = loader.load()?;
    let _telemetry = telemetry::initialise(&config)?;
    info!(target: PROCESS_TARGET, ?mode, "starting daemon runtime");

    config.daemon_socket().prepare_filesystem()?;
    let paths = ProcessPaths::derive(&config)?;
    info!(
        target: PROCESS_TARGET,
        runtime = %paths.runtime_dir().display(),
        "runtime directory prepared"
    );
    let guard = ProcessGuard::acquire(paths)?;

    // Detach before any socket or signal setup so nothing created below
    // leaks into the old session.
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize()?;
    }
    guard.write_pid(std::process::id())?;

    let listener = SocketListener::bind(config.daemon_socket(), config.listen_backlog())?;
    info!(
        target: PROCESS_TARGET,
        endpoint = %config.daemon_socket(),
        "listening for learn requests"
    );

    let reaper = ChildReaper::arm()?;
    let shutdown = ShutdownFlag::register()?;
    let handler: Arc<dyn ConnectionHandler> = Arc::new(ForkingConnectionHandler::new(
        RequestHandler::new(config.learn_command().to_owned()),
    ));

    let result = listener.run(handler, shutdown.flag());
    reaper.disarm();
    drop(guard);
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    result.map_err(Into::into)
}
