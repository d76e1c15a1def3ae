use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tempfile::TempDir;

use salearnd_config::{Config, ConfigError, LogFormat};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        // Nightly currently marks environment mutation as unsafe while the API
        // stabilises, so mirror the pattern used in other tests.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        // Restore any previous value (or remove the override) so other tests
        // inherit a clean environment.
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

fn write_config(dir: &TempDir, contents: &str) -> OsString {
    let path = dir.path().join("salearnd.toml");
    fs::write(&path, contents).expect("write configuration file");
    path.into_os_string()
}

#[test]
fn file_layer_overrides_defaults() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let dir = TempDir::new().expect("create temp dir");
    let path = write_config(
        &dir,
        "daemon_socket = \"/tmp/file-layer.sock\"\nlearn_command = \"/opt/sa-learn\"\nlisten_backlog = 16\n",
    );

    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--config-path"),
        path,
    ];
    let config = Config::load_from_iter(args).expect("configuration should load");

    assert_eq!(config.daemon_socket().path(), "/tmp/file-layer.sock");
    assert_eq!(config.learn_command(), "/opt/sa-learn");
    assert_eq!(config.listen_backlog(), 16);
}

#[test]
fn environment_overrides_file() {
    let dir = TempDir::new().expect("create temp dir");
    let path = write_config(&dir, "daemon_socket = \"/tmp/from-file.sock\"\n");
    let _env = EnvOverride::set_var("SALEARND_DAEMON_SOCKET", OsStr::new("/tmp/from-env.sock"));

    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--config-path"),
        path,
    ];
    let config = Config::load_from_iter(args).expect("configuration should load");

    assert_eq!(config.daemon_socket().path(), "/tmp/from-env.sock");
}

#[test]
fn cli_overrides_environment() {
    let _env = EnvOverride::set_var("SALEARND_DAEMON_SOCKET", OsStr::new("/tmp/from-env.sock"));

    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--daemon-socket"),
        OsString::from("unix:///tmp/from-cli.sock"),
    ];
    let config = Config::load_from_iter(args).expect("configuration should load");

    assert_eq!(config.daemon_socket().path(), "/tmp/from-cli.sock");
}

#[test]
fn environment_can_select_config_file() {
    let dir = TempDir::new().expect("create temp dir");
    let path = write_config(&dir, "log_format = \"json\"\nlog_filter = \"debug\"\n");
    let _env = EnvOverride::set_var("SALEARND_CONFIG_PATH", &path);

    let config =
        Config::load_from_iter([OsString::from("salearnd")]).expect("configuration should load");

    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.log_filter(), "debug");
}

#[test]
fn missing_explicit_file_fails() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--config-path"),
        OsString::from("/nonexistent/salearnd.toml"),
    ];
    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(matches!(error, ConfigError::File { .. }));
}

#[test]
fn malformed_file_fails() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let dir = TempDir::new().expect("create temp dir");
    let path = write_config(&dir, "listen_backlog = not_a_number\n");

    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--config-path"),
        path,
    ];
    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(matches!(error, ConfigError::Parse { .. }));
}

#[test]
fn unknown_file_key_fails() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let dir = TempDir::new().expect("create temp dir");
    let path = write_config(&dir, "socket_mode = \"0660\"\n");

    let args = vec![
        OsString::from("salearnd"),
        OsString::from("--config-path"),
        path,
    ];
    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(matches!(error, ConfigError::Parse { .. }));
}
