//! End-to-end tests driving the daemon binary against a stub learn command.
//!
//! Each test launches the real binary in foreground mode inside a scratch
//! directory. The configured learn command is a shell stub that records its
//! argument vector and standard input, which is exactly what the daemon
//! promises to deliver to the real trainer.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const OUTPUT_TIMEOUT: Duration = Duration::from_secs(5);

const DAEMON_ENV_VARS: [&str; 7] = [
    "SALEARND_CONFIG_PATH",
    "SALEARND_DAEMON_SOCKET",
    "SALEARND_LEARN_COMMAND",
    "SALEARND_LISTEN_BACKLOG",
    "SALEARND_LOG_FILE",
    "SALEARND_LOG_FILTER",
    "SALEARND_LOG_FORMAT",
];

struct DaemonHarness {
    _dir: TempDir,
    socket: PathBuf,
    stub: PathBuf,
    out_dir: PathBuf,
    log: PathBuf,
}

impl DaemonHarness {
    fn new() -> Self {
        let dir = TempDir::new().expect("create scratch dir");
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).expect("create output dir");

        // The body is drained first and the argv file is renamed into place
        // last, so an `.argv` file signals one fully recorded invocation.
        let stub = dir.path().join("learn-stub.sh");
        let script = format!(
            "#!/bin/sh\nout=\"{}/$$\"\ncat > \"$out.body\"\nprintf '%s\\n' \"$@\" > \"$out.argv.tmp\"\nmv \"$out.argv.tmp\" \"$out.argv\"\n",
            out_dir.display()
        );
        fs::write(&stub, script).expect("write stub script");
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755))
            .expect("mark stub executable");

        Self {
            socket: dir.path().join("run").join("salearnd.sock"),
            stub,
            out_dir,
            log: dir.path().join("salearnd.log"),
            _dir: dir,
        }
    }

    fn spawn_daemon(&self) -> RunningDaemon {
        let mut command = Command::new(env!("CARGO_BIN_EXE_salearnd"));
        for key in DAEMON_ENV_VARS {
            command.env_remove(key);
        }
        let child = command
            .arg("--daemon-socket")
            .arg(&self.socket)
            .arg("--learn-command")
            .arg(&self.stub)
            .arg("--log-file")
            .arg(&self.log)
            .arg("--log-filter")
            .arg("debug")
            .arg("--listen-backlog")
            .arg("32")
            .env("SALEARND_FOREGROUND", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        let daemon = RunningDaemon { child };
        self.wait_until_ready();
        daemon
    }

    fn wait_until_ready(&self) {
        let deadline = Instant::now() + READY_TIMEOUT;
        while Instant::now() < deadline {
            if UnixStream::connect(&self.socket).is_ok() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("daemon never started listening on {}", self.socket.display());
    }

    fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket).expect("connect to daemon")
    }

    /// Collects `(argv lines, body)` pairs recorded by the stub.
    fn outputs(&self) -> Vec<(Vec<String>, Vec<u8>)> {
        let mut results = Vec::new();
        let entries = match fs::read_dir(&self.out_dir) {
            Ok(entries) => entries,
            Err(_) => return results,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("argv") {
                continue;
            }
            let Ok(argv_text) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(body) = fs::read(path.with_extension("body")) else {
                continue;
            };
            let argv = argv_text.lines().map(str::to_owned).collect();
            results.push((argv, body));
        }
        results
    }

    fn wait_for_outputs(&self, expected: usize) -> Vec<(Vec<String>, Vec<u8>)> {
        let deadline = Instant::now() + OUTPUT_TIMEOUT;
        loop {
            let outputs = self.outputs();
            if outputs.len() >= expected {
                return outputs;
            }
            if Instant::now() >= deadline {
                panic!(
                    "expected {expected} learn invocations, saw {}",
                    outputs.len()
                );
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

struct RunningDaemon {
    child: Child,
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn forwards_spam_request_with_body() {
    let harness = DaemonHarness::new();
    let _daemon = harness.spawn_daemon();

    let mut stream = harness.connect();
    stream
        .write_all(b"SPAM alice\nSubject: buy now\n\nbody line\n")
        .expect("write request");
    drop(stream);

    let outputs = harness.wait_for_outputs(1);
    let (argv, body) = &outputs[0];
    assert_eq!(argv, &["--spam", "-u", "alice", "-"]);
    assert_eq!(body, b"Subject: buy now\n\nbody line\n");
}

#[test]
fn mode_token_is_case_insensitive() {
    let harness = DaemonHarness::new();
    let _daemon = harness.spawn_daemon();

    let mut stream = harness.connect();
    stream.write_all(b"hAm Bob\n").expect("write request");
    drop(stream);

    let outputs = harness.wait_for_outputs(1);
    let (argv, body) = &outputs[0];
    assert_eq!(argv, &["--ham", "-u", "Bob", "-"]);
    assert!(body.is_empty());
}

#[test]
fn body_survives_delayed_partial_writes() {
    let harness = DaemonHarness::new();
    let _daemon = harness.spawn_daemon();

    let mut stream = harness.connect();
    stream.write_all(b"ham carol\n").expect("write header");
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"first chunk / ").expect("write first chunk");
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"second chunk").expect("write second chunk");
    drop(stream);

    let outputs = harness.wait_for_outputs(1);
    let (_, body) = &outputs[0];
    assert_eq!(body, b"first chunk / second chunk");
}

#[test]
fn invalid_requests_spawn_nothing_and_leave_daemon_serving() {
    let harness = DaemonHarness::new();
    let _daemon = harness.spawn_daemon();

    let mut missing_user = harness.connect();
    missing_user.write_all(b"SPAM\n").expect("write header");
    drop(missing_user);

    let mut bad_mode = harness.connect();
    bad_mode
        .write_all(b"FORWARD alice\nbody\n")
        .expect("write header");
    drop(bad_mode);

    // The daemon must still serve valid clients afterwards.
    let mut valid = harness.connect();
    valid.write_all(b"spam dave\n").expect("write header");
    drop(valid);

    let outputs = harness.wait_for_outputs(1);
    assert_eq!(outputs.len(), 1, "rejected requests must not spawn");
    assert_eq!(outputs[0].0, &["--spam", "-u", "dave", "-"]);
}

#[test]
fn concurrent_connections_spawn_independently() {
    let harness = DaemonHarness::new();
    let daemon = harness.spawn_daemon();

    let clients: Vec<_> = (0..16)
        .map(|index| {
            let socket = harness.socket.clone();
            thread::spawn(move || {
                let mut stream = UnixStream::connect(&socket).expect("connect client");
                let request = format!("SPAM user{index}\nmessage {index}\n");
                stream.write_all(request.as_bytes()).expect("write request");
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread");
    }

    let outputs = harness.wait_for_outputs(16);
    for (argv, body) in &outputs {
        let user = argv.get(2).expect("argv should hold a user token");
        let index = user.strip_prefix("user").expect("user token shape");
        assert_eq!(argv[0], "--spam");
        assert_eq!(body, format!("message {index}\n").as_bytes());
    }

    // Finished children must not linger as zombies under the daemon.
    let daemon_pid = daemon.child.id();
    let deadline = Instant::now() + OUTPUT_TIMEOUT;
    while Instant::now() < deadline && zombie_children_of(daemon_pid) > 0 {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(zombie_children_of(daemon_pid), 0, "children must be reaped");
}

#[test]
fn restart_rebinds_over_stale_socket() {
    let harness = DaemonHarness::new();
    let first = harness.spawn_daemon();

    // Hard-kill the first daemon so its socket, lock, and pid files remain.
    drop(first);
    assert!(harness.socket.exists(), "stale socket file should remain");

    let _second = harness.spawn_daemon();
    let mut stream = harness.connect();
    stream.write_all(b"ham erin\n").expect("write request");
    drop(stream);

    let outputs = harness.wait_for_outputs(1);
    assert_eq!(outputs[0].0, &["--ham", "-u", "erin", "-"]);
}

#[test]
fn fatal_startup_failure_exits_nonzero_without_binding() {
    let harness = DaemonHarness::new();

    // A regular file where the socket directory should go makes directory
    // creation impossible.
    let blocker = harness._dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").expect("write blocker file");
    let socket = blocker.join("run").join("salearnd.sock");

    let mut command = Command::new(env!("CARGO_BIN_EXE_salearnd"));
    for key in DAEMON_ENV_VARS {
        command.env_remove(key);
    }
    let output = command
        .arg("--daemon-socket")
        .arg(&socket)
        .arg("--learn-command")
        .arg(&harness.stub)
        .env("SALEARND_FOREGROUND", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("run daemon");

    assert!(!output.status.success(), "startup must fail");
    assert!(!socket.exists(), "no socket may be left behind");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to prepare daemon socket"),
        "fatal error should be reported, got: {stderr}"
    );
}

fn zombie_children_of(parent: u32) -> usize {
    let mut zombies = 0;
    let Ok(entries) = fs::read_dir("/proc") else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 3 && fields[2] == "Z" && fields[3] == parent.to_string() {
            zombies += 1;
        }
    }
    zombies
}
