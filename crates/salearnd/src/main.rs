use std::process::ExitCode;

fn main() -> ExitCode {
    match salearnd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed yet (or already points at the
            // null device); stderr is the inherited reporting channel.
            eprintln!("salearnd: {error}");
            ExitCode::FAILURE
        }
    }
}
