//! Debug logging for the instrumentation driver.
//!
//! One build has many writers: the setup parent plus a short-lived
//! toolexec subprocess per compile command, all appending to the same
//! file named by OTEL_DEBUG_LOG. No file handle is held open; every
//! message opens the log in append mode and writes a single whole line
//! tagged with the writer's phase and process id, so concurrent shims
//! interleave lines instead of bytes and a crashed shim loses nothing
//! already written.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::constants::ENV_OTEL_DEBUG_LOG;

static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
static PHASE: OnceLock<&'static str> = OnceLock::new();

fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH
        .get_or_init(|| {
            std::env::var(ENV_OTEL_DEBUG_LOG)
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        })
        .as_ref()
}

/// Announce logging for this process and name it in every subsequent
/// line. The phase tag is what tells a setup line from the lines of the
/// many shim subprocesses sharing the file.
pub fn init(phase: &'static str) {
    let _ = PHASE.set(phase);
    if let Some(path) = log_path() {
        eprintln!("Debug logging enabled: {}", path.display());
    }
}

/// Log a debug message if debug logging is enabled
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        $crate::debug_log::log_message(&format!($($arg)*))
    };
}

/// Append one tagged line to the shared log. A write failure is dropped;
/// debug logging never fails a build.
pub fn log_message(msg: &str) {
    let Some(path) = log_path() else {
        return;
    };
    let phase = PHASE.get().copied().unwrap_or("driver");
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "[{}:{}] {}", phase, std::process::id(), msg);
    }
}
