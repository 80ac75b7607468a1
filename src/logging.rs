// src/logging.rs
//
// Operator-facing logging. The receive and transmit sides are meant to run
// unattended next to a data diode, so the only audit trail is a flat log
// file: every SEVERE entry is appended to `./logfile.txt`, one line per
// entry, prefixed with a local date/time. Informational entries (startup,
// reconnects, shutdown) only go to stderr unless `--log-info` is passed.

use std::path::Path;
use std::sync::Mutex;

/// Global log file handle. `None` until `init_file_logging` runs.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Whether informational entries should also be appended to the log file.
pub(crate) static LOG_INFO_TO_FILE: Mutex<bool> = Mutex::new(false);

/// Open (or create) `logfile.txt` in `dir` for appending.
pub fn init(dir: &Path, log_info: bool) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create log dir: {}", e))?;

    let log_path = dir.join("logfile.txt");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("failed to open {}: {}", log_path.display(), e))?;

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    if let Ok(mut guard) = LOG_INFO_TO_FILE.lock() {
        *guard = log_info;
    }

    eprintln!(
        "{} [logging] file logging started: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(())
}

#[doc(hidden)]
pub fn info_to_file() -> bool {
    LOG_INFO_TO_FILE.lock().map(|g| *g).unwrap_or(false)
}

#[doc(hidden)]
pub fn write_line(msg: &str) {
    use std::io::Write as _;
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut f) = *guard {
            let _ = writeln!(f, "{}", msg);
        }
    }
}

/// SEVERE-level log entry. Always goes to stderr and `logfile.txt`.
macro_rules! severe {
    ($($arg:tt)*) => {{
        let msg = format!(
            "{} SEVERE {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            format_args!($($arg)*)
        );
        eprintln!("{}", msg);
        $crate::logging::write_line(&msg);
    }};
}

/// Informational log entry. Stderr always; the file only when `--log-info`
/// was passed at startup.
macro_rules! info {
    ($($arg:tt)*) => {{
        let msg = format!(
            "{} INFO   {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            format_args!($($arg)*)
        );
        eprintln!("{}", msg);
        if $crate::logging::info_to_file() {
            $crate::logging::write_line(&msg);
        }
    }};
}

pub use {info, severe};
