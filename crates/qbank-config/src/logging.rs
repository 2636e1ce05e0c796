//! Logging initialization for QBank binaries.
//!
//! Thin wrapper over the observability crate: compact stderr output plus an
//! optional JSONL file sink. `RUST_LOG` overrides the configured level.

use std::path::Path;

/// Initialize logging for the `qbank` binary.
///
/// Returns `false` if a subscriber was already installed or the log file
/// could not be opened (stderr logging still works in that case).
///
/// ```ignore
/// init_logging("info", Some(&paths.log_file()));
/// tracing::info!("started");
/// ```
pub fn init_logging(level: &str, log_path: Option<&Path>) -> bool {
    if let Some(parent) = log_path.and_then(Path::parent) {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create log directory {}: {err}", parent.display());
        }
    }

    observability::init_with_config(observability::LogConfig {
        service_name: "qbank".into(),
        default_level: level.into(),
        log_path: log_path.map(Path::to_path_buf),
        also_stderr: true,
    })
}
