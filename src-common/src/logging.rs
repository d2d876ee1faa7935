//! Where the console keeps its log files and configuration.

use std::path::PathBuf;

const APP_NAME: &str = "plotcam";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Fallback when no home directory can be determined (e.g. a bare service account).
fn fallback_dir() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/plotcam/logs` or `~/.local/state/plotcam/logs` |
/// | macOS | `~/Library/Logs/plotcam` |
/// | Other | `<data local dir>/plotcam/logs` |
pub fn log_dir() -> PathBuf {
    let Some(base) = project_dirs() else {
        return fallback_dir().join("logs");
    };

    #[cfg(target_os = "linux")]
    {
        base.state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs")
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir → ~/Library/Application Support/plotcam
        // parent         → ~/Library/Application Support
        // parent         → ~/Library
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        library.join("Logs").join(APP_NAME)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        base.data_local_dir().join("logs")
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<(), std::io::Error> {
    std::fs::create_dir_all(log_dir())
}

/// File name prefix of the console log. The daily appender adds the date
/// (e.g. `plotcam-console.log.2026-03-01`).
pub const CONSOLE_LOG_FILE: &str = "plotcam-console.log";

/// Returns the default location of the console configuration file.
pub fn config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| fallback_dir().join("config"))
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_app_scoped() {
        assert!(log_dir().to_string_lossy().contains(APP_NAME));
        assert_eq!(config_path().file_name().unwrap(), "config.json");
    }
}
