//! Configuration file resolution and TOML loading
//!
//! Config files are located in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/mpe/<file_name>`)
//! 4. System-wide `/etc/mpe/<file_name>` (Linux only)
//!
//! When none of these exist the caller falls back to built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name used under the platform config directory
pub const APP_DIR: &str = "mpe";

/// Resolve the configuration file path.
///
/// Explicit sources (CLI argument, environment variable) are returned even if
/// the file does not exist, so that a typo surfaces as a load error instead of
/// silently falling back to defaults. Implicit locations are only returned
/// when present on disk.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(path) = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name)) {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
}

/// Load `T` from `path`, or return `T::default()` when no path was resolved
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        debug!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    info!("Loaded configuration from {}", path.display());
    parse_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        port: u16,
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins_over_env() {
        std::env::set_var("MPE_TEST_CONFIG", "/from/env.toml");
        let path = resolve_config_path(
            Some(Path::new("/from/cli.toml")),
            "MPE_TEST_CONFIG",
            "player.toml",
        );
        std::env::remove_var("MPE_TEST_CONFIG");
        assert_eq!(path, Some(PathBuf::from("/from/cli.toml")));
    }

    #[test]
    #[serial]
    fn test_env_used_when_no_cli_argument() {
        std::env::set_var("MPE_TEST_CONFIG", "/from/env.toml");
        let path = resolve_config_path(None, "MPE_TEST_CONFIG", "player.toml");
        std::env::remove_var("MPE_TEST_CONFIG");
        assert_eq!(path, Some(PathBuf::from("/from/env.toml")));
    }

    #[test]
    fn test_load_missing_path_returns_default() {
        let sample: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 6000").unwrap();
        let sample: Sample = load_toml_or_default(Some(file.path())).unwrap();
        assert_eq!(sample.port, 6000);
    }

    #[test]
    fn test_load_unreadable_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let result: Result<Sample> = load_toml_or_default(Some(&missing));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result: Result<Sample> = parse_toml("port = [");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
