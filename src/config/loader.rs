//! Configuration loading from disk.
//!
//! Loading only parses. Validation runs once command-line overrides have
//! been merged in, so a flag can repair a bad file value.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ProxyConfig;
use crate::config::validation::ValidationError;

/// File name looked up next to the executable when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "extproxy.json";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Toml(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "Parse error: {}", e),
            ConfigError::Toml(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Default location of the configuration file: next to the executable,
/// falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Parse a configuration document. `.toml` files are read as TOML,
/// everything else as JSON.
pub fn parse_config(path: &Path, content: &str) -> Result<ProxyConfig, ConfigError> {
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(content).map_err(ConfigError::Toml)
    } else {
        serde_json::from_str(content).map_err(ConfigError::Json)
    }
}

/// Read and parse a configuration file. The result is not validated.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(path, &content)
}

/// Load a file that is allowed to be absent or broken. On failure the
/// built-in defaults are returned along with the reason, for the caller to
/// log once logging is up.
pub fn load_or_fallback(path: &Path) -> (ProxyConfig, Option<ConfigError>) {
    match load_config(path) {
        Ok(config) => (config, None),
        Err(e) => (ProxyConfig::default(), Some(e)),
    }
}

/// Load configuration from `path`, or from the default location.
///
/// An explicit path must read and parse. The default location falls back
/// to built-in defaults. Neither is validated here.
pub fn load_or_default(path: Option<&Path>) -> Result<(ProxyConfig, Option<ConfigError>), ConfigError> {
    match path {
        Some(path) => Ok((load_config(path)?, None)),
        None => Ok(load_or_fallback(&default_config_path())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProxyType;
    use crate::config::validation::validate_config;
    use std::io::Write;

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"proxy_type": "fcgi", "listen": ":9001", "backend": "127.0.0.1:9000"}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.proxy_type, ProxyType::Fcgi);
        assert_eq!(config.listen, ":9001");
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "proxy_type = \"dummy\"\nlisten = \"127.0.0.1:0\"\n").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.proxy_type, ProxyType::Dummy);
    }

    #[test]
    fn rejects_unknown_proxy_type() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"proxy_type": "gopher"}}"#).unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::Json(_))));
    }

    #[test]
    fn validation_errors_are_reported() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"backend": "", "extensions": {{"enabled": ["a", "a"]}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(validate_config(&config).unwrap_err().len(), 2);
    }

    #[test]
    fn broken_fallback_file_uses_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();

        let (config, reason) = load_or_fallback(file.path());
        assert!(matches!(reason, Some(ConfigError::Json(_))));
        assert_eq!(config.listen, ProxyConfig::default().listen);
        assert!(config.extensions.enabled.is_empty());
    }

    #[test]
    fn invalid_values_survive_loading_for_later_overrides() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"proxy_type": "http", "backend": "/run/app.sock"}}"#).unwrap();

        let (mut config, reason) = load_or_fallback(file.path());
        assert!(reason.is_none());
        assert_eq!(config.backend, "/run/app.sock");
        assert!(validate_config(&config).is_err());

        config.backend = "http://127.0.0.1:3000".into();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            load_or_default(Some(&missing)),
            Err(ConfigError::Io(_))
        ));
    }
}
