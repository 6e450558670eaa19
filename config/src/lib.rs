//! Configuration for Errand.
//!
//! The file lives at `~/.errand/config.toml` (or any path handed to
//! [`ErrandConfig::load_from`]). Every section is optional; [`ErrandConfig::resolve`] applies
//! environment overrides and validates the result into [`ResolvedConfig`].
//!
//! ```toml
//! [service]
//! title_id = "E18D7"
//! endpoint = "https://e18d7.example.com"
//! allow_insecure_http = false
//!
//! [transport]
//! delivery = "threaded"
//! connect_timeout_secs = 30
//! request_timeout_secs = 60
//!
//! [logging]
//! filter = "info"
//! ```
//!
//! String values may reference environment variables as `${NAME}`.

mod settings;

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;

pub use settings::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DeliveryMode, LoggingConfig, ResolvedConfig,
    ServiceSettings, TransportConfig,
};

/// Environment variable overriding `[service] title_id`.
pub const ENV_TITLE_ID: &str = "ERRAND_TITLE_ID";
/// Environment variable overriding `[service] endpoint`.
pub const ENV_ENDPOINT: &str = "ERRAND_ENDPOINT";
/// Environment variable overriding `[transport] delivery`.
pub const ENV_DELIVERY: &str = "ERRAND_DELIVERY";

#[derive(Debug, Default, Deserialize)]
pub struct ErrandConfig {
    pub service: Option<ServiceSection>,
    pub transport: Option<TransportSection>,
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceSection {
    pub title_id: Option<String>,
    /// Base URL of the service; request paths are appended to it.
    pub endpoint: Option<String>,
    /// Permit `http://` endpoints. Only meant for local mock servers.
    #[serde(default)]
    pub allow_insecure_http: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportSection {
    pub delivery: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSection {
    pub filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid title id {0:?}: expected ASCII letters and digits")]
    InvalidTitleId(String),
    #[error("invalid endpoint {value:?}: {reason}")]
    InvalidEndpoint { value: String, reason: String },
    #[error("invalid request path {0:?}: must start with '/'")]
    InvalidPath(String),
    #[error("unknown delivery mode {0:?} (expected \"threaded\" or \"polled\")")]
    InvalidDelivery(String),
    #[error("`{0}` must be greater than zero")]
    ZeroTimeout(&'static str),
}

impl ConfigError {
    /// The file involved, for errors that came from reading or parsing one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl ErrandConfig {
    /// Load `~/.errand/config.toml`. `Ok(None)` when there is no home directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Apply process environment overrides and validate.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with(|name| env::var(name).ok())
    }

    /// Like [`Self::resolve`], reading overrides (and `${NAME}` references) through `lookup`.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        settings::resolve(self, &lookup)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".errand").join("config.toml"))
}

/// Replace `${NAME}` with the value `lookup` returns for `NAME` (empty when unset).
///
/// Unterminated references and `${}` are kept literally.
pub fn expand_env_vars<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ErrandConfig, expand_env_vars};
    use std::io;
    use std::path::{Path, PathBuf};

    fn vars(name: &str) -> Option<String> {
        match name {
            "A" => Some("alpha".into()),
            "B" => Some("beta".into()),
            "UNI" => Some("\u{1f980}".into()),
            _ => None,
        }
    }

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world", vars), "hello world");
    }

    #[test]
    fn expand_env_vars_replaces_and_defaults_to_empty() {
        assert_eq!(expand_env_vars("x ${A} y", vars), "x alpha y");
        assert_eq!(expand_env_vars("x ${MISSING} y", vars), "x  y");
        assert_eq!(expand_env_vars("${A}${B}", vars), "alphabeta");
        assert_eq!(expand_env_vars("crab ${UNI}!", vars), "crab \u{1f980}!");
    }

    #[test]
    fn expand_env_vars_keeps_malformed_references() {
        assert_eq!(expand_env_vars("test ${UNCLOSED", vars), "test ${UNCLOSED");
        assert_eq!(expand_env_vars("test ${} more", vars), "test ${} more");
    }

    #[test]
    fn empty_document_parses() {
        let config: ErrandConfig = toml::from_str("").unwrap();
        assert!(config.service.is_none());
        assert!(config.transport.is_none());
        assert!(config.logging.is_none());
    }

    #[test]
    fn config_error_path_accessor() {
        let path = PathBuf::from("/test/path");
        let err = ConfigError::Read {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.path(), Some(path.as_path()));

        let parse_err = ConfigError::Parse {
            path: path.clone(),
            source: toml::from_str::<ErrandConfig>("invalid toml [").unwrap_err(),
        };
        assert_eq!(parse_err.path(), Some(Path::new("/test/path")));
        assert_eq!(ConfigError::Missing("service.title_id").path(), None);
    }
}
