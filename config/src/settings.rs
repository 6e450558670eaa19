use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::{ConfigError, ENV_DELIVERY, ENV_ENDPOINT, ENV_TITLE_ID, ErrandConfig, expand_env_vars};

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How finished HTTP calls reach their callbacks. Fixed for the life of a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Callbacks are posted to the request queue's Completion port.
    #[default]
    Threaded,
    /// Callbacks wait in a FIFO until the caller pumps `update()`.
    Polled,
}

impl DeliveryMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Threaded => "threaded",
            Self::Polled => "polled",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" => Ok(Self::Threaded),
            "polled" => Ok(Self::Polled),
            _ => Err(ConfigError::InvalidDelivery(s.to_string())),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated service identity: which title, at which base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    title_id: String,
    endpoint: Url,
    allow_insecure_http: bool,
}

impl ServiceSettings {
    pub fn new(
        title_id: impl Into<String>,
        endpoint: &str,
        allow_insecure_http: bool,
    ) -> Result<Self, ConfigError> {
        let title_id = title_id.into();
        if title_id.is_empty() || !title_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidTitleId(title_id));
        }

        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            value: endpoint.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "https" => {}
            "http" if allow_insecure_http => {}
            "http" => return Err(invalid("plain http requires allow_insecure_http")),
            _ => return Err(invalid("scheme must be https")),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed"));
        }

        Ok(Self {
            title_id,
            endpoint: url,
            allow_insecure_http,
        })
    }

    #[must_use]
    pub fn title_id(&self) -> &str {
        &self.title_id
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn allow_insecure_http(&self) -> bool {
        self.allow_insecure_http
    }

    /// Absolute URL for an API path such as `/Client/LoginWithCustomID`.
    ///
    /// The path is appended to the endpoint, so an endpoint with a path prefix keeps it.
    pub fn full_url(&self, path: &str) -> Result<Url, ConfigError> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(ConfigError::InvalidPath(path.to_string()));
        }
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}")).map_err(|_| ConfigError::InvalidPath(path.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub delivery: DeliveryMode,
    pub connect_timeout: Duration,
    /// Whole-request timeout; `None` leaves it to the connect timeout and the server.
    pub request_timeout: Option<Duration>,
    pub allow_insecure_http: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: None,
            allow_insecure_http: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Everything a client needs, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub service: ServiceSettings,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn resolve(
    config: &ErrandConfig,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    let service = config.service.as_ref();
    let transport = config.transport.as_ref();
    let expand = |value: &String| expand_env_vars(value, lookup);

    let title_id = non_empty(lookup(ENV_TITLE_ID))
        .or_else(|| non_empty(service.and_then(|s| s.title_id.as_ref()).map(expand)))
        .ok_or(ConfigError::Missing("service.title_id"))?;
    let endpoint = non_empty(lookup(ENV_ENDPOINT))
        .or_else(|| non_empty(service.and_then(|s| s.endpoint.as_ref()).map(expand)))
        .ok_or(ConfigError::Missing("service.endpoint"))?;
    let allow_insecure_http = service.is_some_and(|s| s.allow_insecure_http);

    let service = ServiceSettings::new(title_id.trim(), endpoint.trim(), allow_insecure_http)?;

    let delivery = match non_empty(lookup(ENV_DELIVERY))
        .or_else(|| transport.and_then(|t| t.delivery.clone()))
    {
        Some(raw) => raw.parse()?,
        None => DeliveryMode::default(),
    };

    let connect_timeout = match transport.and_then(|t| t.connect_timeout_secs) {
        Some(0) => return Err(ConfigError::ZeroTimeout("transport.connect_timeout_secs")),
        Some(secs) => Duration::from_secs(secs),
        None => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
    };
    let request_timeout = match transport.and_then(|t| t.request_timeout_secs) {
        Some(0) => return Err(ConfigError::ZeroTimeout("transport.request_timeout_secs")),
        other => other.map(Duration::from_secs),
    };

    let filter = config
        .logging
        .as_ref()
        .and_then(|l| non_empty(l.filter.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    tracing::debug!(
        title_id = service.title_id(),
        endpoint = %service.endpoint(),
        %delivery,
        "Resolved configuration"
    );

    Ok(ResolvedConfig {
        service,
        transport: TransportConfig {
            delivery,
            connect_timeout,
            request_timeout,
            allow_insecure_http,
        },
        logging: LoggingConfig { filter },
    })
}
