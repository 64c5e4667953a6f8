//! Run configuration
//!
//! Plain settings consumed by the library. The binary fills them from
//! command line arguments, environment variables and a `.env` file.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::pool::PoolConfig;

pub const DEFAULT_PROTOCOL: &str = "IoTA-JSON";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// What a run does with the resolved catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Create,
    Delete,
    /// Print the catalog as markdown, no network access
    Markdown,
}

/// Base URLs of the platform services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub keystone: Url,
    pub context_broker: Url,
    pub iotagent: Url,
}

impl Endpoints {
    pub fn parse(
        keystone: &str,
        context_broker: &str,
        iotagent: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            keystone: parse_base("keystone", keystone)?,
            context_broker: parse_base("context broker", context_broker)?,
            iotagent: parse_base("iotagent", iotagent)?,
        })
    }

    pub fn auth_tokens(&self) -> String {
        join(&self.keystone, &["v3", "auth", "tokens"])
    }

    pub fn iot_services(&self) -> String {
        join(&self.iotagent, &["iot", "services"])
    }

    pub fn iot_devices(&self) -> String {
        join(&self.iotagent, &["iot", "devices"])
    }

    pub fn iot_device(&self, device_id: &str) -> String {
        join(&self.iotagent, &["iot", "devices", device_id])
    }

    pub fn batch_update(&self) -> String {
        join(&self.context_broker, &["v2", "op", "update"])
    }

    pub fn context_entity(&self, entity_id: &str) -> String {
        join(&self.context_broker, &["v2", "entities", entity_id])
    }
}

fn parse_base(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Appends percent-encoded path segments to a base URL
fn join(base: &Url, segments: &[&str]) -> String {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url.to_string()
}

/// Identity used for the token exchange
#[derive(Clone)]
pub struct Credentials {
    pub service: String,
    pub subservice: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service", &self.service)
            .field("subservice", &self.subservice)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    pub timeout: Duration,
    /// Accept invalid TLS certificates
    pub insecure: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Descriptor files or directories
    pub paths: Vec<PathBuf>,
    pub endpoints: Endpoints,
    pub credentials: Credentials,
    pub http: HttpOptions,
    pub pool: PoolConfig,
    /// Protocol for CSV rows without a protocol column
    pub default_protocol: String,
    pub mode: RunMode,
}

impl ProvisionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::Invalid {
                name: "path",
                reason: "at least one descriptor path is required".to_string(),
            });
        }
        if self.pool.pool_size == 0 {
            return Err(ConfigError::Zero("pool size"));
        }
        if self.pool.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk size"));
        }
        if !self.credentials.subservice.starts_with('/') {
            return Err(ConfigError::Invalid {
                name: "subservice",
                reason: format!("'{}' must start with '/'", self.credentials.subservice),
            });
        }
        if self.default_protocol.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "protocol",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
