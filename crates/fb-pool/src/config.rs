//! Pool configuration and connection options resolution.
//!
//! User input arrives as a [`Uri`]. The resolver turns its optional parts
//! into a complete [`ConnectionDescriptor`] and pool size. Resolution is
//! permissive: absent, falsy or wrongly typed values fall back to the
//! defaults instead of being rejected.

use std::fmt;
use std::time::Duration;

use fb_driver::ConnectionDescriptor;
use fb_driver::descriptor::DEFAULT_PAGE_SIZE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: u32 = 1;

/// Default for [`ConnectionOptions::lowercase_keys`].
pub const DEFAULT_LOWERCASE_KEYS: bool = true;

/// User-supplied connection options, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Options {
    /// Lowercase result column names.
    #[serde(default, deserialize_with = "lenient")]
    pub lowercase_keys: Option<bool>,

    /// SQL role to attach with.
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,

    /// Database page size.
    #[serde(
        default,
        rename = "pageSize",
        alias = "page_size",
        deserialize_with = "lenient"
    )]
    pub page_size: Option<i64>,
}

impl Options {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `lowercase_keys`.
    #[must_use]
    pub fn lowercase_keys(mut self, enabled: bool) -> Self {
        self.lowercase_keys = Some(enabled);
        self
    }

    /// Set the SQL role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// The public configuration surface consumed by [`Pool::new`](crate::Pool::new).
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Uri {
    /// Number of pooled connections.
    #[serde(default, deserialize_with = "lenient")]
    pub pool: Option<i64>,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database path or alias.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Connection options.
    #[serde(default, deserialize_with = "lenient")]
    pub options: Option<Options>,
}

impl Uri {
    /// Create a URI without pool size or options.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            pool: None,
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            options: None,
        }
    }

    /// Set the pool size.
    #[must_use]
    pub fn pool(mut self, size: i64) -> Self {
        self.pool = Some(size);
        self
    }

    /// Set the connection options.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse a URI from a JSON value.
    ///
    /// Connection fields (`host`, `port`, `database`, `user`, `password`)
    /// are required. `pool` and every option are coerced: a value of the
    /// wrong type counts as absent.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Parse a URI from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Resolve the pool size: `pool` if positive, else [`DEFAULT_POOL_SIZE`].
    #[must_use]
    pub fn resolved_pool_size(&self) -> u32 {
        self.pool
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Resolve the full connection descriptor.
    #[must_use]
    pub fn descriptor(&self) -> ConnectionDescriptor {
        let options = ConnectionOptions::resolve(self.options.as_ref());
        ConnectionDescriptor::new(
            self.host.clone(),
            self.port,
            self.database.clone(),
            self.user.clone(),
            self.password.clone(),
        )
        .lowercase_keys(options.lowercase_keys)
        .role(options.role)
        .page_size(options.page_size)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uri")
            .field("pool", &self.pool)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("options", &self.options)
            .finish()
    }
}

/// Fully-populated connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Lowercase result column names.
    pub lowercase_keys: bool,
    /// SQL role to attach with.
    pub role: Option<String>,
    /// Database page size.
    pub page_size: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            lowercase_keys: DEFAULT_LOWERCASE_KEYS,
            role: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ConnectionOptions {
    /// Fill in defaults for every option that is absent or unusable.
    ///
    /// An empty role and a non-positive page size count as absent. Unlike
    /// those, an explicit `lowercase_keys: false` is kept.
    #[must_use]
    pub fn resolve(options: Option<&Options>) -> Self {
        let Some(options) = options else {
            return Self::default();
        };
        Self {
            lowercase_keys: options.lowercase_keys.unwrap_or(DEFAULT_LOWERCASE_KEYS),
            role: options.role.clone().filter(|role| !role.is_empty()),
            page_size: options
                .page_size
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]`; use [`PoolConfig::new`],
/// [`PoolConfig::from_uri`] and the builder methods to construct it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Where and how every pooled connection attaches.
    pub descriptor: ConnectionDescriptor,

    /// Maximum number of simultaneously checked-out connections.
    pub size: u32,

    /// Default time to wait for a free connection. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a pool configuration of [`DEFAULT_POOL_SIZE`] connections.
    #[must_use]
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
        }
    }

    /// Resolve a configuration from a [`Uri`].
    #[must_use]
    pub fn from_uri(uri: &Uri) -> Self {
        Self::new(uri.descriptor()).size(uri.resolved_pool_size())
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Set the default acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::Configuration("size must be greater than 0".into()));
        }
        if self.descriptor.host.is_empty() {
            return Err(Error::Configuration("host must not be empty".into()));
        }
        Ok(())
    }
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
