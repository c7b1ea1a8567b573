//! Resolved connection target.

use std::fmt;

/// Default database page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// A fully-populated description of where and how to connect.
///
/// Built once by the pool's options resolver and shared, unchanged, with the
/// driver for the lifetime of the pool.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionDescriptor {
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
    /// Whether result column names are lowercased.
    pub lowercase_keys: bool,
    /// SQL role to attach with.
    pub role: Option<String>,
    /// Page size used when the driver creates a database.
    pub page_size: u32,
}

impl ConnectionDescriptor {
    /// Create a descriptor with default connection options.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            lowercase_keys: true,
            role: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set whether result column names are lowercased.
    #[must_use]
    pub fn lowercase_keys(mut self, enabled: bool) -> Self {
        self.lowercase_keys = enabled;
        self
    }

    /// Set the SQL role.
    #[must_use]
    pub fn role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Apply the `lowercase_keys` option to a column name.
    #[must_use]
    pub fn column_key(&self, name: &str) -> String {
        if self.lowercase_keys {
            name.to_lowercase()
        } else {
            name.to_owned()
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("lowercase_keys", &self.lowercase_keys)
            .field("role", &self.role)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Formats as a Firebird connection string, `host/port:database`.
impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("db.local", 3050, "/data/app.fdb", "SYSDBA", "masterkey")
    }

    #[test]
    fn test_new_uses_defaults() {
        let d = descriptor();
        assert!(d.lowercase_keys);
        assert_eq!(d.role, None);
        assert_eq!(d.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", descriptor());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("masterkey"));
    }

    #[test]
    fn test_display_connection_string() {
        assert_eq!(descriptor().to_string(), "db.local/3050:/data/app.fdb");
    }

    #[test]
    fn test_column_key() {
        assert_eq!(descriptor().column_key("COUNT"), "count");
        assert_eq!(descriptor().lowercase_keys(false).column_key("COUNT"), "COUNT");
    }
}
