//! Directory connection configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Connection descriptor for a directory server.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory server hostname or IP address.
    pub host: String,

    /// Server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on a plain connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub connection_timeout_secs: u64,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

fn default_port() -> u16 {
    389
}

fn default_timeout_secs() -> u64 {
    30
}

impl DirectoryConfig {
    /// Create a new config with required fields.
    pub fn new(host: impl Into<String>, bind_dn: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            use_ssl: false,
            use_starttls: false,
            bind_dn: bind_dn.into(),
            bind_password: None,
            connection_timeout_secs: default_timeout_secs(),
        }
    }

    /// Set the bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS) and switch to port 636.
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Override the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                message: "host must not be empty".to_string(),
            });
        }
        if self.bind_dn.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                message: "bind DN must not be empty".to_string(),
            });
        }
        if self.use_ssl && self.use_starttls {
            return Err(ClientError::InvalidConfiguration {
                message: "SSL and STARTTLS are mutually exclusive".to_string(),
            });
        }
        Ok(())
    }

    /// Connection URL for the ldap3 transport.
    pub fn url(&self) -> String {
        if self.use_ssl {
            format!("ldaps://{}:{}", self.host, self.port)
        } else {
            format!("ldap://{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = DirectoryConfig::new("dc01.example.com", "cn=admin,dc=example,dc=com");
        assert_eq!(config.port, 389);
        assert_eq!(config.url(), "ldap://dc01.example.com:389");

        let config = config.with_ssl();
        assert_eq!(config.port, 636);
        assert_eq!(config.url(), "ldaps://dc01.example.com:636");
    }

    #[test]
    fn test_validation() {
        assert!(DirectoryConfig::new("", "cn=admin").validate().is_err());
        assert!(DirectoryConfig::new("host", "").validate().is_err());

        let mut config = DirectoryConfig::new("host", "cn=admin").with_ssl();
        config.use_starttls = true;
        assert!(config.validate().is_err());

        assert!(DirectoryConfig::new("host", "cn=admin").validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DirectoryConfig::new("host", "cn=admin").with_password("hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }
}
