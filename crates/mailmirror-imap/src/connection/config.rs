//! Server endpoint configuration.

use std::time::Duration;

/// Transport security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plain TCP. Only for local test servers.
    Plain,
    /// TLS from the first byte (port 993).
    #[default]
    Implicit,
}

impl Security {
    /// Well-known port for the mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plain => 143,
            Self::Implicit => 993,
        }
    }
}

/// Where and how to reach the IMAP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host name, also used for SNI and certificate checks.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Deadline for TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Deadline for any single server response outside IDLE.
    pub io_timeout: Duration,
}

impl Config {
    /// Implicit TLS on 993 with default timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            host: host.into(),
            port: None,
            security: Security::default(),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(120),
        }
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ConfigBuilder {
    /// Overrides the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-response deadline.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Finishes the builder. Without an explicit port the mode's default is used.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            host: self.host,
            security: self.security,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_implicit_tls() {
        let config = Config::new("imap.gmail.com");
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.address(), "imap.gmail.com:993");
    }

    #[test]
    fn plain_mode_port() {
        let config = Config::builder("localhost")
            .security(Security::Plain)
            .io_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.port, 143);
        assert_eq!(config.io_timeout, Duration::from_secs(5));
    }

    #[test]
    fn explicit_port_wins() {
        let config = Config::builder("localhost").port(10993).build();
        assert_eq!(config.port, 10993);
    }
}
