//! Client connection configuration.

use std::time::Duration;

use crate::frame::PROTOCOL_VERSION;

/// Controls how a [`Client`](crate::Client) reaches its service.
///
/// The defaults match a service that is starting up concurrently with the
/// client: up to 200 connection attempts, 10 ms apart.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Protocol version offered in the handshake.
    /// Default: [`PROTOCOL_VERSION`]
    pub version: u16,
    /// Sleep between connection attempts.
    /// Default: 10 ms
    pub retry_interval: Duration,
    /// Maximum number of connection attempts before giving up.
    /// Default: 200
    pub max_attempts: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            retry_interval: Duration::from_millis(10),
            max_attempts: 200,
        }
    }
}

impl ConnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol version offered in the handshake.
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Set the sleep between connection attempts.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set the maximum number of connection attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.version, PROTOCOL_VERSION);
        assert_eq!(config.retry_interval, Duration::from_millis(10));
        assert_eq!(config.max_attempts, 200);
    }

    #[test]
    fn builders_chain() {
        let config = ConnectConfig::new()
            .with_version(3)
            .with_retry_interval(Duration::from_millis(1))
            .with_max_attempts(5);
        assert_eq!(config.version, 3);
        assert_eq!(config.retry_interval, Duration::from_millis(1));
        assert_eq!(config.max_attempts, 5);
    }
}
