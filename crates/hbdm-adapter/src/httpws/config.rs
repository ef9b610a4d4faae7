//! Stream connection configuration
//!
//! Delivery backpressure and decode-failure handling are explicit choices
//! here rather than hard-wired: a single receive loop serves every symbol on
//! a connection, so how it behaves when one consumer falls behind or one
//! message is malformed affects all of them.

use std::time::Duration;

use crate::error::StreamError;
use crate::{MARKET_WSS_ENDPOINT, NOTIFICATION_WSS_ENDPOINT};

/// Default per-symbol sink capacity
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// Default bound on a blocked delivery
pub const DEFAULT_DELIVERY_WAIT_SECS: u64 = 5;

/// Default read deadline; the exchange pings every few seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default write deadline
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default wait for the close handshake
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;

/// Default wait for the auth response on the notification channel
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

/// What the receive loop does when a sink is full
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Wait until the consumer makes room, however long that takes.
    /// A stalled consumer stalls every symbol and keepalive on the connection.
    Block,
    /// Wait up to the given duration, then drop the new event
    BlockFor(Duration),
    /// Evict the oldest queued event to make room
    DropOldest,
}

/// What the receive loop does with a malformed message for a routed method
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Report on the error feed and stop the connection
    #[default]
    Fatal,
    /// Log and drop the message, keep the connection
    Skip,
}

/// Stream connection configuration
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// WebSocket URL
    pub endpoint: String,
    /// Events buffered per symbol
    pub sink_capacity: usize,
    pub delivery: DeliveryPolicy,
    pub decode_failure: DecodeFailurePolicy,
    /// Read deadline (None = wait forever)
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Duration,
    pub close_timeout: Duration,
    /// Notification channel only: wait for the auth response before
    /// returning the client (None = send the frame and move on)
    pub auth_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::market()
    }
}

impl StreamConfig {
    /// Public market data channel defaults
    pub fn market() -> Self {
        Self {
            endpoint: MARKET_WSS_ENDPOINT.to_string(),
            sink_capacity: DEFAULT_SINK_CAPACITY,
            delivery: DeliveryPolicy::BlockFor(Duration::from_secs(DEFAULT_DELIVERY_WAIT_SECS)),
            decode_failure: DecodeFailurePolicy::Fatal,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            auth_timeout: None,
        }
    }

    /// Order notification channel defaults
    pub fn trade() -> Self {
        Self {
            endpoint: NOTIFICATION_WSS_ENDPOINT.to_string(),
            auth_timeout: Some(Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS)),
            ..Self::market()
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn with_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure = policy;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), StreamError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| StreamError::InvalidConfig(format!("endpoint: {}", e)))?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(StreamError::InvalidConfig(
                "endpoint must start with ws:// or wss://".to_string(),
            ));
        }

        if url.host_str().is_none() {
            return Err(StreamError::InvalidConfig("endpoint has no host".to_string()));
        }

        if self.sink_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "sink_capacity must be at least 1".to_string(),
            ));
        }

        if let DeliveryPolicy::BlockFor(wait) = self.delivery {
            if wait.is_zero() {
                return Err(StreamError::InvalidConfig(
                    "BlockFor wait must be non-zero, use DropOldest instead".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Host and path of the endpoint, as signed in the auth frame
    pub(crate) fn host_and_path(&self) -> Result<(String, String), StreamError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| StreamError::InvalidConfig(format!("endpoint: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| StreamError::InvalidConfig("endpoint has no host".to_string()))?;
        Ok((host.to_string(), url.path().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let market = StreamConfig::market();
        assert_eq!(market.endpoint, MARKET_WSS_ENDPOINT);
        assert_eq!(market.auth_timeout, None);
        assert_eq!(market.decode_failure, DecodeFailurePolicy::Fatal);
        assert!(matches!(market.delivery, DeliveryPolicy::BlockFor(_)));

        let trade = StreamConfig::trade();
        assert_eq!(trade.endpoint, NOTIFICATION_WSS_ENDPOINT);
        assert_eq!(trade.auth_timeout, Some(Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS)));
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::market()
            .with_endpoint("ws://127.0.0.1:9000/ws")
            .with_sink_capacity(8)
            .with_delivery(DeliveryPolicy::DropOldest)
            .with_decode_failure(DecodeFailurePolicy::Skip)
            .with_idle_timeout(None)
            .with_close_timeout(Duration::from_millis(200));

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.sink_capacity, 8);
        assert_eq!(config.delivery, DeliveryPolicy::DropOldest);
        assert_eq!(config.decode_failure, DecodeFailurePolicy::Skip);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.close_timeout, Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_rejects_bad_values() {
        assert!(StreamConfig::market().with_endpoint("").validate().is_err());
        assert!(StreamConfig::market().with_endpoint("https://api.hbdm.com/ws").validate().is_err());
        assert!(StreamConfig::market().with_sink_capacity(0).validate().is_err());
        assert!(StreamConfig::market()
            .with_delivery(DeliveryPolicy::BlockFor(Duration::ZERO))
            .validate()
            .is_err());
    }

    #[test]
    fn test_host_and_path() {
        let (host, path) = StreamConfig::trade().host_and_path().unwrap();
        assert_eq!(host, "api.hbdm.com");
        assert_eq!(path, "/notification");
    }
}
