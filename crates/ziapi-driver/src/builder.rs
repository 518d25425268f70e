//! Chained construction of a [`Connection`]

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{ApiError, ConnectionErrorKind};
use crate::queue::OverflowPolicy;
use std::sync::Arc;
use std::time::Duration;
use ziapi_protocol::{ApiLevel, DEFAULT_IMPLEMENTATION};
use ziapi_transport::{Connector, Endpoint, TcpConnector};

/// Connection builder
///
/// # Example
///
/// ```no_run
/// use ziapi_driver::{ConnectionBuilder, OverflowPolicy};
/// use ziapi_protocol::ApiLevel;
///
/// let conn = ConnectionBuilder::new()
///     .host("192.168.1.10", 8004)
///     .api_level(ApiLevel::V6)
///     .queue_capacity(4096)
///     .overflow_policy(OverflowPolicy::DropNewest)
///     .open()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct ConnectionBuilder {
    endpoint: Endpoint,
    connector: Option<Arc<dyn Connector>>,
    api_level: Result<ApiLevel, u8>,
    implementation: String,
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Defaults: `localhost:8004`, TCP, API level 6.
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::localhost(Endpoint::DEFAULT_PORT),
            connector: None,
            api_level: Ok(ApiLevel::MAX),
            implementation: DEFAULT_IMPLEMENTATION.to_string(),
            config: ConnectionConfig::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoint = Endpoint::new(host, port);
        self
    }

    /// Transport backend (default: TCP).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn api_level(mut self, level: ApiLevel) -> Self {
        self.api_level = Ok(level);
        self
    }

    /// API level as a raw number; unknown levels fail at [`open`](Self::open)
    /// with [`ConnectionErrorKind::ProtocolMismatch`].
    pub fn api_level_raw(mut self, level: u8) -> Self {
        self.api_level = ApiLevel::try_from(level).map_err(|_| level);
        self
    }

    pub fn implementation(mut self, name: impl Into<String>) -> Self {
        self.implementation = name.into();
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Connect and perform the handshake.
    pub fn open(self) -> Result<Connection, ApiError> {
        let api_level = self.api_level.map_err(|raw| {
            ApiError::connection(
                ConnectionErrorKind::ProtocolMismatch,
                format!("unsupported API level {} (max {})", raw, ApiLevel::MAX),
            )
        })?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));
        Connection::establish(
            self.endpoint,
            connector,
            api_level,
            self.implementation,
            self.config,
        )
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ConnectionBuilder::new();
        assert_eq!(builder.endpoint, Endpoint::localhost(8004));
        assert_eq!(builder.api_level, Ok(ApiLevel::V6));
        assert!(builder.connector.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let builder = ConnectionBuilder::new()
            .host("10.0.0.2", 8005)
            .api_level(ApiLevel::V1)
            .queue_capacity(8)
            .request_timeout(Duration::from_millis(100));
        assert_eq!(builder.endpoint.port, 8005);
        assert_eq!(builder.config.queue_capacity, 8);
        assert_eq!(builder.config.request_timeout_ms, 100);
    }

    #[test]
    fn test_unsupported_level_rejected_before_connecting() {
        for raw in [0u8, 2, 7, 99] {
            let err = ConnectionBuilder::new().api_level_raw(raw).open().unwrap_err();
            assert!(
                matches!(
                    err,
                    ApiError::Connection {
                        kind: ConnectionErrorKind::ProtocolMismatch,
                        ..
                    }
                ),
                "{}: {:?}",
                raw,
                err
            );
        }
    }
}
