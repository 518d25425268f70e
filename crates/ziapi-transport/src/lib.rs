//! # ziapi Transport Layer
//!
//! Transport abstraction between the client core and a Data Server.
//!
//! A [`Connector`] opens a session to an [`Endpoint`] and hands back the two
//! halves of the transport: an [`RxTransport`] owned by the driver's IO thread
//! and a [`TxTransport`] owned by the caller's thread.
//!
//! Backends:
//! - [`tcp::TcpConnector`]: length-prefixed frames over TCP
//! - [`sim::SimConnector`]: in-process loopback to a [`sim::SimServer`]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use ziapi_protocol::{ClientMessage, CodecError, ServerMessage};

pub mod sim;
pub mod tcp;

pub use sim::{SimConfig, SimConnector, SimDeviceConfig, SimNetwork, SimServer};
pub use tcp::TcpConnector;

/// Transport error
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Codec Error: {0}")]
    Codec(#[from] CodecError),
    #[error("Read timeout")]
    Timeout,
    #[error("Transport closed")]
    Closed,
}

/// Structured classification of connect-time failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    HostnameUnresolved,
    SocketInit,
    SocketConnect,
    Refused,
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// Server address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Default Data Server port for MF/UHF instruments
    pub const DEFAULT_PORT: u16 = 8004;
    /// Data Server port for HF2 instruments
    pub const HF2_PORT: u16 = 8005;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = TransportDeviceError;

    /// Parses `host:port`; a bare host uses [`Endpoint::DEFAULT_PORT`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportDeviceError::new(
                TransportDeviceErrorKind::HostnameUnresolved,
                "empty endpoint",
            ));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    TransportDeviceError::new(
                        TransportDeviceErrorKind::HostnameUnresolved,
                        format!("invalid port in {:?}", s),
                    )
                })?;
                Ok(Endpoint::new(host, port))
            },
            None => Ok(Endpoint::new(s, Self::DEFAULT_PORT)),
        }
    }
}

/// Receiving half (owned by the IO thread)
pub trait RxTransport: Send {
    /// Block up to `timeout` for the next message.
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrived and
    /// [`TransportError::Closed`] once the peer is gone.
    fn receive(&mut self, timeout: Duration) -> Result<ServerMessage, TransportError>;
}

/// Sending half (owned by the caller)
pub trait TxTransport: Send {
    fn send(&mut self, msg: ClientMessage) -> Result<(), TransportError>;

    /// Release the session; later sends fail with [`TransportError::Closed`].
    fn shutdown(&mut self) {}
}

/// Both halves of a freshly opened session
pub struct TransportPair {
    pub rx: Box<dyn RxTransport>,
    pub tx: Box<dyn TxTransport>,
}

impl fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportPair").finish_non_exhaustive()
    }
}

/// Opens transports to endpoints
///
/// Connectors are shared (`Arc<dyn Connector>`) so that modules can open
/// their own sessions to the endpoint of an existing connection.
pub trait Connector: Send + Sync + fmt::Debug {
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<TransportPair, TransportError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "127.0.0.1:8004".parse().unwrap();
        assert_eq!(ep, Endpoint::new("127.0.0.1", 8004));
        assert_eq!(ep.to_string(), "127.0.0.1:8004");

        let bare: Endpoint = "localhost".parse().unwrap();
        assert_eq!(bare.port, Endpoint::DEFAULT_PORT);

        let err = "host:notaport".parse::<Endpoint>().unwrap_err();
        assert_eq!(err.kind, TransportDeviceErrorKind::HostnameUnresolved);
        assert!("".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::SocketConnect,
            "refused",
        ));
        assert!(err.to_string().contains("SocketConnect"));
        assert_eq!(TransportError::Timeout.to_string(), "Read timeout");
    }
}
