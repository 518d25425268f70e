//! Connection-level errors and warnings

use std::fmt;
use thiserror::Error;
use ziapi_protocol::{PathError, ProtocolError, ResultCode, Severity};
use ziapi_transport::{TransportDeviceErrorKind, TransportError};

/// Why a session could not be opened or used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    HostnameUnresolved,
    SocketInitFailed,
    SocketConnectFailed,
    HandshakeTimeout,
    /// API level, implementation name or server version not compatible
    ProtocolMismatch,
    /// Session closed or never established
    NotConnected,
    TooManyConnections,
}

impl ConnectionErrorKind {
    pub fn code(self) -> ResultCode {
        match self {
            Self::HostnameUnresolved => ResultCode::Hostname,
            Self::SocketInitFailed => ResultCode::SocketInit,
            Self::SocketConnectFailed => ResultCode::SocketConnect,
            Self::HandshakeTimeout => ResultCode::Timeout,
            Self::ProtocolMismatch | Self::NotConnected => ResultCode::Connection,
            Self::TooManyConnections => ResultCode::TooManyConnections,
        }
    }
}

/// Client API error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Connection error ({kind:?}): {detail}")]
    Connection {
        kind: ConnectionErrorKind,
        detail: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Allocation, thread or file failure on the client side
    #[error("Resource error: {detail}")]
    Resource { detail: String },

    #[error("Node is read-only: {path}")]
    ReadOnly { path: String },

    #[error("Node not found: {path}")]
    NotFound { path: String },

    #[error("Operation timeout: {operation}")]
    Timeout { operation: String },

    #[error("Invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// Server-reported failure without a dedicated variant
    #[error("Server error {code:?}: {message}")]
    Server { code: ResultCode, message: String },

    #[error("{message}")]
    General { message: String },
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Resource,
    Permission,
    NotFound,
    Timeout,
    InvalidState,
    Device,
    General,
}

impl ErrorKind {
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::NotFound => Severity::Warning,
            _ => Severity::Error,
        }
    }

    fn of_code(code: ResultCode) -> Self {
        use ResultCode::*;
        match code {
            Hostname | SocketInit | SocketConnect | Connection | TooManyConnections => {
                ErrorKind::Connection
            },
            Command | ServerInternal | DataTypeMismatch | NotSupported | NotOnHf2 => {
                ErrorKind::Protocol
            },
            Malloc | Length | File | Usb | MutexInit | MutexDestroy | MutexLock | MutexUnlock
            | ThreadStart | ThreadJoin => ErrorKind::Resource,
            ReadOnly => ErrorKind::Permission,
            NotFound => ErrorKind::NotFound,
            Timeout => ErrorKind::Timeout,
            DeviceNotVisible | DeviceInUse | DeviceInterface | DeviceConnectionTimeout
            | DeviceDifferentInterface | DeviceNeedsFwUpgrade | DeviceNotFound => ErrorKind::Device,
            _ => ErrorKind::General,
        }
    }
}

impl ApiError {
    pub fn connection(kind: ConnectionErrorKind, detail: impl Into<String>) -> Self {
        ApiError::Connection {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_connected(operation: &str) -> Self {
        Self::connection(
            ConnectionErrorKind::NotConnected,
            format!("{}: session is closed", operation),
        )
    }

    pub fn invalid_state(operation: impl Into<String>, state: impl fmt::Debug) -> Self {
        ApiError::InvalidState {
            operation: operation.into(),
            state: format!("{:?}", state),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        ApiError::General {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Connection { .. } => ErrorKind::Connection,
            ApiError::Protocol(_) => ErrorKind::Protocol,
            ApiError::Resource { .. } => ErrorKind::Resource,
            ApiError::ReadOnly { .. } => ErrorKind::Permission,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::InvalidState { .. } => ErrorKind::InvalidState,
            ApiError::Server { code, .. } => ErrorKind::of_code(*code),
            ApiError::General { .. } => ErrorKind::General,
        }
    }

    /// Numeric result code of this error.
    pub fn code(&self) -> ResultCode {
        match self {
            ApiError::Connection { kind, .. } => kind.code(),
            ApiError::Protocol(err) => match err {
                ProtocolError::TypeMismatch { .. } => ResultCode::DataTypeMismatch,
                ProtocolError::MalformedCommand(_) | ProtocolError::Codec(_) => {
                    ResultCode::Command
                },
                ProtocolError::ServerInternal(_) | ProtocolError::UnexpectedReply(_) => {
                    ResultCode::ServerInternal
                },
                ProtocolError::NotSupported(_) => ResultCode::NotSupported,
                ProtocolError::Length { .. } => ResultCode::Length,
            },
            ApiError::Resource { .. } => ResultCode::Length,
            ApiError::ReadOnly { .. } => ResultCode::ReadOnly,
            ApiError::NotFound { .. } => ResultCode::NotFound,
            ApiError::Timeout { .. } => ResultCode::Timeout,
            ApiError::InvalidState { .. } => ResultCode::Command,
            ApiError::Server { code, .. } => *code,
            ApiError::General { .. } => ResultCode::Error,
        }
    }

    /// Map a server-reported failure back to an error.
    pub fn from_reply(code: ResultCode, message: String, path: Option<&str>) -> Self {
        let path = path.map(str::to_string).unwrap_or_else(|| message.clone());
        match code {
            ResultCode::NotFound => ApiError::NotFound { path },
            ResultCode::ReadOnly => ApiError::ReadOnly { path },
            ResultCode::Timeout => ApiError::Timeout { operation: message },
            ResultCode::Connection => {
                Self::connection(ConnectionErrorKind::NotConnected, message)
            },
            ResultCode::TooManyConnections => {
                Self::connection(ConnectionErrorKind::TooManyConnections, message)
            },
            ResultCode::Command => ApiError::Protocol(ProtocolError::MalformedCommand(message)),
            ResultCode::ServerInternal => ApiError::Protocol(ProtocolError::ServerInternal(message)),
            ResultCode::NotSupported => ApiError::Protocol(ProtocolError::NotSupported(message)),
            code => ApiError::Server { code, message },
        }
    }
}

impl From<PathError> for ApiError {
    fn from(err: PathError) -> Self {
        ApiError::Protocol(ProtocolError::MalformedCommand(err.to_string()))
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Device(e) => {
                let kind = match e.kind {
                    TransportDeviceErrorKind::HostnameUnresolved => {
                        ConnectionErrorKind::HostnameUnresolved
                    },
                    TransportDeviceErrorKind::SocketInit => ConnectionErrorKind::SocketInitFailed,
                    TransportDeviceErrorKind::SocketConnect
                    | TransportDeviceErrorKind::Refused
                    | TransportDeviceErrorKind::Unknown => ConnectionErrorKind::SocketConnectFailed,
                };
                Self::connection(kind, e.message)
            },
            TransportError::Io(e) => Self::connection(ConnectionErrorKind::SocketConnectFailed, e.to_string()),
            TransportError::Codec(e) => ApiError::Protocol(e.into()),
            TransportError::Timeout => ApiError::Timeout {
                operation: "transport".into(),
            },
            TransportError::Closed => Self::not_connected("transport"),
        }
    }
}

/// Non-fatal condition returned next to a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    /// Nothing matched (e.g. empty node listing)
    NotFound,
    /// Events were dropped since the last poll
    Overflow { dropped: u64 },
    /// Async command executed synchronously (API level below 4)
    NoAsync,
    Underrun,
}

impl Warning {
    pub fn code(self) -> ResultCode {
        match self {
            Warning::NotFound => ResultCode::NotFound,
            Warning::Overflow { .. } => ResultCode::Overflow,
            Warning::NoAsync => ResultCode::NoAsync,
            Warning::Underrun => ResultCode::Underrun,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Overflow { dropped } => write!(f, "Overflow: {} events dropped", dropped),
            other => f.write_str(other.code().description()),
        }
    }
}

/// A value plus an optional warning
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub warning: Option<Warning>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    pub fn warn(value: T, warning: Warning) -> Self {
        Self {
            value,
            warning: Some(warning),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warning: self.warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziapi_protocol::ValueType;
    use ziapi_transport::TransportDeviceError;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::NotFound {
            path: "/dev1/nope".into(),
        };
        assert_eq!(err.to_string(), "Node not found: /dev1/nope");

        let err = ApiError::not_connected("poll");
        let msg = err.to_string();
        assert!(msg.contains("NotConnected") && msg.contains("poll"), "{}", msg);

        let err = ApiError::Protocol(ProtocolError::TypeMismatch {
            expected: ValueType::Double,
            actual: ValueType::String,
        });
        assert!(err.to_string().starts_with("Protocol error"));
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            ApiError::NotFound { path: "/x".into() }.kind().severity(),
            Severity::Warning
        );
        assert_eq!(
            ApiError::ReadOnly { path: "/x".into() }.kind().severity(),
            Severity::Error
        );
        assert_eq!(ApiError::general("boom").kind(), ErrorKind::General);
    }

    #[test]
    fn test_codes_round_trip_through_replies() {
        for code in [
            ResultCode::NotFound,
            ResultCode::ReadOnly,
            ResultCode::Timeout,
            ResultCode::TooManyConnections,
            ResultCode::Command,
            ResultCode::ServerInternal,
            ResultCode::NotSupported,
            ResultCode::DataTypeMismatch,
            ResultCode::DeviceInUse,
        ] {
            let err = ApiError::from_reply(code, "detail".into(), Some("/dev1/x"));
            assert_eq!(err.code(), code, "{:?}", err);
        }
        let err = ApiError::from_reply(ResultCode::DeviceNotFound, "dev9".into(), None);
        assert_eq!(err.kind(), ErrorKind::Device);
    }

    #[test]
    fn test_from_transport_error() {
        let err: ApiError = TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::HostnameUnresolved,
            "nohost",
        ))
        .into();
        assert!(matches!(
            err,
            ApiError::Connection {
                kind: ConnectionErrorKind::HostnameUnresolved,
                ..
            }
        ));
        let err: ApiError = TransportError::Closed.into();
        assert_eq!(err.code(), ResultCode::Connection);
    }

    #[test]
    fn test_outcome() {
        let out = Outcome::warn(3, Warning::Overflow { dropped: 2 });
        assert_eq!(out.clone().map(|v| v * 2).value, 6);
        assert_eq!(out.warning.map(Warning::code), Some(ResultCode::Overflow));
        assert!(Outcome::ok(()).warning.is_none());
        assert!(Warning::Overflow { dropped: 2 }.to_string().contains('2'));
    }
}
