//! Result codes
//!
//! Numeric result codes exchanged with the server. The high bits encode the
//! severity: `0x0000` info, `0x4000` warning, `0x8000` error.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

const WARNING_BASE: u16 = 0x4000;
const ERROR_BASE: u16 = 0x8000;

/// Coarse severity of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Result code
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResultCode {
    Success = 0x0000,

    Warning = 0x4000,
    Underrun = 0x4001,
    Overflow = 0x4002,
    NotFound = 0x4003,
    NoAsync = 0x4004,

    Error = 0x8000,
    Usb = 0x8001,
    Malloc = 0x8002,
    MutexInit = 0x8003,
    MutexDestroy = 0x8004,
    MutexLock = 0x8005,
    MutexUnlock = 0x8006,
    ThreadStart = 0x8007,
    ThreadJoin = 0x8008,
    SocketInit = 0x8009,
    SocketConnect = 0x800a,
    Hostname = 0x800b,
    Connection = 0x800c,
    Timeout = 0x800d,
    Command = 0x800e,
    ServerInternal = 0x800f,
    Length = 0x8010,
    File = 0x8011,
    Duplicate = 0x8012,
    ReadOnly = 0x8013,
    DeviceNotVisible = 0x8014,
    DeviceInUse = 0x8015,
    DeviceInterface = 0x8016,
    DeviceConnectionTimeout = 0x8017,
    DeviceDifferentInterface = 0x8018,
    DeviceNeedsFwUpgrade = 0x8019,
    DataTypeMismatch = 0x801a,
    DeviceNotFound = 0x801b,
    NotSupported = 0x801c,
    TooManyConnections = 0x801d,
    NotOnHf2 = 0x801e,
}

impl ResultCode {
    pub fn severity(self) -> Severity {
        let raw: u16 = self.into();
        if raw >= ERROR_BASE {
            Severity::Error
        } else if raw >= WARNING_BASE {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    pub fn is_error(self) -> bool {
        self.severity() == Severity::Error
    }

    /// Convert an unknown raw code into its severity's general code.
    pub fn from_raw_lossy(raw: u16) -> Self {
        Self::try_from(raw).unwrap_or(if raw >= ERROR_BASE {
            ResultCode::Error
        } else if raw >= WARNING_BASE {
            ResultCode::Warning
        } else {
            ResultCode::Success
        })
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ResultCode::Success => "Success (no error)",
            ResultCode::Warning => "Warning (general)",
            ResultCode::Underrun => "FIFO underrun",
            ResultCode::Overflow => "FIFO overflow",
            ResultCode::NotFound => "Value or node not found",
            ResultCode::NoAsync => "Async command executed in sync mode",
            ResultCode::Error => "Error (general)",
            ResultCode::Usb => "USB communication failed",
            ResultCode::Malloc => "Memory allocation failed",
            ResultCode::MutexInit => "Unable to initialize mutex",
            ResultCode::MutexDestroy => "Unable to destroy mutex",
            ResultCode::MutexLock => "Mutex unable to lock",
            ResultCode::MutexUnlock => "Mutex unable to unlock",
            ResultCode::ThreadStart => "Error starting thread",
            ResultCode::ThreadJoin => "Error joining thread",
            ResultCode::SocketInit => "Can't initialize socket",
            ResultCode::SocketConnect => "Unable to connect socket",
            ResultCode::Hostname => "Hostname not found",
            ResultCode::Connection => "Connection invalid",
            ResultCode::Timeout => "Command timed out",
            ResultCode::Command => "Command failed internally",
            ResultCode::ServerInternal => "Command failed in server",
            ResultCode::Length => "Provided buffer is too small",
            ResultCode::File => "Can't open file or read from it",
            ResultCode::Duplicate => "There is already a similar entry",
            ResultCode::ReadOnly => "Attempt to set a read-only node",
            ResultCode::DeviceNotVisible => "Device is not visible to the server",
            ResultCode::DeviceInUse => "Device is already connected by a different server",
            ResultCode::DeviceInterface => "Device does not support the specified interface",
            ResultCode::DeviceConnectionTimeout => "Device connection timeout",
            ResultCode::DeviceDifferentInterface => {
                "Device already connected over a different interface"
            },
            ResultCode::DeviceNeedsFwUpgrade => "Device needs a firmware upgrade",
            ResultCode::DataTypeMismatch => "Event data type does not match the request",
            ResultCode::DeviceNotFound => "Device not found",
            ResultCode::NotSupported => "Command not supported",
            ResultCode::TooManyConnections => "Too many connections open",
            ResultCode::NotOnHf2 => "Command not supported on HF2 devices",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bases() {
        assert_eq!(ResultCode::Success.severity(), Severity::Info);
        assert_eq!(ResultCode::Overflow.severity(), Severity::Warning);
        assert_eq!(ResultCode::NotFound.severity(), Severity::Warning);
        assert_eq!(ResultCode::ReadOnly.severity(), Severity::Error);
        assert_eq!(ResultCode::NotOnHf2.severity(), Severity::Error);
    }

    #[test]
    fn test_raw_conversions() {
        assert_eq!(u16::from(ResultCode::Hostname), 0x800b);
        assert_eq!(ResultCode::try_from(0x801du16).ok(), Some(ResultCode::TooManyConnections));
        assert!(ResultCode::try_from(0x9999u16).is_err());
        assert_eq!(ResultCode::from_raw_lossy(0x9999), ResultCode::Error);
        assert_eq!(ResultCode::from_raw_lossy(0x4999), ResultCode::Warning);
        assert_eq!(ResultCode::from_raw_lossy(0x0042), ResultCode::Success);
    }

    #[test]
    fn test_descriptions_non_empty() {
        for raw in (0x8000u16..=0x801e).chain(0x4000..=0x4004) {
            let code = ResultCode::try_from(raw).unwrap();
            assert!(!code.description().is_empty());
        }
    }
}
