//! Client layer errors

use crate::module::{ModuleKind, ModuleState};
use crate::storage::StorageError;
use thiserror::Error;
use ziapi_driver::ApiError;
use ziapi_protocol::ResultCode;

/// Module engine error
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Failure of the module's session
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{operation} not allowed while module is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ModuleState,
    },

    #[error("{kind} module does not support {operation}")]
    NotSupported {
        kind: ModuleKind,
        operation: &'static str,
    },

    #[error("Unknown module parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to start module worker: {0}")]
    Spawn(String),

    #[error("Module task panicked: {0}")]
    Panicked(String),
}

impl ModuleError {
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        ModuleError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// ziAPI result code of this error
    pub fn code(&self) -> ResultCode {
        match self {
            ModuleError::Api(e) => e.code(),
            ModuleError::InvalidState { .. } | ModuleError::InvalidParameter { .. } => {
                ResultCode::Command
            },
            ModuleError::NotSupported { .. } => ResultCode::NotSupported,
            ModuleError::UnknownParameter { .. } => ResultCode::NotFound,
            ModuleError::Storage(_) => ResultCode::File,
            ModuleError::Spawn(_) => ResultCode::ThreadStart,
            ModuleError::Panicked(_) => ResultCode::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziapi_driver::ConnectionErrorKind;

    #[test]
    fn test_display() {
        let err = ModuleError::InvalidState {
            operation: "set_parameter",
            state: ModuleState::Executing,
        };
        assert_eq!(err.to_string(), "set_parameter not allowed while module is Executing");

        let err = ModuleError::NotSupported {
            kind: ModuleKind::Sweeper,
            operation: "trigger",
        };
        assert_eq!(err.to_string(), "sweep module does not support trigger");
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ModuleError::NotSupported {
                kind: ModuleKind::PidAdvisor,
                operation: "trigger"
            }
            .code(),
            ResultCode::NotSupported
        );
        let api = ApiError::connection(ConnectionErrorKind::NotConnected, "gone");
        let code = api.code();
        assert_eq!(ModuleError::from(api).code(), code);
    }
}
