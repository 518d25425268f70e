//! # ziapi Protocol
//!
//! Data model shared by every layer of the Data Server client (no IO here).
//!
//! ## Modules
//!
//! - `path`: validated node paths and wildcard matching
//! - `time`: device timestamps and clock-base conversion
//! - `result`: result codes and severities
//! - `value`: scalar node values
//! - `samples` / `waves`: typed payload structures
//! - `event`: the closed `Payload` sum type and `Event`
//! - `api_level`: API level negotiation and reachable event kinds
//! - `flags`: node listing and chunk header flags
//! - `subscription`: ordered subscribe/unsubscribe rules
//! - `message`: client/server wire messages
//! - `codec`: length-prefixed framing of wire messages

pub mod api_level;
pub mod codec;
pub mod event;
pub mod flags;
pub mod message;
pub mod path;
pub mod result;
pub mod samples;
pub mod subscription;
pub mod time;
pub mod value;
pub mod waves;

pub use api_level::ApiLevel;
pub use codec::{CodecError, FrameCodec};
pub use event::{Event, EventKind, Payload};
pub use flags::{ChunkFlags, ListNodesFlags};
pub use message::*;
pub use path::{NodePath, PathError};
pub use result::{ResultCode, Severity};
pub use samples::*;
pub use subscription::SubscriptionSet;
pub use time::{ClockBase, Timestamp};
pub use value::{Value, ValueType};
pub use waves::*;

use thiserror::Error;

/// Maximum node path length in bytes, including the terminator byte of the wire format.
pub const MAX_PATH_LEN: usize = 256;

/// Maximum length of a single path segment or module name.
pub const MAX_NAME_LEN: usize = 32;

/// Largest single frame accepted on the wire (4 MiB).
pub const MAX_EVENT_SIZE: usize = 0x40_0000;

/// Protocol-level errors
///
/// Raised when a message is well framed but semantically invalid, or when the
/// server reports a fault that belongs to the protocol category.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A value of one type was requested from a node holding another type
    #[error("Type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch { expected: ValueType, actual: ValueType },

    /// The server rejected the command as malformed
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Server-side internal fault
    #[error("Server internal error: {0}")]
    ServerInternal(String),

    /// Operation is not supported on this device class or API level
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A buffer or frame exceeded its limit
    #[error("Length exceeded: max {max}, got {actual}")]
    Length { max: usize, actual: usize },

    /// Frame encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Reply did not match the request it answers
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::FrameTooLarge { max, actual } => ProtocolError::Length { max, actual },
            other => ProtocolError::Codec(other.to_string()),
        }
    }
}
