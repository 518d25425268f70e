//! Wire messages between client and Data Server
//!
//! ```text
//! client                                server
//!   | -- Hello ------------------------> |
//!   | <------------- Welcome / Rejected  |
//!   | -- Request{id, reply, body} -----> |
//!   | <-------------- Reply{id, body}    |   (ReplyMode::Sync)
//!   | <--- Event{AsyncReply, solicited}  |   (ReplyMode::Tagged)
//!   | <------ Event{data, unsolicited}   |   (subscriptions)
//! ```

use crate::api_level::ApiLevel;
use crate::event::{Event, Payload};
use crate::flags::ListNodesFlags;
use crate::path::NodePath;
use crate::result::ResultCode;
use crate::samples::Tag;
use crate::value::{Value, ValueType};
use crate::waves::VectorElements;
use serde::{Deserialize, Serialize};

/// Request correlation id, unique per session
pub type RequestId = u64;

/// Default implementation name negotiated at handshake
pub const DEFAULT_IMPLEMENTATION: &str = "ziAPI";

/// Session handshake request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub api_level: ApiLevel,
    pub implementation: String,
    pub client_version: String,
}

/// Handshake acceptance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub session_id: u64,
    pub max_api_level: ApiLevel,
    pub server_version: String,
}

/// How the server acknowledges a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyMode {
    /// Fire and forget
    None,
    /// Direct `Reply` with the same request id
    Sync,
    /// `AsyncReply` event carrying the tag
    Tagged(Tag),
}

/// Request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Get { path: NodePath, expected: ValueType },
    /// Latest streamed sample of a node
    GetSample { path: NodePath },
    Set { path: NodePath, value: Value },
    Subscribe { path: NodePath },
    Unsubscribe { path: NodePath },
    ListNodes { pattern: NodePath, flags: ListNodesFlags },
    /// Push the current value(s) of matching nodes as solicited events
    RequestValue { path: NodePath },
    ConnectDevice { serial: String, interface: String, params: String },
    DisconnectDevice { serial: String },
    /// Barrier: replied once all earlier requests are applied
    Sync,
    EchoDevice { serial: String },
    VectorWrite { path: NodePath, data: VectorElements },
}

impl Request {
    /// Path addressed by this request, if any
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            Request::Get { path, .. }
            | Request::GetSample { path }
            | Request::Set { path, .. }
            | Request::Subscribe { path }
            | Request::Unsubscribe { path }
            | Request::RequestValue { path }
            | Request::VectorWrite { path, .. } => Some(path),
            Request::ListNodes { pattern, .. } => Some(pattern),
            _ => None,
        }
    }
}

/// Reply body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    Value(Value),
    Sample(Payload),
    /// Effective value after a set (possibly clamped)
    Effective(Value),
    Nodes(Vec<NodePath>),
    Error { code: ResultCode, message: String },
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Hello(Hello),
    Request {
        id: RequestId,
        reply: ReplyMode,
        body: Request,
    },
    Goodbye,
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome(Welcome),
    Rejected { code: ResultCode, reason: String },
    Reply { id: RequestId, body: Reply },
    /// `solicited` events answer an explicit request and bypass subscription routing
    Event { event: Event, solicited: bool },
    Shutdown { reason: String },
}
