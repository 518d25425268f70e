//! Common imports
//!
//! ```rust
//! use ziapi_sdk::prelude::*;
//! ```

pub use crate::driver::{
    ApiError, Connection, ConnectionBuilder, ConnectionConfig, OverflowPolicy, Outcome, SetMode, Tag, Timeout,
    Warning,
};

pub use crate::client::{
    Chunk, Discovery, DiscoveryError, JsonFileStore, Module, ModuleError, ModuleKind, ModuleReadout, ModuleState,
    ResultStore, ScopeReassembler, ScopeShot, SimDiscovery, StaticDiscovery, create_api_session,
};

pub use crate::protocol::{
    ApiLevel, ChunkFlags, ClockBase, DemodSample, Event, EventKind, ListNodesFlags, NodePath, Payload, Timestamp,
    Value, ValueType,
};

pub use crate::transport::{Endpoint, SimConfig, SimDeviceConfig, SimNetwork, SimServer};

pub use crate::logging::{DebugLevel, init_logger};
