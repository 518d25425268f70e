//! # ziapi Client
//!
//! Everything built on top of a [`Connection`](ziapi_driver::Connection):
//! - [`module`]: long-running measurement modules with chunked results
//! - [`scope`]: reassembly of multi-block scope shots
//! - [`storage`]: persistence of module results
//! - [`discovery`] and [`session`]: from a device address to a ready session

pub mod discovery;
mod error;
pub mod module;
pub mod scope;
pub mod session;
pub mod storage;

pub use discovery::{DeviceEntry, DeviceId, Discovery, DiscoveryError, SimDiscovery, StaticDiscovery};
pub use error::ModuleError;
pub use module::{Chunk, ChunkHeader, Module, ModuleId, ModuleKind, ModuleReadout, ModuleState};
pub use scope::{ScopeReassembler, ScopeShot};
pub use session::{create_api_session, negotiate_api_level};
pub use storage::{JsonFileStore, ResultStore, SavedResult, StorageError};
