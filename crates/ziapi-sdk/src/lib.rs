//! # ziapi SDK
//!
//! Rust client for Data Server sessions, split in layers from the wire up:
//!
//! - **protocol** (`protocol`): node paths, values, typed event payloads, wire codec
//! - **transport** (`transport`): TCP and in-process simulated Data Server
//! - **driver** (`driver`): sessions, subscriptions, bounded event queue, get/set
//! - **client** (`client`): measurement modules, scope reassembly, discovery
//!
//! # Quick start
//!
//! ```rust,no_run
//! use ziapi_sdk::prelude::*;
//!
//! # fn main() -> Result<(), ApiError> {
//! let mut conn = ConnectionBuilder::new().host("localhost", 8004).open()?;
//! conn.subscribe("/dev1234/demods/0/sample")?;
//! if let Some(event) = conn.poll(Timeout::from_ms(100))?.value {
//!     println!("{} samples from {}", event.count(), event.path);
//! }
//! # Ok(())
//! # }
//! ```

pub use ziapi_client as client;
pub use ziapi_driver as driver;
pub use ziapi_protocol as protocol;
pub use ziapi_transport as transport;

pub mod logging;
pub mod prelude;

pub use logging::{DebugLevel, LoggingError, init_logger, write_debug_log};

// Session layer
pub use driver::{ApiError, Connection, ConnectionBuilder, ConnectionConfig, Outcome, SetMode, Timeout, Warning};

// Modules and discovery
pub use client::{Discovery, DiscoveryError, Module, ModuleError, ModuleKind, ModuleState, create_api_session};

// Data model
pub use protocol::{ApiLevel, Event, NodePath, Payload, Value};
