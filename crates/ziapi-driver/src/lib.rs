//! # ziapi Driver
//!
//! Session layer of the Data Server client:
//! - handshake and API level negotiation
//! - one IO thread per connection feeding a bounded event queue
//! - client-side subscription routing (`ArcSwap` snapshot read by the IO thread)
//! - synchronous get/set, async commands with tags, node listing
//!
//! Most users want [`Connection`] through [`ConnectionBuilder`].

mod builder;
pub mod command;
pub mod config;
mod connection;
mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod state;
pub mod subscription;
pub mod thread;

pub use builder::ConnectionBuilder;
pub use command::{AsyncCommand, SetMode, SetOutcome, Tag, Timeout};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{CLIENT_VERSION, CloseHandle, Connection, ServerInfo};
pub use error::{ApiError, ConnectionErrorKind, ErrorKind, Outcome, Warning};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use queue::{EventQueue, EventSink, EventSource, OverflowPolicy, QueueClosed};
pub use state::{AtomicConnectionState, ConnectionState};
pub use subscription::SubscriptionRegistry;
pub use thread::JoinTimeout;
