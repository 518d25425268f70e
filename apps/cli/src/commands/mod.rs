//! Command definitions

pub mod config;
pub mod discover;
pub mod node;
pub mod pid;
pub mod poll;
pub mod serve;
pub mod sweep;

pub use config::ConfigCommand;
pub use discover::DiscoverCommand;
pub use node::{GetCommand, LsCommand, SetCommand};
pub use pid::PidCommand;
pub use poll::PollCommand;
pub use serve::ServeCommand;
pub use sweep::SweepCommand;
