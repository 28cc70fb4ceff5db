//! Multi-user chat server over a local stream socket.
//!
//! Clients register a nickname, exchange direct, group and broadcast
//! messages and files, and can fetch the bounded history of messages that
//! arrived while they were offline. The binary in `main.rs` wires this
//! library to the CLI, the config file and the process signals.

mod config;
mod connections;
mod server;
mod stats;

pub use config::{Config, ConfigError, MAX_PATH_LEN};
pub use server::{RunFlags, Server};
pub use stats::{Counters, Stats, StatsDelta};
