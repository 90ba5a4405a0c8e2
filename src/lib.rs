// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod cursor;

// Re-export
pub use crate::config::{ConnectOptions, TcpOptions};
pub use crate::connection::{Connection, Reply, RunOpts};
pub use crate::core::OpalDBError;
pub use crate::cursor::{Cursor, CursorEvent};
