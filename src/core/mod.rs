// src/core/mod.rs

//! The central module containing the core logic and data structures of the driver.

pub mod errors;
pub mod protocol;
pub mod scram;

pub use errors::OpalDBError;
pub use protocol::response::ResponseType;
