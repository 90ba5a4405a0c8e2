// src/core/errors.rs

//! Defines the primary error type for the entire driver.

use crate::core::protocol::response::ResponseType;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the driver.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum OpalDBError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection closed")]
    Closed,

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Handshake rejected by server: {0}")]
    Handshake(Value),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame payload of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Driver task is no longer running")]
    DriverGone,

    /// A server-reported query failure. `kind` is the symbolic response
    /// type the server used; `payload` is the first element of its
    /// result array (conventionally the error message).
    #[error("Query error ({kind:?}): {payload}")]
    Query { kind: ResponseType, payload: Value },
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for OpalDBError {
    fn clone(&self) -> Self {
        match self {
            OpalDBError::Io(e) => OpalDBError::Io(Arc::clone(e)),
            OpalDBError::Closed => OpalDBError::Closed,
            OpalDBError::ConnectTimeout => OpalDBError::ConnectTimeout,
            OpalDBError::Handshake(v) => OpalDBError::Handshake(v.clone()),
            OpalDBError::AuthFailed(s) => OpalDBError::AuthFailed(s.clone()),
            OpalDBError::Timeout => OpalDBError::Timeout,
            OpalDBError::Protocol(s) => OpalDBError::Protocol(s.clone()),
            OpalDBError::FrameTooLarge { size, max } => OpalDBError::FrameTooLarge {
                size: *size,
                max: *max,
            },
            OpalDBError::DriverGone => OpalDBError::DriverGone,
            OpalDBError::Query { kind, payload } => OpalDBError::Query {
                kind: *kind,
                payload: payload.clone(),
            },
        }
    }
}

impl PartialEq for OpalDBError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpalDBError::Io(e1), OpalDBError::Io(e2)) => e1.to_string() == e2.to_string(),
            (OpalDBError::Handshake(v1), OpalDBError::Handshake(v2)) => v1 == v2,
            (OpalDBError::AuthFailed(s1), OpalDBError::AuthFailed(s2)) => s1 == s2,
            (OpalDBError::Protocol(s1), OpalDBError::Protocol(s2)) => s1 == s2,
            (
                OpalDBError::FrameTooLarge { size: s1, max: m1 },
                OpalDBError::FrameTooLarge { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (
                OpalDBError::Query {
                    kind: k1,
                    payload: p1,
                },
                OpalDBError::Query {
                    kind: k2,
                    payload: p2,
                },
            ) => k1 == k2 && p1 == p2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for OpalDBError {
    fn from(e: std::io::Error) -> Self {
        OpalDBError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for OpalDBError {
    fn from(e: serde_json::Error) -> Self {
        OpalDBError::Protocol(format!("JSON serialization/deserialization error: {e}"))
    }
}
