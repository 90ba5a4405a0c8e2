// src/core/protocol/query.rs

//! The wire-level query builder: assembles outbound query documents.
//!
//! A query document is a JSON array `[type, term, opts]` (or `[type]`
//! alone for token-scoped commands such as CONTINUE). The driver only
//! needs the handful of term codes used by the insert fast-path; a
//! full query-tree DSL is a separate concern.

use bytes::Bytes;
use serde_json::{Map, Value};

/// Wire codes for the query type, the first element of every query
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
    NoreplyWait = 4,
    ServerInfo = 5,
}

/// Term codes used by the driver-assembled query trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TermType {
    Db = 14,
    Table = 15,
    Insert = 56,
}

/// Builds a START query document around a caller-supplied term tree.
pub fn start(term: &Value, opts: &Map<String, Value>) -> Bytes {
    let doc = Value::Array(vec![
        Value::from(QueryType::Start as u8),
        term.clone(),
        Value::Object(opts.clone()),
    ]);
    // Serializing a Value cannot fail.
    Bytes::from(doc.to_string().into_bytes())
}

/// The fixed CONTINUE document sent on an existing token.
pub fn continue_() -> Bytes {
    Bytes::from_static(b"[2]")
}

/// The fixed STOP document sent on an existing token.
pub fn stop() -> Bytes {
    Bytes::from_static(b"[3]")
}

/// The NOREPLY_WAIT document.
pub fn noreply_wait() -> Bytes {
    Bytes::from_static(b"[4]")
}

/// The SERVER_INFO document.
pub fn server_info() -> Bytes {
    Bytes::from_static(b"[5]")
}

/// Builds the insert fast-path wrapper around caller-supplied raw JSON.
///
/// Returns `(prefix, suffix)`; the wire payload is
/// `prefix ‖ raw_json ‖ suffix` and its length is the sum of the three
/// part lengths. The raw document bytes are never parsed, only spliced
/// into the insert term where its document argument belongs.
pub fn insert_raw_wrapper(db: &str, table: &str, opts: &Map<String, Value>) -> (Bytes, Bytes) {
    let mut prefix = Vec::with_capacity(64);
    prefix.extend_from_slice(b"[");
    push_code(&mut prefix, QueryType::Start as u8);
    prefix.extend_from_slice(b",[");
    push_code(&mut prefix, TermType::Insert as u8);
    prefix.extend_from_slice(b",[[");
    push_code(&mut prefix, TermType::Table as u8);
    prefix.extend_from_slice(b",[[");
    push_code(&mut prefix, TermType::Db as u8);
    prefix.extend_from_slice(b",[");
    push_json_string(&mut prefix, db);
    prefix.extend_from_slice(b"]],");
    push_json_string(&mut prefix, table);
    prefix.extend_from_slice(b"]],");

    let mut suffix = Vec::with_capacity(16);
    suffix.extend_from_slice(b"]],");
    // Serializing a Map<String, Value> cannot fail.
    suffix.extend_from_slice(Value::Object(opts.clone()).to_string().as_bytes());
    suffix.extend_from_slice(b"]");

    (Bytes::from(prefix), Bytes::from(suffix))
}

fn push_code(buf: &mut Vec<u8>, code: u8) {
    buf.extend_from_slice(code.to_string().as_bytes());
}

fn push_json_string(buf: &mut Vec<u8>, s: &str) {
    // Serializing a &str cannot fail.
    buf.extend_from_slice(Value::String(s.to_string()).to_string().as_bytes());
}
