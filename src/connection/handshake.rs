// src/connection/handshake.rs

//! The connection handshake: magic bytes, then a SCRAM-SHA-256
//! challenge-response carried in NUL-terminated JSON documents.
//!
//! The whole dialogue is a straight-line function under one deadline.
//! On any error the caller closes the transport; this module never
//! touches the post-handshake request path.

use crate::config::ConnectOptions;
use crate::connection::transport::Transport;
use crate::core::{scram, OpalDBError};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

/// Protocol magic sent as the first bytes on the wire.
pub(crate) const MAGIC: [u8; 4] = [0xc3, 0xbd, 0xc2, 0x34];

const PROTOCOL_VERSION: u64 = 0;

/// Drives the four-step handshake dialogue. The transport is left in
/// the post-handshake state on success; the caller closes it on error.
pub(crate) async fn authenticate(
    transport: &mut Transport,
    options: &ConnectOptions,
) -> Result<(), OpalDBError> {
    let deadline = Instant::now() + options.timeout();

    // Step 1: magic, then the server's version document.
    transport.send(&MAGIC).await?;
    let version = read_document(transport, deadline).await?;
    require_success(&version)?;
    debug!("server accepted protocol magic");

    // Step 2: client-first message.
    let client_nonce = scram::nonce();
    let client_first_bare = format!("n={},r={}", options.user, client_nonce);
    let client_first = json!({
        "protocol_version": PROTOCOL_VERSION,
        "authentication_method": scram::METHOD,
        "authentication": format!("{}{}", scram::GS2_HEADER, client_first_bare),
    });
    send_document(transport, &client_first).await?;

    let reply = read_document(transport, deadline).await?;
    require_success(&reply)?;
    let server_first = authentication_field(&reply)?;

    // Step 3: verify the challenge and answer with the client proof.
    let challenge = scram::parse_server_first(&server_first)?;
    if !challenge.nonce.starts_with(&client_nonce) {
        return Err(OpalDBError::AuthFailed(
            "server nonce does not extend the client nonce".to_string(),
        ));
    }

    let client_final_without_proof =
        format!("c={},r={}", scram::GS2_HEADER_B64, challenge.nonce);
    let proof = scram::client_proof(
        &client_first_bare,
        &server_first,
        &client_final_without_proof,
        &options.password,
        &challenge.salt,
        challenge.iterations,
    );
    let client_final = json!({
        "authentication": format!("{client_final_without_proof},p={}", proof.proof),
    });
    send_document(transport, &client_final).await?;

    let final_reply = read_document(transport, deadline).await?;
    require_success(&final_reply)?;

    // Step 4: check the server signature when the server presents one.
    if let Ok(server_final) = authentication_field(&final_reply) {
        if let Some(signature) = scram_attribute(&server_final, 'v') {
            if !scram::verify_server_signature(&proof.server_signature, signature) {
                return Err(OpalDBError::AuthFailed(
                    "server signature mismatch".to_string(),
                ));
            }
        }
    }

    debug!("authenticated as '{}'", options.user);
    Ok(())
}

async fn send_document(transport: &mut Transport, document: &Value) -> Result<(), OpalDBError> {
    let mut bytes = serde_json::to_vec(document)?;
    bytes.push(0);
    transport.send(&bytes).await
}

async fn read_document(
    transport: &mut Transport,
    deadline: Instant,
) -> Result<Value, OpalDBError> {
    let bytes = transport.recv_until_nul(deadline).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| OpalDBError::Protocol(format!("undecodable handshake document: {e}")))
}

/// Any reply without `success == true` carries the server's error
/// document, surfaced verbatim.
fn require_success(document: &Value) -> Result<(), OpalDBError> {
    match document.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        _ => Err(OpalDBError::Handshake(document.clone())),
    }
}

fn authentication_field(document: &Value) -> Result<String, OpalDBError> {
    document
        .get("authentication")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            OpalDBError::Protocol("handshake reply is missing the 'authentication' field".into())
        })
}

fn scram_attribute(message: &str, name: char) -> Option<&str> {
    message.split(',').find_map(|attr| {
        attr.split_once('=')
            .filter(|(k, _)| k.len() == 1 && k.starts_with(name))
            .map(|(_, v)| v)
    })
}
