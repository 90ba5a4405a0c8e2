// src/core/scram.rs

//! Client-side SCRAM-SHA-256 primitives used by the handshake.
//!
//! Implements the salted-challenge exchange of RFC 5802 with SHA-256:
//! nonce generation, server-first attribute parsing, salted-password
//! derivation, and the client proof / server signature pair.

use crate::core::OpalDBError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// The authentication method name advertised during the handshake.
pub const METHOD: &str = "SCRAM-SHA-256";

/// GS2 header for a client that supports no channel binding, plus its
/// fixed base64 form used in the client-final message.
pub const GS2_HEADER: &str = "n,,";
pub const GS2_HEADER_B64: &str = "biws";

const NONCE_LEN: usize = 18;

/// Parsed attributes of the server-first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirst {
    /// Combined client+server nonce.
    pub nonce: String,
    /// Decoded salt.
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

/// The outputs of the proof computation.
pub struct ClientProof {
    /// Base64 client proof for the `p=` attribute.
    pub proof: String,
    /// Base64 server signature expected in the server-final message.
    pub server_signature: String,
}

/// Generates a fresh random client nonce.
pub fn nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Parses a SCRAM attribute list (`r=...,s=...,i=...`) from the
/// server-first message.
pub fn parse_server_first(message: &str) -> Result<ServerFirst, OpalDBError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for attr in message.split(',') {
        match attr.split_once('=') {
            Some(("r", v)) => nonce = Some(v.to_string()),
            Some(("s", v)) => {
                salt = Some(BASE64.decode(v).map_err(|e| {
                    OpalDBError::AuthFailed(format!("server-first carries invalid salt: {e}"))
                })?)
            }
            Some(("i", v)) => {
                iterations = Some(v.parse::<u32>().map_err(|_| {
                    OpalDBError::AuthFailed(format!(
                        "server-first carries invalid iteration count '{v}'"
                    ))
                })?)
            }
            _ => {} // Unknown attributes are permitted and ignored.
        }
    }

    match (nonce, salt, iterations) {
        (Some(nonce), Some(salt), Some(iterations)) => Ok(ServerFirst {
            nonce,
            salt,
            iterations,
        }),
        _ => Err(OpalDBError::AuthFailed(
            "server-first message lacks r/s/i attributes".to_string(),
        )),
    }
}

/// PBKDF2-HMAC-SHA256 with a single output block, the `Hi` function of
/// the SCRAM specification.
pub fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = hmac_keyed(password.as_bytes());
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut block: [u8; 32] = mac.finalize().into_bytes().into();
    let mut output = block;

    for _ in 1..iterations {
        let mut mac = hmac_keyed(password.as_bytes());
        mac.update(&block);
        block = mac.finalize().into_bytes().into();
        for (out, b) in output.iter_mut().zip(block.iter()) {
            *out ^= b;
        }
    }
    output
}

/// Computes the client proof and the expected server signature.
///
/// `auth_message` is the comma-join of the client-first-bare,
/// server-first, and client-final-without-proof messages.
pub fn client_proof(
    client_first_bare: &str,
    server_first: &str,
    client_final_without_proof: &str,
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> ClientProof {
    let salted = salted_password(password, salt, iterations);
    let auth_message =
        format!("{client_first_bare},{server_first},{client_final_without_proof}");

    let client_key = hmac_sign(&salted, b"Client Key");
    let stored_key = Sha256::digest(client_key);
    let client_signature = hmac_sign(&stored_key, auth_message.as_bytes());

    let mut proof = client_key;
    for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
        *p ^= s;
    }

    let server_key = hmac_sign(&salted, b"Server Key");
    let server_signature = hmac_sign(&server_key, auth_message.as_bytes());

    ClientProof {
        proof: BASE64.encode(proof),
        server_signature: BASE64.encode(server_signature),
    }
}

/// Constant-time comparison of a received base64 signature against the
/// expected one.
pub fn verify_server_signature(expected_b64: &str, received_b64: &str) -> bool {
    if expected_b64.len() != received_b64.len() {
        return false;
    }
    let mut result = 0u8;
    for (a, b) in expected_b64.bytes().zip(received_b64.bytes()) {
        result |= a ^ b;
    }
    result == 0
}

fn hmac_keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

fn hmac_sign(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = hmac_keyed(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}
