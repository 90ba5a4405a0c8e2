// src/core/protocol/response.rs

//! Response type codes and the decoded shape of a response payload.

use crate::core::OpalDBError;
use serde::Deserialize;
use serde_json::Value;

/// Symbolic response types, mapped from the numeric `t` field of a
/// response document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// A single value in `r[0]`.
    SuccessAtom,
    /// A terminal multi-row result; `r` is the final batch.
    SuccessSequence,
    /// A multi-row result with more batches pending on the same token.
    SuccessPartial,
    /// Acknowledgement of a NOREPLY_WAIT query.
    WaitComplete,
    /// Server description in `r[0]`.
    ServerInfo,
    /// The client sent a malformed or unsupported query.
    ClientError,
    /// The query failed to compile server-side.
    CompileError,
    /// The query failed during evaluation.
    RuntimeError,
}

impl ResponseType {
    /// Maps the wire code to its symbolic type.
    pub fn from_code(code: i64) -> Result<Self, OpalDBError> {
        match code {
            1 => Ok(ResponseType::SuccessAtom),
            2 => Ok(ResponseType::SuccessSequence),
            3 => Ok(ResponseType::SuccessPartial),
            4 => Ok(ResponseType::WaitComplete),
            5 => Ok(ResponseType::ServerInfo),
            16 => Ok(ResponseType::ClientError),
            17 => Ok(ResponseType::CompileError),
            18 => Ok(ResponseType::RuntimeError),
            other => Err(OpalDBError::Protocol(format!(
                "unknown response type code {other}"
            ))),
        }
    }

    /// True for the three error variants.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

#[derive(Deserialize)]
struct RawResponse {
    t: Option<i64>,
    r: Option<Vec<Value>>,
}

/// A decoded response payload: the symbolic type and the result array.
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub response_type: ResponseType,
    pub results: Vec<Value>,
}

impl WireResponse {
    /// Decodes a response document. Missing `t` or `r` fields are a
    /// protocol error local to the addressed receiver.
    pub fn parse(payload: &[u8]) -> Result<Self, OpalDBError> {
        let raw: RawResponse = serde_json::from_slice(payload)
            .map_err(|e| OpalDBError::Protocol(format!("undecodable response payload: {e}")))?;
        let code = raw
            .t
            .ok_or_else(|| OpalDBError::Protocol("response is missing the 't' field".into()))?;
        let results = raw
            .r
            .ok_or_else(|| OpalDBError::Protocol("response is missing the 'r' field".into()))?;
        Ok(Self {
            response_type: ResponseType::from_code(code)?,
            results,
        })
    }

    /// The first result element, for atom-shaped responses.
    pub fn first(&self) -> Value {
        self.results.first().cloned().unwrap_or(Value::Null)
    }
}
