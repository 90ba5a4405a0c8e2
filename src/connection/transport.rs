// src/connection/transport.rs

//! Byte-stream transport to one server endpoint.
//!
//! During the handshake the transport is driven synchronously with a
//! shared deadline and NUL-terminated reads. Afterwards it is consumed
//! into a framed stream and the driver task owns it exclusively.

use crate::config::ConnectOptions;
use crate::core::OpalDBError;
use crate::core::protocol::QueryFrameCodec;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::debug;

// Upper bound on a single handshake document. Far above anything a
// server legitimately sends during authentication.
const MAX_HANDSHAKE_DOCUMENT: usize = 16 * 1024;

/// An established TCP transport, pre-handshake.
#[derive(Debug)]
pub(crate) struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Transport {
    /// Connects to the configured endpoint within the connect deadline
    /// and applies the caller's transport-layer hints. Framing mode and
    /// payload shape are not hints; the driver asserts its own choices.
    pub(crate) async fn connect(options: &ConnectOptions) -> Result<Self, OpalDBError> {
        let addr = (options.host.as_str(), options.port);
        let stream = tokio::time::timeout(options.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| OpalDBError::ConnectTimeout)??;

        if options.tcp_options.nodelay {
            stream.set_nodelay(true)?;
        }
        if let Some(ttl) = options.tcp_options.ttl {
            stream.set_ttl(ttl)?;
        }

        debug!("connected to {}:{}", options.host, options.port);
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(1024),
        })
    }

    /// Writes one handshake message.
    pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<(), OpalDBError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one NUL-terminated document, bounded by `deadline`.
    ///
    /// A handshake exchange yields exactly one document per reply;
    /// non-empty bytes following the terminator are rejected.
    pub(crate) async fn recv_until_nul(
        &mut self,
        deadline: Instant,
    ) -> Result<BytesMut, OpalDBError> {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == 0) {
                let document = self.read_buf.split_to(pos);
                self.read_buf.advance(1);
                if !self.read_buf.is_empty() {
                    return Err(OpalDBError::Protocol(
                        "unexpected bytes after handshake document terminator".to_string(),
                    ));
                }
                return Ok(document);
            }
            if self.read_buf.len() > MAX_HANDSHAKE_DOCUMENT {
                return Err(OpalDBError::Protocol(
                    "handshake document exceeds size limit".to_string(),
                ));
            }

            let n = tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| OpalDBError::ConnectTimeout)??;
            if n == 0 {
                return Err(OpalDBError::Closed);
            }
        }
    }

    /// Shuts the stream down. Idempotent at the protocol level; any
    /// later use of the endpoint surfaces `Closed` from the peer.
    pub(crate) async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Hands the stream to the post-handshake framing layer.
    pub(crate) fn into_framed(self) -> Framed<TcpStream, QueryFrameCodec> {
        Framed::new(self.stream, QueryFrameCodec::new())
    }
}
