// src/config.rs

//! Connection configuration: endpoint, credentials, timeouts, and TCP hints.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options accepted by [`Connection::connect`](crate::Connection::connect).
///
/// All defaults are call-site values; the driver keeps no implicit
/// global configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectOptions {
    /// Server hostname or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for connect plus the entire handshake, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// User to authenticate as.
    #[serde(default = "default_user")]
    pub user: String,
    /// Password for the user. Empty by default.
    #[serde(default)]
    pub password: String,
    /// Transport-layer hints applied to the socket.
    #[serde(default)]
    pub tcp_options: TcpOptions,
}

/// Transport-layer hints.
///
/// Framing mode and payload shape are not configurable: the driver
/// always runs a binary framed stream and asserts its own choices,
/// whatever the caller passes here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm. Defaults to true; queries are small
    /// and latency-sensitive.
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    /// IP TTL for outgoing packets, if overridden.
    #[serde(default)]
    pub ttl: Option<u32>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    28015
}
fn default_timeout_ms() -> u64 {
    20_000
}
fn default_user() -> String {
    "admin".to_string()
}
fn default_nodelay() -> bool {
    true
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            user: default_user(),
            password: String::new(),
            tcp_options: TcpOptions::default(),
        }
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: default_nodelay(),
            ttl: None,
        }
    }
}

impl ConnectOptions {
    /// Connect + handshake deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }
}
