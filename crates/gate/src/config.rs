//! Gateway configuration.
//!
//! Every field has a serde default, so an empty TOML document is a valid
//! configuration. An empty address string disables that listener.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsgate_network::{
    ConnConfig, DEFAULT_LIVENESS_WINDOW, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_PENDING_READ, DEFAULT_PENDING_WRITE, LenPrefixConfig, ServerConfig,
};

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("len_msg_len must be 1, 2, 4 or 8 (got {0})")]
    LenMsgLen(usize),

    #[error("cert_file and key_file must be set together")]
    IncompleteTls,

    #[error("no listener address configured")]
    NoListener,
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// WebSocket listen address. Empty disables the listener.
    #[serde(default = "default_ws_addr")]
    pub ws_addr: String,

    /// Length-prefixed TCP listen address. Empty disables the listener.
    #[serde(default)]
    pub tcp_addr: String,

    /// Maximum concurrent connections across both listeners.
    #[serde(default = "default_max_conn_num")]
    pub max_conn_num: usize,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_pending_write_num")]
    pub pending_write_num: usize,

    /// Inbound queue capacity per connection.
    #[serde(default = "default_pending_read_num")]
    pub pending_read_num: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_msg_len")]
    pub max_msg_len: usize,

    /// Liveness window in seconds; probes go out at 9/10 of it.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,

    /// Upper bound on the WebSocket upgrade handshake, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub cert_file: String,

    #[serde(default)]
    pub key_file: String,

    /// Width of the TCP length header in bytes.
    #[serde(default = "default_len_msg_len")]
    pub len_msg_len: usize,

    #[serde(default)]
    pub little_endian: bool,
}

fn default_ws_addr() -> String {
    "0.0.0.0:3653".into()
}

fn default_max_conn_num() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_pending_write_num() -> usize {
    DEFAULT_PENDING_WRITE
}

fn default_pending_read_num() -> usize {
    DEFAULT_PENDING_READ
}

fn default_max_msg_len() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_liveness_window_secs() -> u64 {
    DEFAULT_LIVENESS_WINDOW.as_secs()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_len_msg_len() -> usize {
    2
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ws_addr: default_ws_addr(),
            tcp_addr: String::new(),
            max_conn_num: default_max_conn_num(),
            pending_write_num: default_pending_write_num(),
            pending_read_num: default_pending_read_num(),
            max_msg_len: default_max_msg_len(),
            liveness_window_secs: default_liveness_window_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            cert_file: String::new(),
            key_file: String::new(),
            len_msg_len: default_len_msg_len(),
            little_endian: false,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_conn_num", self.max_conn_num as u64),
            ("pending_write_num", self.pending_write_num as u64),
            ("pending_read_num", self.pending_read_num as u64),
            ("max_msg_len", self.max_msg_len as u64),
            ("liveness_window_secs", self.liveness_window_secs),
            ("http_timeout_secs", self.http_timeout_secs),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }

        if !matches!(self.len_msg_len, 1 | 2 | 4 | 8) {
            return Err(ConfigError::LenMsgLen(self.len_msg_len));
        }

        if self.cert_file.is_empty() != self.key_file.is_empty() {
            return Err(ConfigError::IncompleteTls);
        }

        if self.ws_addr.is_empty() && self.tcp_addr.is_empty() {
            return Err(ConfigError::NoListener);
        }

        Ok(())
    }

    pub fn tls_requested(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_conn_num,
            conn: ConnConfig {
                pending_read: self.pending_read_num,
                pending_write: self.pending_write_num,
                max_message_size: self.max_msg_len,
                liveness_window: self.liveness_window(),
            },
        }
    }

    /// Largest payload a client may send. Outgoing payloads must be shorter
    /// than `max_msg_len` too, so both directions share one bound.
    pub fn max_inbound_len(&self) -> usize {
        self.max_msg_len.saturating_sub(1)
    }

    pub fn len_prefix_config(&self) -> LenPrefixConfig {
        LenPrefixConfig {
            len_msg_len: self.len_msg_len,
            little_endian: self.little_endian,
            max_msg_len: self.max_msg_len,
        }
    }
}
