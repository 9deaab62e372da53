//! Server configuration as written by the hosting platform
//!
//! The platform rewrites a JSON file on every allocation change. Keys are
//! PascalCase; unknown keys are ignored and missing keys take the defaults
//! below.

use serde::{Deserialize, Deserializer};
use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_QUERY_TYPE: &str = "sqp";
pub const DEFAULT_MAX_PLAYERS: u32 = 4;
pub const DEFAULT_MAP: &str = "Sample Map";
pub const DEFAULT_GAME_TYPE: &str = "Sample Game";

/// Socket buffer size used for game connections when none is configured
pub const DEFAULT_SOCKET_BUFFER: usize = 40960;

/// Query datagram receive buffer used when `ReadBuffer` is unset
pub const DEFAULT_QUERY_READ_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error opening file: {0}")]
    Io(#[from] io::Error),
    #[error("error decoding json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        source: AddrParseError,
    },
}

impl ConfigError {
    /// True when the file was empty or cut short.
    ///
    /// Deallocation truncates the file before rewriting it, so the first
    /// change notification sees an empty file.
    pub fn is_truncated(&self) -> bool {
        matches!(self, ConfigError::Json(e) if e.is_eof())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
    /// Allocation identifier; empty means the server is not allocated
    #[serde(rename = "AllocatedUUID", alias = "AllocationUUID")]
    pub allocated_uuid: String,

    /// Game (TCP) bind address, e.g. "0.0.0.0:8000"
    pub bind: String,

    /// Query (UDP) bind addresses; the first one is served
    #[serde(deserialize_with = "one_or_many")]
    pub bind_query: Vec<String>,

    /// Kernel receive buffer for player sockets, in bytes. Also caps the
    /// size of a query datagram when set.
    pub read_buffer: usize,
    /// Kernel send buffer for player sockets, in bytes
    pub write_buffer: usize,
    /// Player capacity reported to queries
    pub max_players: u32,
    /// Map name reported to queries
    pub map: String,
    /// Game mode reported to queries
    pub game_type: String,

    /// "a2s" selects A2S; anything else serves SQP
    #[serde(rename = "QueryType", alias = "QueryProtocol")]
    pub query_type: String,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl Config {
    /// Loads and defaults the configuration file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read(path)?;
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_slice(content)?;
        Ok(config.with_defaults())
    }

    /// Fills unset fields with their documented defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.query_type.is_empty() {
            self.query_type = DEFAULT_QUERY_TYPE.to_string();
        }
        if self.max_players == 0 {
            self.max_players = DEFAULT_MAX_PLAYERS;
        }
        if self.map.is_empty() {
            self.map = DEFAULT_MAP.to_string();
        }
        if self.game_type.is_empty() {
            self.game_type = DEFAULT_GAME_TYPE.to_string();
        }
        self
    }

    pub fn is_allocated(&self) -> bool {
        !self.allocated_uuid.is_empty()
    }

    /// Address for the game listener, falling back to all interfaces on `port`.
    pub fn game_addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        resolve_bind(&self.bind, port)
    }

    /// Address for the query endpoint, falling back to all interfaces on `port`.
    pub fn query_addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let bind = self.bind_query.first().map(String::as_str).unwrap_or("");
        resolve_bind(bind, port)
    }

    pub fn query_read_size(&self) -> usize {
        if self.read_buffer > 0 {
            self.read_buffer
        } else {
            DEFAULT_QUERY_READ_SIZE
        }
    }

    pub fn socket_read_buffer(&self) -> usize {
        if self.read_buffer > 0 {
            self.read_buffer
        } else {
            DEFAULT_SOCKET_BUFFER
        }
    }

    pub fn socket_write_buffer(&self) -> usize {
        if self.write_buffer > 0 {
            self.write_buffer
        } else {
            DEFAULT_SOCKET_BUFFER
        }
    }
}

/// Parses a bind address; empty means `0.0.0.0:<port>` and a bare `:port`
/// means all interfaces on that port.
fn resolve_bind(bind: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let addr = if bind.is_empty() {
        format!("0.0.0.0:{}", port)
    } else if bind.starts_with(':') {
        format!("0.0.0.0{}", bind)
    } else {
        bind.to_string()
    };

    addr.parse().map_err(|source| ConfigError::InvalidAddress {
        addr: bind.to_string(),
        source,
    })
}
