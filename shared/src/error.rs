use crate::wire::WireError;
use thiserror::Error;

/// Reasons a query datagram was dropped without a reply
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no challenge")]
    NoChallenge,
    #[error("invalid packet length")]
    InvalidPacketLength,
    #[error("challenge mismatch")]
    ChallengeMismatch,
    #[error("unsupported sqp version: {0}")]
    UnsupportedSqpVersion(u16),
    #[error("unsupported query: {0:02x?}")]
    UnsupportedQuery(Vec<u8>),
    #[error("encoding response: {0}")]
    Wire(#[from] WireError),
}

impl QueryError {
    /// Builds an `UnsupportedQuery` carrying at most the first five header bytes.
    pub fn unsupported(buf: &[u8]) -> Self {
        QueryError::UnsupportedQuery(buf.iter().take(5).copied().collect())
    }
}
