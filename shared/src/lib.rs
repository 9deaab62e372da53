//! # Query Protocol Library
//!
//! Types shared by the hosting shim and the probe client: the reportable match
//! state, the field-ordered wire codec, and the two query protocols answered on
//! the server's UDP query port.
//!
//! ## Protocols
//!
//! ### SQP (`sqp`)
//! Stateful challenge-response protocol. A client must complete a challenge
//! round trip before the server releases its info chunk. Big-endian, strings
//! length-prefixed.
//!
//! ### A2S (`a2s`)
//! Stateless info protocol. Any well-formed info request gets the info block
//! back directly. Little-endian, strings null-terminated.
//!
//! ## Selecting a responder
//!
//! ```rust
//! use shared::{new_responder, QueryProtocol, SharedState};
//!
//! let state = SharedState::new();
//! let responder = new_responder(QueryProtocol::from_name("a2s"), state);
//! assert_eq!(responder.protocol(), QueryProtocol::A2s);
//! ```

#[macro_use]
pub mod wire;

pub mod a2s;
mod error;
pub mod sqp;
pub mod state;

pub use error::QueryError;
pub use state::{GameState, SharedState};

use std::fmt;
use std::net::SocketAddr;

/// Something that answers query datagrams
///
/// An `Err` means the datagram is dropped with no reply.
pub trait QueryResponder: Send {
    fn respond(&mut self, client: SocketAddr, buf: &[u8]) -> Result<Vec<u8>, QueryError>;

    fn protocol(&self) -> QueryProtocol;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryProtocol {
    Sqp,
    A2s,
}

impl QueryProtocol {
    /// Resolves a configured protocol name. Only `"a2s"` selects A2S; every
    /// other value, including the empty string, selects SQP.
    pub fn from_name(name: &str) -> Self {
        match name {
            "a2s" => QueryProtocol::A2s,
            _ => QueryProtocol::Sqp,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryProtocol::Sqp => "sqp",
            QueryProtocol::A2s => "a2s",
        }
    }
}

impl fmt::Display for QueryProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates a fresh responder for `protocol` reading from `state`.
pub fn new_responder(protocol: QueryProtocol, state: SharedState) -> Box<dyn QueryResponder> {
    match protocol {
        QueryProtocol::Sqp => Box::new(sqp::SqpResponder::new(state)),
        QueryProtocol::A2s => Box::new(a2s::A2sResponder::new(state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_selection_defaults_to_sqp() {
        assert_eq!(QueryProtocol::from_name("a2s"), QueryProtocol::A2s);
        assert_eq!(QueryProtocol::from_name("sqp"), QueryProtocol::Sqp);
        assert_eq!(QueryProtocol::from_name(""), QueryProtocol::Sqp);
        assert_eq!(QueryProtocol::from_name("A2S"), QueryProtocol::Sqp);
        assert_eq!(QueryProtocol::from_name("tf2e"), QueryProtocol::Sqp);
    }

    #[test]
    fn test_new_responder_variant() {
        let state = SharedState::new();
        let sqp = new_responder(QueryProtocol::Sqp, state.clone());
        let a2s = new_responder(QueryProtocol::A2s, state);
        assert_eq!(sqp.protocol(), QueryProtocol::Sqp);
        assert_eq!(a2s.protocol(), QueryProtocol::A2s);
    }

    #[test]
    fn test_responders_reject_each_other() {
        let state = SharedState::new();
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let mut sqp = new_responder(QueryProtocol::Sqp, state.clone());
        assert!(sqp.respond(addr, &a2s::info_request()).is_err());

        let mut a2s = new_responder(QueryProtocol::A2s, state);
        assert!(a2s.respond(addr, &sqp::CHALLENGE_REQUEST).is_err());
    }
}
