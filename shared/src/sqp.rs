//! Server Query Protocol (SQP) responder
//!
//! SQP is a challenge-response protocol. A client first sends a 5-byte zero
//! packet and receives a random challenge, then echoes that challenge in a
//! query packet to receive the requested chunks. Only the server info chunk is
//! implemented, always delivered in a single packet.
//!
//! Challenge reply:
//!
//! ```text
//! +--------+-------------------+
//! | 0x00   | challenge (u32)   |
//! +--------+-------------------+
//! ```
//!
//! Query reply (all integers big-endian, strings 1-byte length-prefixed):
//!
//! ```text
//! header(1) challenge(4) version(2) current_packet(1) last_packet(1)
//! payload_length(2) [server_info_length(4) server_info(..)]
//! ```

use crate::error::QueryError;
use crate::state::{GameState, SharedState};
use crate::wire::{self, BigEndianWriter, WireError, WireReader};
use crate::{QueryProtocol, QueryResponder};
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;

pub const CHALLENGE_REQUEST: [u8; 5] = [0, 0, 0, 0, 0];
pub const CHALLENGE_HEADER: u8 = 0;
pub const QUERY_HEADER: u8 = 1;
pub const SQP_VERSION: u16 = 1;

/// Chunk bitmask bit requesting the server info block
pub const SERVER_INFO_CHUNK: u8 = 0x01;

const QUERY_PACKET_LEN: usize = 8;

struct ChallengeResponse {
    header: u8,
    challenge: u32,
}
wire_record!(ChallengeResponse { header, challenge });

struct QueryResponse {
    header: u8,
    challenge: u32,
    version: u16,
    current_packet: u8,
    last_packet: u8,
    payload_length: u16,
    server_info: Option<ServerInfoChunk>,
}
wire_record!(QueryResponse {
    header,
    challenge,
    version,
    current_packet,
    last_packet,
    payload_length,
    server_info,
});

struct ServerInfoChunk {
    length: u32,
    info: ServerInfo,
}
wire_record!(ServerInfoChunk { length, info });

/// The server info chunk as carried on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub current_players: u16,
    pub max_players: u16,
    pub server_name: String,
    pub game_type: String,
    pub build_id: String,
    pub map: String,
    pub port: u16,
}
wire_record!(ServerInfo {
    current_players,
    max_players,
    server_name,
    game_type,
    build_id,
    map,
    port,
});

impl ServerInfo {
    /// Converts the published state; an unallocated server reports zeroes.
    pub fn from_state(state: Option<&GameState>) -> Self {
        match state {
            Some(state) => Self {
                current_players: state.current_players() as u16,
                max_players: state.max_players as u16,
                server_name: state.server_name.clone(),
                game_type: state.game_type.clone(),
                build_id: String::new(),
                map: state.map.clone(),
                port: state.port,
            },
            None => Self::default(),
        }
    }

    /// Number of bytes this chunk occupies on the wire.
    pub fn wire_size(&self) -> usize {
        2 + 2
            + 1 + self.server_name.len()
            + 1 + self.game_type.len()
            + 1 + self.build_id.len()
            + 1 + self.map.len()
            + 2
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            current_players: reader.get_u16()?,
            max_players: reader.get_u16()?,
            server_name: reader.get_prefixed_string()?,
            game_type: reader.get_prefixed_string()?,
            build_id: reader.get_prefixed_string()?,
            map: reader.get_prefixed_string()?,
            port: reader.get_u16()?,
        })
    }
}

/// Responds to SQP queries, tracking one outstanding challenge per client
///
/// The responder is owned by a single read loop, so the challenge table needs
/// no locking.
#[derive(Debug)]
pub struct SqpResponder {
    challenges: HashMap<SocketAddr, u32>,
    state: SharedState,
}

impl SqpResponder {
    /// Responder answering from `state`, with no challenges issued yet.
    pub fn new(state: SharedState) -> Self {
        Self {
            challenges: HashMap::new(),
            state,
        }
    }

    fn handle_challenge(&mut self, client: SocketAddr) -> Result<Vec<u8>, QueryError> {
        let challenge = OsRng.next_u32();
        self.challenges.insert(client, challenge);
        debug!("issued sqp challenge to {}", client);

        let resp = ChallengeResponse {
            header: CHALLENGE_HEADER,
            challenge,
        };
        Ok(wire::encode::<BigEndianWriter, _>(&resp)?)
    }

    fn handle_query(&mut self, client: SocketAddr, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        let expected = self
            .challenges
            .remove(&client)
            .ok_or(QueryError::NoChallenge)?;

        if buf.len() < QUERY_PACKET_LEN {
            return Err(QueryError::InvalidPacketLength);
        }

        // A wrong challenge is dropped silently, the caller sends nothing
        let challenge = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if challenge != expected {
            return Err(QueryError::ChallengeMismatch);
        }

        let version = u16::from_be_bytes([buf[5], buf[6]]);
        if version != SQP_VERSION {
            return Err(QueryError::UnsupportedSqpVersion(version));
        }

        let requested_chunks = buf[7];
        let mut resp = QueryResponse {
            header: QUERY_HEADER,
            challenge: expected,
            version: SQP_VERSION,
            current_packet: 0,
            last_packet: 0,
            payload_length: 0,
            server_info: None,
        };

        if requested_chunks & SERVER_INFO_CHUNK != 0 {
            let snapshot = self.state.snapshot();
            let info = ServerInfo::from_state(snapshot.as_deref());
            let length = info.wire_size() as u32;
            resp.payload_length = (length + 4) as u16;
            resp.server_info = Some(ServerInfoChunk { length, info });
        }

        Ok(wire::encode::<BigEndianWriter, _>(&resp)?)
    }
}

impl QueryResponder for SqpResponder {
    fn respond(&mut self, client: SocketAddr, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        if buf.len() >= CHALLENGE_REQUEST.len() && buf[..5] == CHALLENGE_REQUEST {
            return self.handle_challenge(client);
        }

        if buf.first() == Some(&QUERY_HEADER) {
            return self.handle_query(client, buf);
        }

        Err(QueryError::unsupported(buf))
    }

    fn protocol(&self) -> QueryProtocol {
        QueryProtocol::Sqp
    }
}

/// Builds a query packet answering `challenge` and requesting `chunks`.
pub fn query_request(challenge: u32, chunks: u8) -> Vec<u8> {
    let mut packet = Vec::with_capacity(QUERY_PACKET_LEN);
    packet.push(QUERY_HEADER);
    packet.extend_from_slice(&challenge.to_be_bytes());
    packet.extend_from_slice(&SQP_VERSION.to_be_bytes());
    packet.push(chunks);
    packet
}

/// Extracts the challenge from a challenge reply.
pub fn parse_challenge(buf: &[u8]) -> Result<u32, WireError> {
    let mut reader = WireReader::new(buf);
    let header = reader.get_u8()?;
    if header != CHALLENGE_HEADER {
        return Err(WireError::UnexpectedHeader(header));
    }
    reader.get_u32()
}

/// A decoded SQP query reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub challenge: u32,
    pub version: u16,
    pub current_packet: u8,
    pub last_packet: u8,
    pub payload_length: u16,
    pub server_info: Option<ServerInfo>,
}

pub fn parse_query_reply(buf: &[u8]) -> Result<QueryReply, WireError> {
    let mut reader = WireReader::new(buf);
    let header = reader.get_u8()?;
    if header != QUERY_HEADER {
        return Err(WireError::UnexpectedHeader(header));
    }

    let mut reply = QueryReply {
        challenge: reader.get_u32()?,
        version: reader.get_u16()?,
        current_packet: reader.get_u8()?,
        last_packet: reader.get_u8()?,
        payload_length: reader.get_u16()?,
        server_info: None,
    };

    if reply.payload_length > 0 {
        let _length = reader.get_u32()?;
        reply.server_info = Some(ServerInfo::decode(&mut reader)?);
    }

    Ok(reply)
}
