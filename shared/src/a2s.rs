//! A2S_INFO responder
//!
//! Stateless: every well-formed info request is answered directly. Integers are
//! little-endian and strings are null-terminated.

use crate::error::QueryError;
use crate::state::SharedState;
use crate::wire::{self, LittleEndianWriter, WireError, WireReader};
use crate::{QueryProtocol, QueryResponder};
use std::net::SocketAddr;

pub const INFO_REQUEST: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x54];
pub const INFO_RESPONSE: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x49];

/// Payload a Source engine client appends to the request header
pub const INFO_REQUEST_PAYLOAD: &[u8] = b"Source Engine Query\0";

const PROTOCOL_VERSION: u8 = 1;
const PLACEHOLDER: &str = "n/a";

/// Host platform reported in the info block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Linux,
    Windows,
    Mac,
}

impl Environment {
    /// Maps an OS name as found in `std::env::consts::OS`. Unknown platforms
    /// report as Linux.
    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Environment::Windows,
            "macos" | "darwin" => Environment::Mac,
            _ => Environment::Linux,
        }
    }

    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Environment::Linux => b'l',
            Environment::Windows => b'w',
            Environment::Mac => b'm',
        }
    }
}

struct InfoResponse {
    header: [u8; 5],
    protocol: u8,
    server_name: String,
    map: String,
    folder: String,
    game: String,
    app_id: i16,
    players: u8,
    max_players: u8,
    bots: u8,
    server_type: u8,
    environment: u8,
    visibility: u8,
    vac: u8,
}
wire_record!(InfoResponse {
    header,
    protocol,
    server_name,
    map,
    folder,
    game,
    app_id,
    players,
    max_players,
    bots,
    server_type,
    environment,
    visibility,
    vac,
});

#[derive(Debug)]
pub struct A2sResponder {
    state: SharedState,
    environment: Environment,
}

impl A2sResponder {
    /// Responder answering from `state`.
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            environment: Environment::current(),
        }
    }

    fn handle_info_request(&self) -> Result<Vec<u8>, QueryError> {
        let mut resp = InfoResponse {
            header: INFO_RESPONSE,
            protocol: PROTOCOL_VERSION,
            server_name: PLACEHOLDER.to_string(),
            map: PLACEHOLDER.to_string(),
            folder: PLACEHOLDER.to_string(),
            game: PLACEHOLDER.to_string(),
            app_id: 0,
            players: 0,
            max_players: 0,
            bots: 0,
            server_type: 0,
            environment: self.environment.as_byte(),
            visibility: 0,
            vac: 0,
        };

        if let Some(state) = self.state.snapshot() {
            resp.server_name = state.server_name.clone();
            resp.map = state.map.clone();
            resp.game = state.game_type.clone();
            // Counts above 255 wrap, the field is a single byte
            resp.players = state.current_players() as u8;
            resp.max_players = state.max_players as u8;
        }

        Ok(wire::encode::<LittleEndianWriter, _>(&resp)?)
    }
}

impl QueryResponder for A2sResponder {
    fn respond(&mut self, _client: SocketAddr, buf: &[u8]) -> Result<Vec<u8>, QueryError> {
        if buf.len() >= INFO_REQUEST.len() && buf[..5] == INFO_REQUEST {
            return self.handle_info_request();
        }

        Err(QueryError::unsupported(buf))
    }

    fn protocol(&self) -> QueryProtocol {
        QueryProtocol::A2s
    }
}

/// Builds a full A2S_INFO request packet.
pub fn info_request() -> Vec<u8> {
    let mut packet = INFO_REQUEST.to_vec();
    packet.extend_from_slice(INFO_REQUEST_PAYLOAD);
    packet
}

/// A decoded A2S_INFO reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReply {
    pub protocol: u8,
    pub server_name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: i16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: u8,
    pub environment: u8,
    pub visibility: u8,
    pub vac: u8,
}

pub fn parse_info_reply(buf: &[u8]) -> Result<InfoReply, WireError> {
    let mut reader = WireReader::new(buf);
    let header = reader.get_raw(INFO_RESPONSE.len())?;
    if header != INFO_RESPONSE {
        return Err(WireError::UnexpectedHeader(header[4]));
    }

    Ok(InfoReply {
        protocol: reader.get_u8()?,
        server_name: reader.get_cstring()?,
        map: reader.get_cstring()?,
        folder: reader.get_cstring()?,
        game: reader.get_cstring()?,
        app_id: reader.get_i16_le()?,
        players: reader.get_u8()?,
        max_players: reader.get_u8()?,
        bots: reader.get_u8()?,
        server_type: reader.get_u8()?,
        environment: reader.get_u8()?,
        visibility: reader.get_u8()?,
        vac: reader.get_u8()?,
    })
}
