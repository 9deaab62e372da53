use log::debug;
use shared::wire::WireError;
use shared::{a2s, sqp};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const MAX_DATAGRAM: usize = 1400;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("malformed reply: {0}")]
    Wire(#[from] WireError),
}

/// UDP socket bound for talking to one query endpoint
pub struct QueryProbe {
    socket: UdpSocket,
    server: SocketAddr,
    wait: Duration,
}

impl QueryProbe {
    /// `wait` bounds each individual reply.
    pub async fn connect(server: SocketAddr, wait: Duration) -> Result<Self, ProbeError> {
        let local = if server.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        Ok(Self {
            socket,
            server,
            wait,
        })
    }

    /// Runs the SQP challenge handshake and requests the server info chunk.
    pub async fn sqp(&self) -> Result<sqp::QueryReply, ProbeError> {
        let reply = self.exchange(&sqp::CHALLENGE_REQUEST).await?;
        let challenge = sqp::parse_challenge(&reply)?;
        debug!("challenge from {}: {:#010x}", self.server, challenge);

        let reply = self
            .exchange(&sqp::query_request(challenge, sqp::SERVER_INFO_CHUNK))
            .await?;
        Ok(sqp::parse_query_reply(&reply)?)
    }

    /// Sends one A2S_INFO request.
    pub async fn a2s(&self) -> Result<a2s::InfoReply, ProbeError> {
        let reply = self.exchange(&a2s::info_request()).await?;
        Ok(a2s::parse_info_reply(&reply)?)
    }

    async fn exchange(&self, packet: &[u8]) -> Result<Vec<u8>, ProbeError> {
        self.socket.send(packet).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = timeout(self.wait, self.socket.recv(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout(self.wait))??;
        buf.truncate(len);
        Ok(buf)
    }
}
