//! Game transport: TCP listener and per-connection tasks
//!
//! This module stands in for real game traffic while the server is allocated:
//! - Accepting TCP connections on the game port
//! - Tracking each open connection so deallocation can close them all
//! - Keeping the published player count in step with connects and disconnects
//! - Echoing received bytes back until the connection ends or its deadline lapses
//!
//! Each connection runs in its own task, and that task is the only one that
//! removes the connection from the registry and decrements the player count.

use dashmap::DashMap;
use log::{debug, error, info, warn};
use shared::GameState;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout_at, Instant};

/// How long a connection may stay open after it is accepted
pub const CLIENT_DEADLINE: Duration = Duration::from_secs(2 * 60);

const READ_CHUNK: usize = 16;
const LISTEN_BACKLOG: u32 = 1024;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Kernel buffer sizes applied to the game listener's sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketBuffers {
    pub read: usize,
    pub write: usize,
}

/// Bound game listener, not yet accepting
///
/// Binding ahead of [`ClientManager::launch`] lets the caller learn the port
/// actually bound before it builds the state the accept loop reports into.
#[derive(Debug)]
pub struct GameListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl GameListener {
    /// Binds `addr` with SO_REUSEADDR and the given kernel buffer sizes.
    pub fn bind(addr: SocketAddr, buffers: SocketBuffers) -> io::Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_recv_buffer_size(buffers.read as u32)?;
        socket.set_send_buffer_size(buffers.write as u32)?;
        socket.bind(addr)?;

        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound, with the real port when 0 was asked for.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Accepts until the session's close switch is flipped
async fn accept(
    listener: &TcpListener,
    closed: &mut watch::Receiver<bool>,
) -> Result<(TcpStream, SocketAddr), ListenerError> {
    if *closed.borrow() {
        return Err(ListenerError::Closed);
    }

    tokio::select! {
        _ = closed.changed() => Err(ListenerError::Closed),
        res = listener.accept() => Ok(res?),
    }
}

/// Registry of open game connections
///
/// Maps each connection's remote address to the switch that tells its task
/// to hang up.
#[derive(Debug)]
pub struct ClientManager {
    clients: DashMap<SocketAddr, watch::Sender<bool>>,
    deadline: Duration,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    /// Registry whose connections are dropped after two minutes.
    pub fn new() -> Self {
        Self::with_deadline(CLIENT_DEADLINE)
    }

    /// Registry whose connections are dropped `deadline` after accept.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            deadline,
        }
    }

    /// Starts accepting connections on `listener`.
    ///
    /// Connected players are counted on `state`. The returned session owns
    /// the accept loop and every connection task it spawns.
    pub fn launch(self: &Arc<Self>, listener: GameListener, state: Arc<GameState>) -> GameSession {
        let local_addr = listener.local_addr;
        let (closer, closed) = watch::channel(false);

        let task = tokio::spawn(accept_clients(
            listener.listener,
            closed,
            Arc::clone(self),
            state,
        ));

        info!("game listening on {}", local_addr);
        GameSession {
            closer,
            task,
            local_addr,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Tells every open connection to close. Returns how many were signalled.
    ///
    /// Entries stay registered until their own task has finished with them.
    pub fn disconnect_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.clients.iter() {
            entry.value().send_replace(true);
            signalled += 1;
        }
        if signalled > 0 {
            info!("disconnecting {} clients", signalled);
        }
        signalled
    }

    fn register(&self, addr: SocketAddr) -> watch::Receiver<bool> {
        let (hangup, rx) = watch::channel(false);
        self.clients.insert(addr, hangup);
        rx
    }

    fn deregister(&self, addr: &SocketAddr) {
        self.clients.remove(addr);
    }
}

/// A running game listener
///
/// Owns the accept loop and every connection it accepted;
/// [`GameSession::close`] hangs up on all of them.
pub struct GameSession {
    closer: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl GameSession {
    /// Address players connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and waits until it and every connection it accepted
    /// have finished.
    pub async fn close(self) {
        self.closer.send_replace(true);
        if let Err(e) = self.task.await {
            error!("accept loop panicked: {}", e);
        }
    }
}

async fn accept_clients(
    listener: TcpListener,
    mut closed: watch::Receiver<bool>,
    manager: Arc<ClientManager>,
    state: Arc<GameState>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept(&listener, &mut closed) => match accepted {
                Ok((stream, addr)) => {
                    let hangup = manager.register(addr);
                    let players = state.player_joined();
                    info!("client connected: {}, players: {}", addr, players);

                    let deadline = Instant::now() + manager.deadline;
                    connections.spawn(handle_client(
                        stream,
                        addr,
                        Arc::clone(&manager),
                        Arc::clone(&state),
                        hangup,
                        deadline,
                    ));
                }
                Err(ListenerError::Closed) => {
                    debug!("server closed");
                    break;
                }
                Err(e) => {
                    warn!("error accepting client: {}", e);
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("client task panicked: {}", e);
                }
            }
        }
    }

    // Free the port before waiting on stragglers
    drop(listener);
    manager.disconnect_all();
    while let Some(finished) = connections.join_next().await {
        if let Err(e) = finished {
            error!("client task panicked: {}", e);
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    manager: Arc<ClientManager>,
    state: Arc<GameState>,
    mut hangup: watch::Receiver<bool>,
    deadline: Instant,
) {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let echoed = tokio::select! {
            _ = hangup.changed() => break,
            res = timeout_at(deadline, echo(&mut stream, &mut buf)) => res,
        };

        match echoed {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("connection {} ended: {}", addr, e);
                break;
            }
            Err(_) => {
                debug!("connection {} deadline exceeded", addr);
                break;
            }
        }
    }

    manager.deregister(&addr);
    let players = state.player_left();
    info!("client disconnected: {}, players: {}", addr, players);
}

/// Reads one chunk and writes it back. Returns 0 at end of stream.
async fn echo(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let len = stream.read(buf).await?;
    if len > 0 {
        stream.write_all(&buf[..len]).await?;
    }
    Ok(len)
}
