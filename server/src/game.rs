//! Allocation lifecycle coordination
//!
//! [`Coordinator`] is the single writer of the published [`GameState`] and the
//! single owner of the live query endpoint and game listener. [`Game`] wraps it
//! in a task that drains a bounded event queue, one event at a time, in arrival
//! order.
//!
//! Transitions tear down old resources before bringing up new ones. A failed
//! bind is logged and the transition stops there; nothing is rolled back.

use crate::client_manager::{ClientManager, GameListener, GameSession, SocketBuffers};
use crate::config::{Config, ConfigError};
use crate::event::Event;
use crate::query::QueryEndpoint;
use crate::watcher::ConfigWatcher;
use log::{error, info, warn};
use shared::{new_responder, GameState, QueryProtocol, SharedState};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Prefix of the server name reported to queries
pub const SERVER_NAME_PREFIX: &str = "hostshim";

const EVENT_QUEUE_CAPACITY: usize = 1;
const TRANSITION_BACKLOG: usize = 16;

/// Failures surfaced by the coordinator
#[derive(Debug, Error)]
pub enum GameError {
    #[error("loading config: {0}")]
    Config(#[from] ConfigError),
    /// The query endpoint could not bind its UDP address.
    #[error("binding query endpoint {addr}: {source}")]
    QueryBind { addr: SocketAddr, source: io::Error },
    /// The game listener could not bind its TCP address.
    #[error("binding game listener {addr}: {source}")]
    GameBind { addr: SocketAddr, source: io::Error },
    #[error("watching config: {0}")]
    Watch(#[from] notify::Error),
    #[error("game already started")]
    AlreadyStarted,
}

/// Addresses currently being served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Endpoints {
    /// UDP address answering server queries
    pub query: Option<SocketAddr>,
    /// TCP address accepting players; only set while allocated
    pub game: Option<SocketAddr>,
}

/// Outcome of one handled lifecycle event
///
/// Exactly one is broadcast per event, in the order events were handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Name of the handled event, as given by [`Event::name`]
    pub event: &'static str,
    /// Allocation the event applied to; empty when none was active
    pub allocation: String,
    /// What is being served once the event has been handled
    pub endpoints: Endpoints,
}

/// Applies lifecycle events to the sockets and the published state
///
/// The coordinator owns the query endpoint and the game session outright, so
/// every transition runs to completion before the next one starts. Readers
/// observe it through the shared state, the endpoints watch, and the
/// transition broadcast.
pub struct Coordinator {
    port: u16,
    query_port: u16,
    state: SharedState,
    clients: Arc<ClientManager>,
    query: Option<QueryEndpoint>,
    session: Option<GameSession>,
    allocation: String,
    endpoints: watch::Sender<Endpoints>,
    transitions: broadcast::Sender<Transition>,
}

impl Coordinator {
    /// `port` and `query_port` are used when the config carries no bind address.
    pub fn new(port: u16, query_port: u16) -> Self {
        Self::with_clients(port, query_port, Arc::new(ClientManager::new()))
    }

    /// Like [`Coordinator::new`], tracking connections in `clients`.
    pub fn with_clients(port: u16, query_port: u16, clients: Arc<ClientManager>) -> Self {
        let (endpoints, _) = watch::channel(Endpoints::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            port,
            query_port,
            state: SharedState::new(),
            clients,
            query: None,
            session: None,
            allocation: String::new(),
            endpoints,
            transitions,
        }
    }

    /// State answered to queries; empty while unallocated.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Registry of connected players across matches.
    pub fn clients(&self) -> &Arc<ClientManager> {
        &self.clients
    }

    /// Addresses served right now.
    pub fn endpoints(&self) -> Endpoints {
        *self.endpoints.borrow()
    }

    /// Watch of the latest served endpoints. Intermediate values may be skipped.
    pub fn subscribe_endpoints(&self) -> watch::Receiver<Endpoints> {
        self.endpoints.subscribe()
    }

    /// One [`Transition`] per handled event, none skipped unless the
    /// receiver lags more than a small backlog.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Applies one event and reports its outcome.
    pub async fn handle(&mut self, event: Event) {
        let name = event.name();
        let allocation = match &event {
            Event::Allocated(config) => config.allocated_uuid.clone(),
            Event::Deallocated(_) => self.allocation.clone(),
        };

        match event {
            Event::Allocated(config) => self.allocated(&config).await,
            Event::Deallocated(config) => self.deallocated(config.as_ref()).await,
        }

        // No subscribers is fine
        let _ = self.transitions.send(Transition {
            event: name,
            allocation,
            endpoints: self.endpoints(),
        });
    }

    /// Starts a match: publishes fresh state, restarts the query endpoint and
    /// opens the game listener.
    pub async fn allocated(&mut self, config: &Config) {
        self.allocation = config.allocated_uuid.clone();

        // A repeated allocation replaces the running match
        self.stop_game().await;

        let listener = match self.bind_game(config) {
            Ok(listener) => listener,
            Err(e) => {
                error!("[{}] error listening on tcp port: {}", self.allocation, e);
                self.state.clear();
                return;
            }
        };

        let state = Arc::new(GameState::new(
            config.max_players as i32,
            format!("{} - {}", SERVER_NAME_PREFIX, config.allocated_uuid),
            config.game_type.clone(),
            config.map.clone(),
            listener.local_addr().port(),
        ));
        self.state.publish(Arc::clone(&state));

        if let Err(e) = self.switch_query_protocol(config).await {
            error!("[{}] error switching query protocol: {}", self.allocation, e);
            return;
        }

        self.session = Some(self.clients.launch(listener, state));
        self.publish_endpoints();
        info!("[{}] allocated", self.allocation);
    }

    /// Ends the match. The query endpoint keeps answering, restarted with
    /// `config` when one is given.
    pub async fn deallocated(&mut self, config: Option<&Config>) {
        self.stop_game().await;
        self.state.clear();

        if let Some(config) = config {
            if let Err(e) = self.switch_query_protocol(config).await {
                error!("error switching query protocol: {}", e);
            }
        }

        self.publish_endpoints();
        if self.allocation.is_empty() {
            info!("deallocated");
        } else {
            info!("[{}] deallocated", self.allocation);
        }
        self.allocation.clear();
    }

    /// Replaces the query endpoint with one serving the configured protocol.
    ///
    /// The old endpoint is closed before the new one binds. On error no
    /// endpoint is left running.
    pub async fn switch_query_protocol(&mut self, config: &Config) -> Result<(), GameError> {
        let protocol = QueryProtocol::from_name(&config.query_type);
        let responder = new_responder(protocol, self.state.clone());

        if let Some(old) = self.query.take() {
            old.shutdown().await;
            self.publish_endpoints();
        }

        let addr = config.query_addr(self.query_port)?;
        let endpoint = QueryEndpoint::start(addr, responder, config.query_read_size())
            .await
            .map_err(|source| GameError::QueryBind { addr, source })?;

        self.query = Some(endpoint);
        self.publish_endpoints();
        Ok(())
    }

    /// Closes everything this coordinator owns and waits for its tasks.
    pub async fn shutdown(&mut self) {
        self.stop_game().await;
        self.state.clear();
        if let Some(query) = self.query.take() {
            query.shutdown().await;
        }
        self.publish_endpoints();
    }

    fn bind_game(&self, config: &Config) -> Result<GameListener, GameError> {
        let addr = config.game_addr(self.port)?;
        let buffers = SocketBuffers {
            read: config.socket_read_buffer(),
            write: config.socket_write_buffer(),
        };
        GameListener::bind(addr, buffers).map_err(|source| GameError::GameBind { addr, source })
    }

    async fn stop_game(&mut self) {
        self.clients.disconnect_all();
        if let Some(session) = self.session.take() {
            session.close().await;
            self.publish_endpoints();
        }
    }

    fn publish_endpoints(&self) {
        self.endpoints.send_replace(Endpoints {
            query: self.query.as_ref().map(QueryEndpoint::local_addr),
            game: self.session.as_ref().map(GameSession::local_addr),
        });
    }
}

/// The hosting shim: a coordinator fed by the config watcher and any other
/// signal source holding an [`Game::events`] sender
pub struct Game {
    config_path: PathBuf,
    events: mpsc::Sender<Event>,
    receiver: Option<mpsc::Receiver<Event>>,
    coordinator: Option<Coordinator>,
    state: SharedState,
    clients: Arc<ClientManager>,
    endpoints: watch::Receiver<Endpoints>,
    transitions: broadcast::Sender<Transition>,
    shutdown: watch::Sender<bool>,
    processor: Option<JoinHandle<()>>,
    watcher: Option<ConfigWatcher>,
}

impl Game {
    pub fn new(config_path: impl Into<PathBuf>, port: u16, query_port: u16) -> Self {
        let coordinator = Coordinator::new(port, query_port);
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            config_path: config_path.into(),
            events,
            receiver: Some(receiver),
            state: coordinator.state().clone(),
            clients: Arc::clone(coordinator.clients()),
            endpoints: coordinator.subscribe_endpoints(),
            transitions: coordinator.transitions.clone(),
            coordinator: Some(coordinator),
            shutdown,
            processor: None,
            watcher: None,
        }
    }

    /// Loads the config, opens the query endpoint and starts processing events.
    ///
    /// Failing to open the first query endpoint is returned to the caller.
    pub async fn start(&mut self) -> Result<(), GameError> {
        let (mut coordinator, receiver) = match (self.coordinator.take(), self.receiver.take()) {
            (Some(coordinator), Some(receiver)) => (coordinator, receiver),
            _ => return Err(GameError::AlreadyStarted),
        };

        let config = Config::from_file(&self.config_path)?;
        coordinator.switch_query_protocol(&config).await?;

        self.processor = Some(tokio::spawn(process_events(
            coordinator,
            receiver,
            self.shutdown.subscribe(),
        )));

        match ConfigWatcher::start(&self.config_path, self.events.clone()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => {
                self.stop_processor().await;
                return Err(e.into());
            }
        }

        let endpoints = self.endpoints();
        info!(
            "server started: query {:?}, protocol {}",
            endpoints.query,
            QueryProtocol::from_name(&config.query_type)
        );
        Ok(())
    }

    /// Stops watching, deallocates, and waits for every owned task to finish.
    pub async fn stop(mut self) {
        info!("stopping");
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }

        if self.processor.is_some() && self.events.send(Event::Deallocated(None)).await.is_err() {
            warn!("event processor already gone");
        }
        self.stop_processor().await;
        info!("stopped");
    }

    /// Sender feeding the lifecycle queue.
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn clients(&self) -> &Arc<ClientManager> {
        &self.clients
    }

    pub fn endpoints(&self) -> Endpoints {
        *self.endpoints.borrow()
    }

    /// Outcome of every event handled from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    async fn stop_processor(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(processor) = self.processor.take() {
            if let Err(e) = processor.await {
                error!("event processor panicked: {}", e);
            }
        }
    }
}

/// Handles events one at a time until shutdown, then releases everything.
///
/// Queued events are drained ahead of the shutdown signal.
async fn process_events(
    mut coordinator: Coordinator,
    mut events: mpsc::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => coordinator.handle(event).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    coordinator.shutdown().await;
}
