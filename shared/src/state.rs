//! Reportable match state shared between the coordinator and query responders

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Attributes of the currently hosted match
///
/// Everything except the player counter is fixed once the state is published.
/// A new allocation publishes a whole new `GameState` instead of editing one in
/// place, so readers never see a half-updated snapshot.
#[derive(Debug, Default)]
pub struct GameState {
    current_players: AtomicI32,
    pub max_players: i32,
    pub server_name: String,
    pub game_type: String,
    pub map: String,
    pub port: u16,
}

impl GameState {
    pub fn new(
        max_players: i32,
        server_name: impl Into<String>,
        game_type: impl Into<String>,
        map: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            current_players: AtomicI32::new(0),
            max_players,
            server_name: server_name.into(),
            game_type: game_type.into(),
            map: map.into(),
            port,
        }
    }

    pub fn current_players(&self) -> i32 {
        self.current_players.load(Ordering::SeqCst)
    }

    /// Records a connected player and returns the new count.
    pub fn player_joined(&self) -> i32 {
        self.current_players.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records a disconnected player and returns the new count.
    pub fn player_left(&self) -> i32 {
        self.current_players.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Handle to the published [`GameState`], absent while unallocated
///
/// Cloning the handle shares the same slot. The lock is only held for the
/// duration of a pointer copy or swap.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    slot: Arc<RwLock<Option<Arc<GameState>>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published state, returning the previous one.
    pub fn publish(&self, state: Arc<GameState>) -> Option<Arc<GameState>> {
        self.slot.write().replace(state)
    }

    /// Marks the server unallocated, returning the discarded state.
    pub fn clear(&self) -> Option<Arc<GameState>> {
        self.slot.write().take()
    }

    pub fn snapshot(&self) -> Option<Arc<GameState>> {
        self.slot.read().clone()
    }

    pub fn is_allocated(&self) -> bool {
        self.slot.read().is_some()
    }
}
