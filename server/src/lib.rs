//! # Hosting Shim Library
//!
//! A minimal dedicated server that plays the part of a real game under a
//! hosting platform. The platform drives allocation by rewriting a JSON config
//! file; the shim reacts by starting or stopping a match and keeps answering
//! server queries on a UDP port throughout.
//!
//! ## Core Responsibilities
//!
//! ### Lifecycle
//! Allocation and deallocation events are applied strictly one at a time, in
//! arrival order. Each transition tears down what the previous one started
//! before bringing up anything new.
//!
//! ### Server Queries
//! A single UDP endpoint answers either SQP or A2S, chosen by the config's
//! `QueryType`. Both read the same published match state, so a query never
//! sees a half-updated match.
//!
//! ### Game Traffic
//! While allocated, a TCP listener accepts players, counts them, and echoes
//! whatever they send. Every connection is closed on deallocation or after two
//! minutes, whichever comes first.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The lifecycle coordinator and the [`game::Game`] handle used by `main`:
//! - Bounded event queue feeding a single processing task
//! - Published match state and served endpoints
//! - Startup and graceful stop
//!
//! ### Config and Watcher Modules (`config`, `watcher`)
//! - Config file decoding with platform defaults
//! - File change notifications turned into [`event::Event`]s
//!
//! ### Query Modules (`bind`, `query`)
//! - Closable UDP binding with per-write deadlines
//! - Read loop dispatching datagrams to a responder from `shared`
//!
//! ### Client Manager Module (`client_manager`)
//! - TCP listener with configurable socket buffers
//! - Registry of open connections and per-connection echo tasks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::Game;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Game port 8000 and query port 8001 are used when the config
//!     // file does not name bind addresses
//!     let mut game = Game::new("/srv/server.json", 8000, 8001);
//!     game.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     game.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bind;
pub mod client_manager;
pub mod config;
pub mod event;
pub mod game;
pub mod query;
pub mod watcher;
