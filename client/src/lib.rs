//! # Probe Client Library
//!
//! Talks to a running hosting shim the way infrastructure and players do.
//!
//! ## Module Organization
//!
//! ### Probe Module (`probe`)
//! Out-of-band status queries over UDP:
//! - SQP challenge handshake followed by a server info request
//! - A2S_INFO single request
//!
//! ### Player Module (`player`)
//! A simulated player on the game port that checks in periodically and
//! collects the server's echo until the match ends.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::probe::QueryProbe;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let probe = QueryProbe::connect("127.0.0.1:8001".parse()?, Duration::from_secs(1)).await?;
//!     let reply = probe.sqp().await?;
//!     if let Some(info) = reply.server_info {
//!         println!("{}/{} players on {}", info.current_players, info.max_players, info.map);
//!     }
//!     Ok(())
//! }
//! ```

pub mod player;
pub mod probe;
