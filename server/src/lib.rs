//! # Box Arena Server Library
//!
//! Authoritative server for a small top-down arena: players walk around,
//! pick up guns, and shoot at destructible boxes. The server owns the one
//! true copy of the world and pushes a full snapshot of it to every client
//! whenever anything changes.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only send intents (`MOVE`, `SHOOT`, `PICKUP`). The server applies
//! them to the world, advances bullets on a gated tick, and resolves bullet
//! hits against boxes.
//!
//! ### Client Management
//! Connections are keyed by UDP address. A client joins with `CONNECT`,
//! leaves with `DISCONNECT`, and is dropped after a period of silence. Its
//! player is removed in every case.
//!
//! ### State Broadcasting
//! Every applied event and every tick produce a full-state broadcast. There
//! are no deltas; at this scale the snapshot is small.
//!
//! ## Architecture Design
//!
//! ### Single Mutation Point
//! All handlers and the tick run inside one `tokio::select!` loop that owns
//! the [`game::GameState`]. Helper tasks receive datagrams, send datagrams,
//! and watch for timeouts, but never touch the world.
//!
//! ### JSON over UDP
//! Each datagram carries one JSON object tagged with `type`; see
//! [`shared::ClientMessage`] and [`shared::ServerMessage`].
//!
//! ## Module Organization
//!
//! - `client_manager`: connection tracking, capacity, and timeouts
//! - `config`: runtime settings
//! - `error`: recoverable rule-handler failures
//! - `game`: world mutation rules, the bullet step, and the tick gate
//! - `network`: sockets, channels, and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 12345,
//!         ..Default::default()
//!     };
//!
//!     let mut server = Server::new(&config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
