//! # Authoritative Server
//!
//! The server owns the canonical copy of every entity. Clients only send
//! their controls; the server applies them, steps the world at a fixed
//! 60 Hz and broadcasts a snapshot of every entity each tick.
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! The authoritative entity set: spawning with randomized placement, peer
//! ownership, the last acknowledged input frame per entity and snapshot
//! generation.
//!
//! ### Network Module (`network`)
//! The server loop. Transport events are handled as they arrive; a tokio
//! interval feeds a fixed-step accumulator and each due tick steps the world,
//! broadcasts snapshots and, once per sync interval, the server clock.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("0.0.0.0:10131", ServerConfig::default()).await?;
//!
//!     // Runs until Ctrl+C
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod world;
