//! # Ship Client Library
//!
//! Client half of the netcode demo. The controlled ship is simulated locally
//! the moment a key is pressed and corrected when the server disagrees; every
//! other ship is drawn a little in the past, blended between snapshots.
//!
//! ## Modules
//!
//! - [`prediction`]: input and state history, snapshot comparison and replay
//! - [`interpolation`]: per-entity snapshot buffer sampled at a render time
//! - [`view`]: the client's mirror of every entity, fed by server messages
//! - [`input`]: keyboard sampling and the debug toggles
//! - [`rendering`]: macroquad drawing of ships and the HUD
//! - [`network`]: the transport thread and the frame loop that ties it together
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::network::Client;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = Client::new("127.0.0.1:10131".parse()?, 0)?;
//! client.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The pieces can also be driven without a window, which is how the
//! integration tests exercise them:
//!
//! ```
//! use client::view::ClientWorldView;
//! use shared::{Controls, Entity, Message};
//!
//! let mut view = ClientWorldView::new();
//! view.apply_message(Message::NewEntity(Entity::new(1, 0.0, 0.0, 0.0, 0xFFFFFFFF)), 0.0);
//! view.apply_message(Message::SetControlledEntity { entity_id: 1 }, 0.0);
//!
//! let input = view.predict(Controls::new(1.0, 0.0), 0).unwrap();
//! assert_eq!(input.frame, 1);
//! ```

pub mod input;
pub mod interpolation;
pub mod network;
pub mod prediction;
pub mod rendering;
pub mod view;
