//! # Shared simulation and wire layer
//!
//! Everything both sides of the connection must agree on lives here: the
//! deterministic entity step, the bit-level codec, the message catalogue and
//! the datagram transport that carries it.
//!
//! ## Determinism
//! Client prediction is only useful when the client runs the exact same
//! simulation as the server. [`entity::step`] is a pure function of the entity
//! state and `dt`, and both sides always call it with [`FIXED_DT`].
//!
//! ## Wire format
//! Messages are encoded field by field through [`codec::BitBuffer`], with all
//! multi-byte values in little-endian order. Decoding is strict: a truncated,
//! unknown or over-long packet is reported as a [`codec::CodecError`] and the
//! caller drops it.

pub mod clock;
pub mod codec;
pub mod entity;
pub mod protocol;
pub mod transport;

pub use clock::{FixedTimestep, ServerClock};
pub use codec::{BitBuffer, CodecError};
pub use entity::{step, Controls, Entity, EntityId, KinematicState, INVALID_ENTITY};
pub use protocol::{InputMessage, Message, MessageType, Snapshot};
pub use transport::{Channel, Host, HostConfig, PeerId, TransportError, TransportEvent};

/// Simulation ticks per second on both client and server.
pub const TICK_RATE: u32 = 60;
/// Fixed simulation step in seconds.
pub const FIXED_DT: f32 = 1.0 / TICK_RATE as f32;

/// Half the side length of the toroidal world.
pub const WORLD_HALF_EXTENT: f32 = 30.0;

/// Well-known server port.
pub const DEFAULT_PORT: u16 = 10131;

/// Rendering lag applied to remote entities, in milliseconds.
pub const INTERPOLATION_DELAY_MS: u64 = 200;

/// Prediction error (world units) above which the client reconciles.
pub const CORRECTION_THRESHOLD: f32 = 0.5;

pub const INPUT_HISTORY_CAPACITY: usize = 100;
pub const STATE_HISTORY_CAPACITY: usize = 200;
