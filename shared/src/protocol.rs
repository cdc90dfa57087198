//! Message catalogue exchanged between client and server
//!
//! Every packet starts with a one-byte [`MessageType`] tag followed by the
//! fixed fields of that message, written through [`BitBuffer`]. Decoding is
//! strict: each decoder reads exactly what its encoder wrote and rejects
//! anything shorter or longer.

use crate::codec::{BitBuffer, CodecError};
use crate::entity::{Controls, Entity, EntityId, KinematicState};
use crate::transport::Channel;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Join = 0,
    Input = 1,
    State = 2,
    NewEntity = 3,
    SetControlledEntity = 4,
    Snapshot = 5,
    TimeSync = 6,
    EntityRemoved = 7,
    ScoreUpdate = 8,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        let kind = match tag {
            0 => MessageType::Join,
            1 => MessageType::Input,
            2 => MessageType::State,
            3 => MessageType::NewEntity,
            4 => MessageType::SetControlledEntity,
            5 => MessageType::Snapshot,
            6 => MessageType::TimeSync,
            7 => MessageType::EntityRemoved,
            8 => MessageType::ScoreUpdate,
            other => return Err(CodecError::UnknownMessageType(other)),
        };
        Ok(kind)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for messages the server sends to clients
    pub fn is_server_to_client(self) -> bool {
        !matches!(
            self,
            MessageType::Join | MessageType::Input | MessageType::State
        )
    }
}

/// Control input for one client frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputMessage {
    pub entity_id: EntityId,
    /// Client frame number the controls were sampled at
    pub frame: u32,
    pub throttle: f32,
    pub steer: f32,
}

impl InputMessage {
    pub fn controls(&self) -> Controls {
        Controls::new(self.throttle, self.steer)
    }
}

/// Authoritative sample of one entity at one server tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub entity_id: EntityId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub ori: f32,
    pub omega: f32,
    /// Server clock in milliseconds since the server started
    pub timestamp_ms: u64,
    /// Server tick the sample was taken at
    pub frame: u32,
    /// Last client input frame applied to this entity, 0 if none
    pub ack_frame: u32,
}

impl Snapshot {
    pub fn of(entity: &Entity, timestamp_ms: u64, frame: u32, ack_frame: u32) -> Self {
        Self {
            entity_id: entity.id,
            x: entity.x,
            y: entity.y,
            vx: entity.vx,
            vy: entity.vy,
            ori: entity.ori,
            omega: entity.omega,
            timestamp_ms,
            frame,
            ack_frame,
        }
    }

    pub fn kinematics(&self) -> KinematicState {
        KinematicState {
            x: self.x,
            y: self.y,
            vx: self.vx,
            vy: self.vy,
            ori: self.ori,
            omega: self.omega,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Join,
    Input(InputMessage),
    /// Client-reported position from the pre-prediction protocol
    State {
        entity_id: EntityId,
        x: f32,
        y: f32,
    },
    NewEntity(Entity),
    SetControlledEntity {
        entity_id: EntityId,
    },
    Snapshot(Snapshot),
    TimeSync {
        server_time_ms: u64,
    },
    EntityRemoved {
        entity_id: EntityId,
    },
    ScoreUpdate {
        entity_id: EntityId,
        score: i32,
    },
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Join => MessageType::Join,
            Message::Input(_) => MessageType::Input,
            Message::State { .. } => MessageType::State,
            Message::NewEntity(_) => MessageType::NewEntity,
            Message::SetControlledEntity { .. } => MessageType::SetControlledEntity,
            Message::Snapshot(_) => MessageType::Snapshot,
            Message::TimeSync { .. } => MessageType::TimeSync,
            Message::EntityRemoved { .. } => MessageType::EntityRemoved,
            Message::ScoreUpdate { .. } => MessageType::ScoreUpdate,
        }
    }

    /// Channel the message is sent on
    pub fn channel(&self) -> Channel {
        match self.kind() {
            MessageType::Input | MessageType::State | MessageType::Snapshot => {
                Channel::Unreliable
            }
            _ => Channel::Reliable,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitBuffer::with_capacity(48);
        bs.write_value(self.kind().tag());

        match self {
            Message::Join => {}
            Message::Input(input) => {
                bs.write_value(input.entity_id);
                bs.write_value(input.frame);
                bs.write_value(input.throttle);
                bs.write_value(input.steer);
            }
            Message::State { entity_id, x, y } => {
                bs.write_value(*entity_id);
                bs.write_value(*x);
                bs.write_value(*y);
            }
            Message::NewEntity(entity) => write_entity(&mut bs, entity),
            Message::SetControlledEntity { entity_id } | Message::EntityRemoved { entity_id } => {
                bs.write_value(*entity_id);
            }
            Message::Snapshot(snapshot) => write_snapshot(&mut bs, snapshot),
            Message::TimeSync { server_time_ms } => bs.write_value(*server_time_ms),
            Message::ScoreUpdate { entity_id, score } => {
                bs.write_value(*entity_id);
                bs.write_value(*score);
            }
        }

        bs.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
        let mut bs = BitBuffer::from_bytes(data);
        let kind = MessageType::from_tag(bs.read_value::<u8>()?)?;

        let message = match kind {
            MessageType::Join => Message::Join,
            MessageType::Input => Message::Input(InputMessage {
                entity_id: bs.read_value()?,
                frame: bs.read_value()?,
                throttle: bs.read_value()?,
                steer: bs.read_value()?,
            }),
            MessageType::State => Message::State {
                entity_id: bs.read_value()?,
                x: bs.read_value()?,
                y: bs.read_value()?,
            },
            MessageType::NewEntity => Message::NewEntity(read_entity(&mut bs)?),
            MessageType::SetControlledEntity => Message::SetControlledEntity {
                entity_id: bs.read_value()?,
            },
            MessageType::Snapshot => Message::Snapshot(read_snapshot(&mut bs)?),
            MessageType::TimeSync => Message::TimeSync {
                server_time_ms: bs.read_value()?,
            },
            MessageType::EntityRemoved => Message::EntityRemoved {
                entity_id: bs.read_value()?,
            },
            MessageType::ScoreUpdate => Message::ScoreUpdate {
                entity_id: bs.read_value()?,
                score: bs.read_value()?,
            },
        };

        let trailing = bs.remaining_bits() / 8;
        if trailing > 0 {
            return Err(CodecError::TrailingBytes(trailing));
        }

        Ok(message)
    }
}

/// Reads only the type tag of a packet
pub fn peek_type(data: &[u8]) -> Result<MessageType, CodecError> {
    let mut bs = BitBuffer::from_bytes(data);
    MessageType::from_tag(bs.read_value::<u8>()?)
}

fn write_entity(bs: &mut BitBuffer, entity: &Entity) {
    bs.write_value(entity.id);
    bs.write_value(entity.x);
    bs.write_value(entity.y);
    bs.write_value(entity.vx);
    bs.write_value(entity.vy);
    bs.write_value(entity.ori);
    bs.write_value(entity.omega);
    bs.write_value(entity.color);
    bs.write_value(entity.controls.throttle);
    bs.write_value(entity.controls.steer);
}

fn read_entity(bs: &mut BitBuffer) -> Result<Entity, CodecError> {
    Ok(Entity {
        id: bs.read_value()?,
        x: bs.read_value()?,
        y: bs.read_value()?,
        vx: bs.read_value()?,
        vy: bs.read_value()?,
        ori: bs.read_value()?,
        omega: bs.read_value()?,
        color: bs.read_value()?,
        controls: Controls {
            throttle: bs.read_value()?,
            steer: bs.read_value()?,
        },
    })
}

fn write_snapshot(bs: &mut BitBuffer, snapshot: &Snapshot) {
    bs.write_value(snapshot.entity_id);
    bs.write_value(snapshot.x);
    bs.write_value(snapshot.y);
    bs.write_value(snapshot.vx);
    bs.write_value(snapshot.vy);
    bs.write_value(snapshot.ori);
    bs.write_value(snapshot.omega);
    bs.write_value(snapshot.timestamp_ms);
    bs.write_value(snapshot.frame);
    bs.write_value(snapshot.ack_frame);
}

fn read_snapshot(bs: &mut BitBuffer) -> Result<Snapshot, CodecError> {
    Ok(Snapshot {
        entity_id: bs.read_value()?,
        x: bs.read_value()?,
        y: bs.read_value()?,
        vx: bs.read_value()?,
        vy: bs.read_value()?,
        ori: bs.read_value()?,
        omega: bs.read_value()?,
        timestamp_ms: bs.read_value()?,
        frame: bs.read_value()?,
        ack_frame: bs.read_value()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> Entity {
        Entity {
            id: 7,
            x: 12.5,
            y: -3.25,
            vx: 0.1,
            vy: -0.2,
            ori: 1.5,
            omega: 0.05,
            color: 0xFF44_8844,
            controls: Controls::new(1.0, -1.0),
        }
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            entity_id: 4,
            x: 29.9,
            y: -29.9,
            vx: 1.0e-7,
            vy: 3.5,
            ori: -3.0,
            omega: 0.3,
            timestamp_ms: 1_234_567_890_123,
            frame: 4_000_000,
            ack_frame: 3_999_990,
        }
    }

    fn all_messages() -> Vec<Message> {
        vec![
            Message::Join,
            Message::Input(InputMessage {
                entity_id: 2,
                frame: 99,
                throttle: -0.3,
                steer: 1.0,
            }),
            Message::State {
                entity_id: 2,
                x: 1.0,
                y: 2.0,
            },
            Message::NewEntity(sample_entity()),
            Message::SetControlledEntity { entity_id: 7 },
            Message::Snapshot(sample_snapshot()),
            Message::TimeSync {
                server_time_ms: 86_400_000,
            },
            // Past the range of a u32 millisecond counter
            Message::TimeSync {
                server_time_ms: u64::from(u32::MAX) + 1_000,
            },
            Message::EntityRemoved { entity_id: 11 },
            Message::ScoreUpdate {
                entity_id: 7,
                score: -42,
            },
        ]
    }

    #[test]
    fn test_every_message_roundtrips() {
        for message in all_messages() {
            let bytes = message.encode();
            assert_eq!(bytes[0], message.kind().tag());

            let decoded = Message::decode(&bytes).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(Message::Join.encode().len(), 1);
        assert_eq!(Message::SetControlledEntity { entity_id: 1 }.encode().len(), 3);
        assert_eq!(Message::TimeSync { server_time_ms: 0 }.encode().len(), 9);
        // tag + id + 6 floats + u64 + 2 * u32
        assert_eq!(Message::Snapshot(sample_snapshot()).encode().len(), 1 + 2 + 24 + 8 + 8);
        // tag + id + 6 floats + color + 2 floats
        assert_eq!(Message::NewEntity(sample_entity()).encode().len(), 1 + 2 + 24 + 4 + 8);
    }

    #[test]
    fn test_snapshot_float_bits_survive() {
        let mut snapshot = sample_snapshot();
        snapshot.x = f32::from_bits(0x7FC0_0001);
        snapshot.y = -0.0;

        let bytes = Message::Snapshot(snapshot).encode();
        match Message::decode(&bytes).unwrap() {
            Message::Snapshot(decoded) => {
                assert_eq!(decoded.x.to_bits(), 0x7FC0_0001);
                assert_eq!(decoded.y.to_bits(), (-0.0f32).to_bits());
                assert_eq!(decoded.frame, snapshot.frame);
            }
            other => panic!("Wrong message after decode: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_packet_is_rejected() {
        let bytes = Message::Snapshot(sample_snapshot()).encode();

        for len in 1..bytes.len() {
            match Message::decode(&bytes[..len]) {
                Err(CodecError::TruncatedBuffer { .. }) => {}
                other => panic!("Expected truncation error at len {}, got {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_empty_packet_is_rejected() {
        assert!(matches!(
            Message::decode(&[]),
            Err(CodecError::TruncatedBuffer { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert_eq!(
            Message::decode(&[200, 1, 2]),
            Err(CodecError::UnknownMessageType(200))
        );
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut bytes = Message::SetControlledEntity { entity_id: 3 }.encode();
        bytes.extend_from_slice(&[0, 0]);

        assert_eq!(Message::decode(&bytes), Err(CodecError::TrailingBytes(2)));
    }

    #[test]
    fn test_channels() {
        assert_eq!(Message::Join.channel(), Channel::Reliable);
        assert_eq!(Message::Snapshot(sample_snapshot()).channel(), Channel::Unreliable);
        assert_eq!(
            Message::Input(InputMessage {
                entity_id: 0,
                frame: 1,
                throttle: 0.0,
                steer: 0.0,
            })
            .channel(),
            Channel::Unreliable
        );
        assert_eq!(Message::TimeSync { server_time_ms: 5 }.channel(), Channel::Reliable);
        assert_eq!(Message::EntityRemoved { entity_id: 1 }.channel(), Channel::Reliable);
    }

    #[test]
    fn test_direction_of_message_types() {
        assert!(!MessageType::Join.is_server_to_client());
        assert!(!MessageType::Input.is_server_to_client());
        assert!(!MessageType::State.is_server_to_client());
        assert!(MessageType::Snapshot.is_server_to_client());
        assert!(MessageType::ScoreUpdate.is_server_to_client());
    }

    #[test]
    fn test_peek_type() {
        let bytes = Message::EntityRemoved { entity_id: 3 }.encode();
        assert_eq!(peek_type(&bytes), Ok(MessageType::EntityRemoved));
        assert_eq!(peek_type(&[9]), Err(CodecError::UnknownMessageType(9)));
    }

    #[test]
    fn test_snapshot_from_entity() {
        let entity = sample_entity();
        let snapshot = Snapshot::of(&entity, 500, 30, 29);

        assert_eq!(snapshot.entity_id, entity.id);
        assert_eq!(snapshot.kinematics(), entity.kinematics());
        assert_eq!(snapshot.timestamp_ms, 500);
        assert_eq!(snapshot.frame, 30);
        assert_eq!(snapshot.ack_frame, 29);
    }
}
