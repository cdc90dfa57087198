use crate::WORLD_HALF_EXTENT;

/// Server-assigned entity identifier
pub type EntityId = u16;

/// Reserved id that never names a live entity
pub const INVALID_ENTITY: EntityId = u16::MAX;

pub const ACCEL_FORWARD: f32 = 3.5;
pub const ACCEL_BRAKE: f32 = 12.0;
pub const THROTTLE_MIN: f32 = -0.3;
pub const THROTTLE_MAX: f32 = 3.0;
pub const STEER_RATE: f32 = 0.3;

/// Control inputs owned by whoever drives the entity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Controls {
    pub throttle: f32,
    pub steer: f32,
}

impl Controls {
    pub fn new(throttle: f32, steer: f32) -> Self {
        Self { throttle, steer }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Orientation in radians
    pub ori: f32,
    /// Angular velocity in radians per second
    pub omega: f32,
    /// Display color as 0xAARRGGBB
    pub color: u32,
    pub controls: Controls,
}

impl Entity {
    pub fn new(id: EntityId, x: f32, y: f32, ori: f32, color: u32) -> Self {
        Self {
            id,
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            ori,
            omega: 0.0,
            color,
            controls: Controls::default(),
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

    pub fn set_kinematics(&mut self, state: &KinematicState) {
        self.x = state.x;
        self.y = state.y;
        self.vx = state.vx;
        self.vy = state.vy;
        self.ori = state.ori;
        self.omega = state.omega;
    }

    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The simulated part of an entity: what snapshots and history records carry
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub ori: f32,
    pub omega: f32,
}

impl KinematicState {
    /// Per-field difference `self - other`. Position takes the short way
    /// around the wrapped world.
    pub fn delta_from(&self, other: &KinematicState) -> KinematicState {
        KinematicState {
            x: wrap_coordinate(self.x - other.x, WORLD_HALF_EXTENT),
            y: wrap_coordinate(self.y - other.y, WORLD_HALF_EXTENT),
            vx: self.vx - other.vx,
            vy: self.vy - other.vy,
            ori: self.ori - other.ori,
            omega: self.omega - other.omega,
        }
    }

    pub fn apply_delta(&mut self, delta: &KinematicState) {
        self.x = wrap_coordinate(self.x + delta.x, WORLD_HALF_EXTENT);
        self.y = wrap_coordinate(self.y + delta.y, WORLD_HALF_EXTENT);
        self.vx += delta.vx;
        self.vy += delta.vy;
        self.ori += delta.ori;
        self.omega += delta.omega;
    }
}

/// Wraps a coordinate onto the torus `[-border, border]`
pub fn wrap_coordinate(value: f32, border: f32) -> f32 {
    if value < -border {
        value + 2.0 * border
    } else if value > border {
        value - 2.0 * border
    } else {
        value
    }
}

/// Advances one entity by `dt` seconds.
///
/// Both client prediction and the server call this with the same fixed `dt`;
/// the result depends on nothing but the entity and `dt`.
pub fn step(entity: &mut Entity, dt: f32) {
    let throttle = entity.controls.throttle;
    let braking = throttle < 0.0;
    let accel = if braking { ACCEL_BRAKE } else { ACCEL_FORWARD };
    let va = throttle.clamp(THROTTLE_MIN, THROTTLE_MAX) * accel;

    entity.vx += entity.ori.cos() * va * dt;
    entity.vy += entity.ori.sin() * va * dt;
    entity.omega += entity.controls.steer * dt * STEER_RATE;
    entity.ori += entity.omega * dt;
    entity.x += entity.vx * dt;
    entity.y += entity.vy * dt;

    entity.x = wrap_coordinate(entity.x, WORLD_HALF_EXTENT);
    entity.y = wrap_coordinate(entity.y, WORLD_HALF_EXTENT);
}
