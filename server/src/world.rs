//! Authoritative entity set owned by the server loop
//!
//! The world keeps every spawned entity, which peer controls it and the last
//! client input frame applied to it. That frame goes out as `ack_frame` in
//! each snapshot so the owning client can line the snapshot up with its own
//! prediction history.

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{step, Controls, Entity, EntityId, PeerId, Snapshot, INVALID_ENTITY};
use std::collections::HashMap;
use std::f32::consts::PI;

/// Spawn coordinates are picked from `{0, 5, 10, 15}` on each axis
const SPAWN_GRID_STEP: f32 = 5.0;
const SPAWN_GRID_CELLS: u32 = 4;

/// Color channels are multiples of this value
const COLOR_CHANNEL_STEP: u32 = 0x44;
const COLOR_CHANNEL_LEVELS: u32 = 5;

pub struct WorldState {
    entities: Vec<Entity>,
    /// Controlling peer of each entity still attached to one
    owners: HashMap<EntityId, PeerId>,
    /// Last client frame applied per entity
    ack_frames: HashMap<EntityId, u32>,
    next_id: EntityId,
    /// Server ticks simulated so far
    pub tick: u32,
    rng: StdRng,
}

impl WorldState {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// World with reproducible spawn placement
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            entities: Vec::new(),
            owners: HashMap::new(),
            ack_frames: HashMap::new(),
            next_id: 0,
            tick: 0,
            rng,
        }
    }

    /// Creates an entity controlled by `owner` at a random spawn point.
    ///
    /// Ids are handed out in increasing order and never reused; `None` once
    /// the id space is exhausted.
    pub fn spawn_entity(&mut self, owner: PeerId) -> Option<EntityId> {
        if self.next_id == INVALID_ENTITY {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let x = self.rng.gen_range(0..SPAWN_GRID_CELLS) as f32 * SPAWN_GRID_STEP;
        let y = self.rng.gen_range(0..SPAWN_GRID_CELLS) as f32 * SPAWN_GRID_STEP;
        let ori = self.rng.gen_range(0.0..PI);
        let color = self.random_color();

        self.entities.push(Entity::new(id, x, y, ori, color));
        self.owners.insert(id, owner);
        self.ack_frames.insert(id, 0);

        info!(
            "Spawned entity {} for peer {} at ({}, {})",
            id, owner, x, y
        );
        Some(id)
    }

    fn random_color(&mut self) -> u32 {
        let mut channel = || self.rng.gen_range(0..COLOR_CHANNEL_LEVELS) * COLOR_CHANNEL_STEP;
        let (r, g, b) = (channel(), channel(), channel());
        0xFF00_0000 | (r << 16) | (g << 8) | b
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id == id)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity currently controlled by `peer`
    pub fn entity_of(&self, peer: PeerId) -> Option<EntityId> {
        self.owners
            .iter()
            .find(|(_, owner)| **owner == peer)
            .map(|(id, _)| *id)
    }

    pub fn owner_of(&self, id: EntityId) -> Option<PeerId> {
        self.owners.get(&id).copied()
    }

    /// Overwrites the entity's controls and records `frame` as acknowledged.
    ///
    /// Inputs are not sequenced: the last one to arrive wins. Returns false
    /// for an unknown entity.
    pub fn apply_input(&mut self, id: EntityId, controls: Controls, frame: u32) -> bool {
        match self.get_mut(id) {
            Some(entity) => {
                entity.controls = controls;
                self.ack_frames.insert(id, frame);
                true
            }
            None => false,
        }
    }

    pub fn ack_frame(&self, id: EntityId) -> u32 {
        self.ack_frames.get(&id).copied().unwrap_or(0)
    }

    /// Advances every entity by `dt` and counts the tick
    pub fn step_all(&mut self, dt: f32) {
        for entity in &mut self.entities {
            step(entity, dt);
        }
        self.tick = self.tick.wrapping_add(1);
    }

    /// One snapshot per entity for the current tick
    pub fn snapshots(&self, timestamp_ms: u64) -> Vec<Snapshot> {
        self.entities
            .iter()
            .map(|entity| Snapshot::of(entity, timestamp_ms, self.tick, self.ack_frame(entity.id)))
            .collect()
    }

    /// Detaches `peer` from its entity. The entity itself stays in the world
    /// and keeps its last controls.
    pub fn release_peer(&mut self, peer: PeerId) -> Option<EntityId> {
        let id = self.entity_of(peer)?;
        self.owners.remove(&id);
        Some(id)
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.id == id)?;
        self.owners.remove(&id);
        self.ack_frames.remove(&id);
        info!("Removed entity {}", id);
        Some(self.entities.remove(index))
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}
