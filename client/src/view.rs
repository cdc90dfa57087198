//! Client mirror of the server's entities
//!
//! The view owns every entity the server has announced, the prediction engine
//! for the one this client controls and an interpolator per remote entity.
//! Server messages are applied through [`ClientWorldView::apply_message`].

use crate::interpolation::Interpolator;
use crate::prediction::PredictionEngine;
use log::{debug, info, warn};
use shared::{
    Controls, Entity, EntityId, InputMessage, Message, ServerClock, Snapshot,
    INTERPOLATION_DELAY_MS,
};
use std::collections::HashMap;

/// Debug switches for the three halves of the netcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureToggles {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            prediction: true,
            reconciliation: true,
            interpolation: true,
        }
    }
}

pub struct ClientWorldView {
    entities: Vec<Entity>,
    /// Entity id to slot in `entities`
    index: HashMap<EntityId, usize>,
    controlled: Option<EntityId>,
    interpolators: HashMap<EntityId, Interpolator>,
    prediction: PredictionEngine,
    scores: HashMap<EntityId, i32>,
    clock: ServerClock,
    /// Newest snapshot timestamp seen, used until the clock is synced
    latest_server_ms: u64,
    pub toggles: FeatureToggles,
}

impl ClientWorldView {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            controlled: None,
            interpolators: HashMap::new(),
            prediction: PredictionEngine::new(),
            scores: HashMap::new(),
            clock: ServerClock::new(),
            latest_server_ms: 0,
            toggles: FeatureToggles::default(),
        }
    }

    /// Applies one message from the server. `rtt_ms` is the current round
    /// trip estimate, used for clock sync.
    pub fn apply_message(&mut self, message: Message, rtt_ms: f32) {
        match message {
            Message::NewEntity(entity) => self.add_entity(entity),
            Message::SetControlledEntity { entity_id } => {
                if self.controlled != Some(entity_id) {
                    info!("Now controlling entity {}", entity_id);
                    self.controlled = Some(entity_id);
                    self.prediction.reset();
                    self.interpolators.remove(&entity_id);
                }
            }
            Message::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            Message::TimeSync { server_time_ms } => {
                self.clock.sync(server_time_ms, rtt_ms);
            }
            Message::EntityRemoved { entity_id } => {
                self.remove_entity(entity_id);
            }
            Message::ScoreUpdate { entity_id, score } => {
                self.scores.insert(entity_id, score);
            }
            other => warn!("Unexpected {:?} from server", other.kind()),
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.latest_server_ms = self.latest_server_ms.max(snapshot.timestamp_ms);

        let Some(&slot) = self.index.get(&snapshot.entity_id) else {
            debug!("Snapshot for unknown entity {}", snapshot.entity_id);
            return;
        };

        if self.controlled == Some(snapshot.entity_id) {
            let entity = &mut self.entities[slot];
            self.prediction.on_snapshot(entity, &snapshot);
            if !self.toggles.prediction {
                // Mirroring the server leaves nothing to correct
                entity.set_kinematics(&snapshot.kinematics());
                self.prediction.clear_correction();
            }
        } else {
            self.interpolators
                .entry(snapshot.entity_id)
                .or_default()
                .push(snapshot);
        }
    }

    /// Runs one fixed client tick for the controlled entity: a pending
    /// correction first, then prediction with `controls`.
    ///
    /// Returns the INPUT to send, or `None` while no entity is controlled.
    pub fn predict(&mut self, controls: Controls, timestamp_ms: u64) -> Option<InputMessage> {
        let entity_id = self.controlled?;
        let slot = *self.index.get(&entity_id)?;
        let entity = &mut self.entities[slot];

        if self.toggles.prediction
            && self.toggles.reconciliation
            && self.prediction.needs_correction()
        {
            self.prediction.reconcile(entity);
        }

        let command = self
            .prediction
            .advance(entity, controls, timestamp_ms, self.toggles.prediction);

        Some(InputMessage {
            entity_id,
            frame: command.frame,
            throttle: command.controls.throttle,
            steer: command.controls.steer,
        })
    }

    /// Server time remote entities are rendered at
    pub fn render_time_ms(&self) -> u64 {
        let now = self.clock.now_ms().unwrap_or(self.latest_server_ms);
        now.saturating_sub(INTERPOLATION_DELAY_MS)
    }

    /// Moves every remote entity to its pose at `target_ms`
    pub fn interpolate(&mut self, target_ms: u64) {
        for (id, interpolator) in self.interpolators.iter_mut() {
            if Some(*id) == self.controlled {
                continue;
            }
            let pose = if self.toggles.interpolation {
                interpolator.sample(target_ms)
            } else {
                interpolator.newest()
            };

            if let (Some(pose), Some(&slot)) = (pose, self.index.get(id)) {
                let entity = &mut self.entities[slot];
                entity.x = pose.x;
                entity.y = pose.y;
                entity.ori = pose.ori;
            }
        }
    }

    /// Adds or replaces an entity
    pub fn add_entity(&mut self, entity: Entity) {
        match self.index.get(&entity.id).copied() {
            Some(slot) => self.entities[slot] = entity,
            None => {
                self.index.insert(entity.id, self.entities.len());
                self.entities.push(entity);
                debug!("New entity {}", entity.id);
            }
        }
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.index.remove(&id)?;
        let removed = self.entities.remove(slot);
        self.index = self
            .entities
            .iter()
            .enumerate()
            .map(|(slot, entity)| (entity.id, slot))
            .collect();

        self.interpolators.remove(&id);
        self.scores.remove(&id);
        if self.controlled == Some(id) {
            self.controlled = None;
            self.prediction.reset();
        }
        info!("Entity {} removed", id);
        Some(removed)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&slot| &self.entities[slot])
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot = *self.index.get(&id)?;
        self.entities.get_mut(slot)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn controlled(&self) -> Option<EntityId> {
        self.controlled
    }

    pub fn controlled_entity(&self) -> Option<&Entity> {
        self.entity(self.controlled?)
    }

    pub fn score(&self, id: EntityId) -> Option<i32> {
        self.scores.get(&id).copied()
    }

    pub fn prediction(&self) -> &PredictionEngine {
        &self.prediction
    }

    pub fn interpolator(&self, id: EntityId) -> Option<&Interpolator> {
        self.interpolators.get(&id)
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }
}

impl Default for ClientWorldView {
    fn default() -> Self {
        Self::new()
    }
}
