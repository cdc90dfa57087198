//! Client-side prediction and server reconciliation for the controlled entity
//!
//! Every fixed tick the client samples its controls, sends them to the server
//! and immediately steps its own copy of the entity with them. The inputs and
//! the resulting states are kept in bounded histories keyed by frame number.
//!
//! Each snapshot of the controlled entity carries `ack_frame`, the last input
//! frame the server applied. The engine compares the snapshot against the
//! state it predicted for that frame. When they diverge by more than
//! [`CORRECTION_THRESHOLD`] a correction is scheduled: the difference is added
//! to every history record from the acknowledged frame on, the entity is reset
//! to the server's state and the inputs the server has not seen yet are
//! replayed on top of it.

use log::debug;
use shared::entity::wrap_coordinate;
use shared::{
    step, Controls, Entity, KinematicState, Snapshot, CORRECTION_THRESHOLD, FIXED_DT,
    INPUT_HISTORY_CAPACITY, STATE_HISTORY_CAPACITY, WORLD_HALF_EXTENT,
};
use std::collections::VecDeque;

/// Controls sampled for one client frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub frame: u32,
    pub controls: Controls,
    /// Local wall clock when the controls were sampled
    pub timestamp_ms: u64,
}

/// Predicted kinematic state after simulating `frame`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateHistoryRecord {
    pub frame: u32,
    pub state: KinematicState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionMode {
    Predicting,
    /// A correction is pending and runs before the next prediction step
    Correcting,
}

pub struct PredictionEngine {
    next_frame: u32,
    input_history: VecDeque<InputCommand>,
    state_history: VecDeque<StateHistoryRecord>,
    server_state: Option<Snapshot>,
    last_acknowledged: Option<u32>,
    pending_correction: bool,
    corrections: u64,
    last_error: f32,
}

impl PredictionEngine {
    pub fn new() -> Self {
        Self {
            next_frame: 1,
            input_history: VecDeque::with_capacity(INPUT_HISTORY_CAPACITY),
            state_history: VecDeque::with_capacity(STATE_HISTORY_CAPACITY),
            server_state: None,
            last_acknowledged: None,
            pending_correction: false,
            corrections: 0,
            last_error: 0.0,
        }
    }

    /// Forgets all history; used when control moves to another entity
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Records one frame of input and, when `simulate` is set, predicts its
    /// effect on `entity`.
    ///
    /// The caller sends the returned command to the server.
    pub fn advance(
        &mut self,
        entity: &mut Entity,
        controls: Controls,
        timestamp_ms: u64,
        simulate: bool,
    ) -> InputCommand {
        let command = InputCommand {
            frame: self.next_frame,
            controls,
            timestamp_ms,
        };
        self.next_frame = self.next_frame.wrapping_add(1);

        self.input_history.push_back(command);
        while self.input_history.len() > INPUT_HISTORY_CAPACITY {
            self.input_history.pop_front();
        }

        entity.controls = controls;
        if simulate {
            step(entity, FIXED_DT);
            self.upsert_record(command.frame, entity.kinematics());
        }

        command
    }

    fn upsert_record(&mut self, frame: u32, state: KinematicState) {
        if let Some(record) = self.state_history.iter_mut().find(|r| r.frame == frame) {
            record.state = state;
            return;
        }

        self.state_history.push_back(StateHistoryRecord { frame, state });
        while self.state_history.len() > STATE_HISTORY_CAPACITY {
            self.state_history.pop_front();
        }
    }

    /// Takes in an authoritative snapshot of the controlled entity.
    ///
    /// Returns true when the prediction error calls for a correction.
    /// Snapshots older than the latest one seen are ignored.
    pub fn on_snapshot(&mut self, entity: &Entity, snapshot: &Snapshot) -> bool {
        if let Some(latest) = &self.server_state {
            if snapshot.ack_frame < latest.ack_frame || snapshot.frame < latest.frame {
                return false;
            }
        }

        let ack = snapshot.ack_frame;
        self.server_state = Some(*snapshot);
        self.last_acknowledged = Some(ack);
        self.input_history.retain(|input| input.frame > ack);

        let (px, py) = match self.record(ack) {
            Some(record) => (record.state.x, record.state.y),
            None => (entity.x, entity.y),
        };
        let dx = wrap_coordinate(snapshot.x - px, WORLD_HALF_EXTENT);
        let dy = wrap_coordinate(snapshot.y - py, WORLD_HALF_EXTENT);
        self.last_error = (dx * dx + dy * dy).sqrt();

        if self.last_error > CORRECTION_THRESHOLD {
            self.pending_correction = true;
        }
        self.pending_correction
    }

    pub fn needs_correction(&self) -> bool {
        self.pending_correction
    }

    /// Forgets a pending correction without applying it
    pub fn clear_correction(&mut self) {
        self.pending_correction = false;
    }

    /// Rebases the prediction on the latest server state.
    ///
    /// Returns false when no snapshot has arrived yet.
    pub fn reconcile(&mut self, entity: &mut Entity) -> bool {
        let Some(server) = self.server_state else {
            self.pending_correction = false;
            return false;
        };
        let ack = server.ack_frame;
        let server_state = server.kinematics();

        if let Some(start) = self.state_history.iter().position(|r| r.frame == ack) {
            let delta = server_state.delta_from(&self.state_history[start].state);
            for record in self.state_history.iter_mut().skip(start) {
                record.state.apply_delta(&delta);
            }
        }

        entity.set_kinematics(&server_state);
        let pending: Vec<InputCommand> = self.input_history.iter().copied().collect();
        for input in &pending {
            entity.controls = input.controls;
            step(entity, FIXED_DT);
            self.upsert_record(input.frame, entity.kinematics());
        }

        self.pending_correction = false;
        self.corrections += 1;
        debug!(
            "Reconciled at frame {} (error {:.3}), replayed {} inputs",
            ack,
            self.last_error,
            pending.len()
        );
        true
    }

    pub fn mode(&self) -> PredictionMode {
        if self.pending_correction {
            PredictionMode::Correcting
        } else {
            PredictionMode::Predicting
        }
    }

    pub fn record(&self, frame: u32) -> Option<&StateHistoryRecord> {
        self.state_history.iter().find(|r| r.frame == frame)
    }

    pub fn input_history(&self) -> &VecDeque<InputCommand> {
        &self.input_history
    }

    pub fn state_history(&self) -> &VecDeque<StateHistoryRecord> {
        &self.state_history
    }

    pub fn server_state(&self) -> Option<&Snapshot> {
        self.server_state.as_ref()
    }

    pub fn last_acknowledged(&self) -> Option<u32> {
        self.last_acknowledged
    }

    /// Frame number the next command will carry
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn last_error(&self) -> f32 {
        self.last_error
    }
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new()
    }
}
