//! Keyboard sampling and debug toggles

use macroquad::prelude::*;
use shared::Controls;

/// Key presses detected this frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleEvents {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
    pub history_overlay: bool,
    pub quit: bool,
}

impl ToggleEvents {
    pub fn any(&self) -> bool {
        self.prediction || self.reconciliation || self.interpolation || self.history_overlay
    }
}

/// Throttle is up minus down, steer is right minus left
pub fn controls_from_keys(up: bool, down: bool, left: bool, right: bool) -> Controls {
    let axis = |positive: bool, negative: bool| -> f32 {
        (if positive { 1.0 } else { 0.0 }) - (if negative { 1.0 } else { 0.0 })
    };
    Controls::new(axis(up, down), axis(right, left))
}

/// Samples movement keys and detects presses of the toggle keys
pub struct InputManager {
    // Previous frame key states for edge detection
    prev_key_1: bool,
    prev_key_2: bool,
    prev_key_3: bool,
    prev_key_g: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            prev_key_1: false,
            prev_key_2: false,
            prev_key_3: false,
            prev_key_g: false,
        }
    }

    /// Current controls and the toggle keys pressed since the last call
    pub fn update(&mut self) -> (ToggleEvents, Controls) {
        // Arrow keys and WASD
        let up = is_key_down(KeyCode::Up) || is_key_down(KeyCode::W);
        let down = is_key_down(KeyCode::Down) || is_key_down(KeyCode::S);
        let left = is_key_down(KeyCode::Left) || is_key_down(KeyCode::A);
        let right = is_key_down(KeyCode::Right) || is_key_down(KeyCode::D);

        let key_1 = is_key_down(KeyCode::Key1);
        let key_2 = is_key_down(KeyCode::Key2);
        let key_3 = is_key_down(KeyCode::Key3);
        let key_g = is_key_down(KeyCode::G);

        let toggles = self.detect_presses(key_1, key_2, key_3, key_g, is_key_pressed(KeyCode::Escape));

        (toggles, controls_from_keys(up, down, left, right))
    }

    fn detect_presses(
        &mut self,
        key_1: bool,
        key_2: bool,
        key_3: bool,
        key_g: bool,
        quit: bool,
    ) -> ToggleEvents {
        let toggles = ToggleEvents {
            prediction: key_1 && !self.prev_key_1,
            reconciliation: key_2 && !self.prev_key_2,
            interpolation: key_3 && !self.prev_key_3,
            history_overlay: key_g && !self.prev_key_g,
            quit,
        };

        self.prev_key_1 = key_1;
        self.prev_key_2 = key_2;
        self.prev_key_3 = key_3;
        self.prev_key_g = key_g;

        toggles
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
