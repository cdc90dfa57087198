use crate::view::{ClientWorldView, FeatureToggles};
use macroquad::prelude::*;
use shared::{Entity, WORLD_HALF_EXTENT};

const SHIP_LENGTH: f32 = 3.0;
const SHIP_WIDTH: f32 = 2.0;

/// World units of margin around the play area
const VIEW_MARGIN: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct HudInfo {
    pub toggles: FeatureToggles,
    pub connected: bool,
    pub rtt_ms: Option<f32>,
    pub show_history: bool,
}

/// Converts 0xAARRGGBB into a macroquad color
pub fn entity_color(argb: u32) -> Color {
    Color::from_rgba(
        ((argb >> 16) & 0xFF) as u8,
        ((argb >> 8) & 0xFF) as u8,
        (argb & 0xFF) as u8,
        ((argb >> 24) & 0xFF) as u8,
    )
}

/// Nose, then the two rear corners of a ship centred on `(x, y)`
pub fn ship_vertices(x: f32, y: f32, ori: f32) -> [Vec2; 3] {
    let fwd = vec2(ori.cos(), ori.sin());
    let left = vec2(-fwd.y, fwd.x);
    let center = vec2(x, y);
    let half_len = SHIP_LENGTH * 0.5;
    let half_width = SHIP_WIDTH * 0.5;

    [
        center + fwd * half_len,
        center - fwd * half_len - left * half_width,
        center - fwd * half_len + left * half_width,
    ]
}

pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Renderer
    }

    pub fn render(&mut self, view: &ClientWorldView, hud: &HudInfo) {
        clear_background(GRAY);

        set_camera(&self.world_camera());
        self.draw_border();

        for entity in view.entities() {
            let is_local = Some(entity.id) == view.controlled();
            self.draw_entity(entity, is_local);
        }

        if hud.show_history {
            self.draw_history(view);
        }

        set_default_camera();
        self.draw_ui(view, hud);
    }

    fn world_camera(&self) -> Camera2D {
        let width = screen_width().max(1.0);
        let height = screen_height().max(1.0);
        let visible = 2.0 * (WORLD_HALF_EXTENT + VIEW_MARGIN);

        // Fit the whole world into the shorter window side, y pointing down
        let zoom = if width >= height {
            vec2(2.0 / visible * height / width, -2.0 / visible)
        } else {
            vec2(2.0 / visible, -2.0 / visible * width / height)
        };

        Camera2D {
            target: Vec2::ZERO,
            zoom,
            ..Default::default()
        }
    }

    fn draw_border(&mut self) {
        let side = 2.0 * WORLD_HALF_EXTENT;
        draw_rectangle_lines(
            -WORLD_HALF_EXTENT,
            -WORLD_HALF_EXTENT,
            side,
            side,
            0.2,
            Color::from_rgba(68, 68, 68, 255),
        );
    }

    fn draw_entity(&mut self, entity: &Entity, is_local: bool) {
        let [nose, rear_left, rear_right] = ship_vertices(entity.x, entity.y, entity.ori);
        draw_triangle(nose, rear_left, rear_right, entity_color(entity.color));

        if is_local {
            draw_triangle_lines(nose, rear_left, rear_right, 0.15, WHITE);
        }
    }

    /// Predicted trail plus the last position the server reported
    fn draw_history(&mut self, view: &ClientWorldView) {
        let prediction = view.prediction();

        for record in prediction.state_history() {
            draw_circle(
                record.state.x,
                record.state.y,
                0.12,
                Color::from_rgba(0, 170, 255, 160),
            );
        }

        if let Some(server) = prediction.server_state() {
            draw_circle_lines(server.x, server.y, 0.8, 0.1, YELLOW);
        }
    }

    fn draw_ui(&mut self, view: &ClientWorldView, hud: &HudInfo) {
        let y_start = 10.0;
        let indicator_size = 12.0;
        let spacing = 25.0;

        let features = [
            ("P", hud.toggles.prediction),
            ("R", hud.toggles.reconciliation),
            ("I", hud.toggles.interpolation),
            ("G", hud.show_history),
        ];

        for (i, (label, enabled)) in features.iter().enumerate() {
            let x = 10.0 + (i as f32) * spacing;
            let color = if *enabled { GREEN } else { RED };

            draw_rectangle(x, y_start, indicator_size, indicator_size, color);
            draw_rectangle_lines(x, y_start, indicator_size, indicator_size, 1.0, WHITE);

            draw_text(label, x + 3.0, y_start + indicator_size + 12.0, 12.0, WHITE);
        }

        let connection_color = if hud.connected && view.controlled().is_some() {
            GREEN
        } else {
            RED
        };
        draw_rectangle(10.0, y_start + 35.0, 8.0, 8.0, connection_color);
        draw_text("CON", 20.0, y_start + 35.0 + 8.0, 12.0, WHITE);

        let prediction = view.prediction();
        let own_score = view
            .controlled()
            .and_then(|id| view.score(id))
            .unwrap_or(0);

        let lines = [
            match hud.rtt_ms {
                Some(rtt) => format!("RTT {:.0}ms", rtt),
                None => "RTT --".to_string(),
            },
            format!("{} entities", view.entities().len()),
            format!("Score {}", own_score),
            format!("Corrections {}", prediction.corrections()),
            format!("Error {:.3}", prediction.last_error()),
        ];

        for (i, line) in lines.iter().enumerate() {
            draw_text(line, 10.0, y_start + 60.0 + i as f32 * 14.0, 14.0, WHITE);
        }

        draw_text(
            "Arrows/WASD move  1/2/3 toggle netcode  G history  Esc quit",
            10.0,
            screen_height() - 10.0,
            14.0,
            LIGHTGRAY,
        );
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_entity_color_channels() {
        let color = entity_color(0xFF44_8800);
        assert_approx_eq!(color.r, 0x44 as f32 / 255.0);
        assert_approx_eq!(color.g, 0x88 as f32 / 255.0);
        assert_approx_eq!(color.b, 0.0);
        assert_approx_eq!(color.a, 1.0);
    }

    #[test]
    fn test_ship_points_along_heading() {
        let [nose, rear_left, rear_right] = ship_vertices(1.0, 2.0, 0.0);

        assert_approx_eq!(nose.x, 1.0 + SHIP_LENGTH / 2.0);
        assert_approx_eq!(nose.y, 2.0);
        assert_approx_eq!(rear_left.x, 1.0 - SHIP_LENGTH / 2.0);
        assert_approx_eq!(rear_right.x, 1.0 - SHIP_LENGTH / 2.0);
        assert_approx_eq!((rear_left.y - rear_right.y).abs(), SHIP_WIDTH);
    }

    #[test]
    fn test_ship_rotates_with_orientation() {
        let [nose, _, _] = ship_vertices(0.0, 0.0, std::f32::consts::FRAC_PI_2);

        assert_approx_eq!(nose.x, 0.0, 1e-5);
        assert_approx_eq!(nose.y, SHIP_LENGTH / 2.0, 1e-5);
    }
}
