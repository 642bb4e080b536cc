use netframe::Frame;

use crate::net::InputState;

const TURN_RATE: f32 = 0.02;
const SPRINT_PERIOD: Frame = 300;

/// Scripted input that walks forward while turning, so the avatar traces a
/// circle. Sprints for half of every period.
#[derive(Debug, Clone)]
pub struct Bot {
    turn_rate: f32,
}

impl Default for Bot {
    fn default() -> Self {
        Self {
            turn_rate: TURN_RATE,
        }
    }
}

impl Bot {
    pub fn input_for(&self, frame: Frame) -> InputState {
        InputState {
            move_direction: [0.0, 0.0, 1.0],
            view_yaw: frame as f32 * self.turn_rate,
            sprint: frame % SPRINT_PERIOD >= SPRINT_PERIOD / 2,
            ..Default::default()
        }
    }
}
