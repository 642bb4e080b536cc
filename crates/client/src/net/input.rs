use netframe::{Buttons, UserCommand};

#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub move_direction: [f32; 3],
    pub view_yaw: f32,
    pub view_pitch: f32,
    pub sprint: bool,
    pub jump: bool,
    pub crouch: bool,
    pub fire: bool,
    pub use_key: bool,
}

impl InputState {
    pub fn to_command(&self) -> UserCommand {
        let mut cmd = UserCommand::default();
        cmd.encode_move_direction(self.move_direction);
        cmd.encode_view_angles(self.view_yaw, self.view_pitch);

        cmd.buttons.set(Buttons::SPRINT, self.sprint);
        cmd.buttons.set(Buttons::JUMP, self.jump);
        cmd.buttons.set(Buttons::CROUCH, self.crouch);
        cmd.buttons.set(Buttons::FIRE, self.fire);
        cmd.buttons.set(Buttons::USE, self.use_key);

        cmd
    }
}
