use std::collections::BTreeMap;

use glam::Vec3;

use netframe::{Buttons, EntityKind, EntityState, Frame, UserCommand, WorldSnapshot};

const WALK_SPEED: f32 = 5.0;
const SPRINT_SPEED: f32 = 10.0;
const SPAWN_SPACING: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct Avatar {
    pub id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
}

impl Avatar {
    pub fn new(id: u32, position: Vec3) -> Self {
        Self {
            id,
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
        }
    }

    pub fn to_state(&self) -> EntityState {
        let mut state = EntityState::new(self.id, EntityKind::Player);
        state.position = self.position.to_array();
        state.velocity = self.velocity.to_array();
        state.yaw = self.yaw;
        state
    }
}

pub fn apply_command(avatar: &mut Avatar, command: &UserCommand, dt: f32) {
    let move_dir = command.decode_move_direction();
    let (yaw, _pitch) = command.decode_view_angles();

    let speed = if command.buttons.contains(Buttons::SPRINT) {
        SPRINT_SPEED
    } else {
        WALK_SPEED
    };

    let move_vec = Vec3::from(move_dir);
    if move_vec.length_squared() > 0.001 {
        let normalized = move_vec.normalize();

        let (sin_yaw, cos_yaw) = yaw.sin_cos();
        let world_move = Vec3::new(
            normalized.x * cos_yaw + normalized.z * sin_yaw,
            normalized.y,
            -normalized.x * sin_yaw + normalized.z * cos_yaw,
        );

        avatar.velocity = world_move * speed;
        avatar.position += avatar.velocity * dt;
    } else {
        avatar.velocity = Vec3::ZERO;
    }

    avatar.yaw = yaw;
}

/// One avatar per connected peer.
#[derive(Debug, Default)]
pub struct World {
    avatars: BTreeMap<String, Avatar>,
    next_id: u32,
}

impl World {
    pub fn spawn(&mut self, peer_id: &str) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        let spawn = Vec3::new(id as f32 * SPAWN_SPACING, 0.0, 0.0);
        self.avatars.insert(peer_id.to_string(), Avatar::new(id, spawn));
        id
    }

    pub fn despawn(&mut self, peer_id: &str) -> Option<Avatar> {
        self.avatars.remove(peer_id)
    }

    pub fn avatar_mut(&mut self, peer_id: &str) -> Option<&mut Avatar> {
        self.avatars.get_mut(peer_id)
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn snapshot(&self, frame: Frame, server_time_ms: f64) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(frame, server_time_ms);
        snapshot.entities = self.avatars.values().map(Avatar::to_state).collect();
        snapshot
    }
}
