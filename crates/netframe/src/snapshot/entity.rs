use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

use super::interpolate::{Interpolate, lerp_angle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Projectile = 1,
    Item = 2,
    Static = 3,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Player,
            1 => Self::Projectile,
            2 => Self::Item,
            _ => Self::Static,
        }
    }
}

/// Wire form of one entity inside a world snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityState {
    pub id: u32,
    pub kind: u8,
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub yaw: f32,
    pub flags: u16,
}

impl EntityState {
    pub fn new(id: u32, kind: EntityKind) -> Self {
        Self {
            id,
            kind: kind as u8,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> EntityKind {
        EntityKind::from(self.kind)
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::from(self.velocity)
    }
}

impl Interpolate for EntityState {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self) {
        out.id = from.id;
        <[f32; 3]>::interpolate(&from.position, &to.position, t, &mut out.position);
        <[f32; 3]>::interpolate(&from.velocity, &to.velocity, t, &mut out.velocity);
        out.yaw = lerp_angle(from.yaw, to.yaw, t);

        // Discrete fields snap at the midpoint.
        let nearest = if t < 0.5 { from } else { to };
        out.kind = nearest.kind;
        out.flags = nearest.flags;
    }
}
