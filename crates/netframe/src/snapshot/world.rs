use rkyv::rancor;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::Frame;
use crate::net::PacketError;

use super::entity::EntityState;
use super::interpolate::{Framed, Interpolate};

/// Authoritative world state for one simulation frame.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct WorldSnapshot {
    pub frame: Frame,
    /// Server timeline position of `frame`, in milliseconds.
    pub server_time_ms: f64,
    /// Newest client frame whose command the server has simulated for the
    /// receiving peer.
    pub last_command_frame: Frame,
    pub entities: Vec<EntityState>,
}

impl WorldSnapshot {
    pub fn new(frame: Frame, server_time_ms: f64) -> Self {
        Self {
            frame,
            server_time_ms,
            last_command_frame: 0,
            entities: Vec::new(),
        }
    }

    pub fn entity(&self, id: u32) -> Option<&EntityState> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn to_bytes(&self) -> Result<AlignedVec, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)
    }

    /// Decodes and validates an archived snapshot. The input does not need to
    /// be aligned.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}

impl Framed for WorldSnapshot {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Blends entity states and server time. The result keeps the lower
/// bracket's `frame` and `last_command_frame`, since a fractional frame has
/// no tag of its own.
impl Interpolate for WorldSnapshot {
    fn interpolate(from: &Self, to: &Self, t: f32, out: &mut Self) {
        out.frame = from.frame;
        out.server_time_ms = from.server_time_ms + (to.server_time_ms - from.server_time_ms) * t as f64;
        out.last_command_frame = from.last_command_frame;
        out.entities.clear();

        for from_state in &from.entities {
            let mut state = *from_state;
            if let Some(to_state) = to.entity(from_state.id) {
                EntityState::interpolate(from_state, to_state, t, &mut state);
            }
            out.entities.push(state);
        }

        for to_state in &to.entities {
            if from.entity(to_state.id).is_none() {
                out.entities.push(*to_state);
            }
        }
    }
}
