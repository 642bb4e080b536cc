use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::Frame;

pub const DEFAULT_COMMAND_CAPACITY: usize = 320;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Buttons: u16 {
        const SPRINT = 1 << 0;
        const JUMP = 1 << 1;
        const CROUCH = 1 << 2;
        const FIRE = 1 << 3;
        const USE = 1 << 4;
    }
}

/// One frame of client input. The frame it belongs to is not stored here;
/// it is implied by the ring slot or the wire position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserCommand {
    pub move_direction: [i8; 3],
    pub view_angles: [i16; 2],
    pub buttons: Buttons,
}

impl UserCommand {
    pub const WIRE_SIZE: usize = 9;

    pub fn decode_move_direction(&self) -> [f32; 3] {
        [
            self.move_direction[0] as f32 / 127.0,
            self.move_direction[1] as f32 / 127.0,
            self.move_direction[2] as f32 / 127.0,
        ]
    }

    pub fn encode_move_direction(&mut self, dir: [f32; 3]) {
        self.move_direction = [
            (dir[0].clamp(-1.0, 1.0) * 127.0) as i8,
            (dir[1].clamp(-1.0, 1.0) * 127.0) as i8,
            (dir[2].clamp(-1.0, 1.0) * 127.0) as i8,
        ];
    }

    pub fn decode_view_angles(&self) -> (f32, f32) {
        (
            self.view_angles[0] as f32 / 10000.0,
            self.view_angles[1] as f32 / 10000.0,
        )
    }

    pub fn encode_view_angles(&mut self, yaw: f32, pitch: f32) {
        let yaw = normalize_angle(yaw);
        let pitch = pitch.clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);
        self.view_angles = [(yaw * 10000.0) as i16, (pitch * 10000.0) as i16];
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let yaw = self.view_angles[0].to_le_bytes();
        let pitch = self.view_angles[1].to_le_bytes();
        let buttons = self.buttons.bits().to_le_bytes();
        [
            self.move_direction[0] as u8,
            self.move_direction[1] as u8,
            self.move_direction[2] as u8,
            yaw[0],
            yaw[1],
            pitch[0],
            pitch[1],
            buttons[0],
            buttons[1],
        ]
    }

    /// Unknown button bits are dropped rather than rejected.
    pub fn from_bytes(bytes: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            move_direction: [bytes[0] as i8, bytes[1] as i8, bytes[2] as i8],
            view_angles: [
                i16::from_le_bytes([bytes[3], bytes[4]]),
                i16::from_le_bytes([bytes[5], bytes[6]]),
            ],
            buttons: Buttons::from_bits_truncate(u16::from_le_bytes([bytes[7], bytes[8]])),
        }
    }
}

fn normalize_angle(angle: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut normalized = angle % two_pi;
    if normalized > std::f32::consts::PI {
        normalized -= two_pi;
    } else if normalized < -std::f32::consts::PI {
        normalized += two_pi;
    }
    normalized
}

/// Fixed-capacity ring of per-frame commands. Every populated slot carries
/// the frame that owns it, so reads after wraparound never return a command
/// that belongs to a different frame.
#[derive(Debug)]
pub struct CommandRing<C> {
    slots: Vec<Option<(Frame, C)>>,
    capacity: usize,
    newest: Option<Frame>,
}

impl<C> CommandRing<C> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "command ring needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            newest: None,
        }
    }

    /// Stores `command` for `frame`. Returns `true` when the slot did not
    /// already hold this frame.
    pub fn set(&mut self, frame: Frame, command: C) -> bool {
        let index = self.index(frame);
        let slot = &mut self.slots[index];
        let is_new = !matches!(slot, Some((owner, _)) if *owner == frame);
        *slot = Some((frame, command));
        self.newest = Some(self.newest.map_or(frame, |newest| newest.max(frame)));
        is_new
    }

    pub fn get(&self, frame: Frame) -> Option<&C> {
        match &self.slots[self.index(frame)] {
            Some((owner, command)) if *owner == frame => Some(command),
            _ => None,
        }
    }

    /// The command for the highest frame written so far, used as the
    /// same-input fallback when a frame's own command never arrived.
    /// Backfilling older frames does not move it.
    pub fn latest(&self) -> Option<&C> {
        self.newest.and_then(|frame| self.get(frame))
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.newest
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.get(frame).is_some()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.newest = None;
    }

    fn index(&self, frame: Frame) -> usize {
        frame as usize % self.capacity
    }
}
