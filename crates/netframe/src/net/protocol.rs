use rkyv::rancor;

use crate::Frame;
use crate::simulation::UserCommand;
use crate::snapshot::WorldSnapshot;

/// magic u16 | sequence u32 | ack u32 | ack_bits u32
pub const CHANNEL_HEADER_SIZE: usize = 14;
/// The ClientFrame repeat count lives in the upper four bits of the ID byte.
pub const MAX_REPEAT_COUNT: u8 = 0b1111;

const KIND_MASK: u8 = 0b111;
const PARITY_BIT: u8 = 1 << 3;
const EXTRA_SHIFT: u8 = 4;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("packet full: needed {needed} bytes, {remaining} remaining")]
    Overflow { needed: usize, remaining: usize },
    #[error("client frame {frame} cannot carry {count} commands")]
    InvalidFrame { frame: Frame, count: u8 },
    #[error("bad protocol magic {0:#06x}")]
    BadMagic(u16),
    #[error("packet size {size} is below the minimum of {minimum} bytes")]
    SchemaTooSmall { size: usize, minimum: usize },
    #[error("snapshot of {0} bytes does not fit in a packet")]
    SnapshotTooLarge(usize),
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

fn take<const N: usize>(input: &[u8]) -> Result<(&[u8; N], &[u8]), PacketError> {
    input.split_first_chunk::<N>().ok_or(PacketError::Truncated {
        needed: N,
        available: input.len(),
    })
}

/// Per-datagram header owned by the channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHeader {
    pub magic: u16,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
}

impl ChannelHeader {
    pub fn to_bytes(&self) -> [u8; CHANNEL_HEADER_SIZE] {
        let mut out = [0u8; CHANNEL_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2..6].copy_from_slice(&self.sequence.to_le_bytes());
        out[6..10].copy_from_slice(&self.ack.to_le_bytes());
        out[10..14].copy_from_slice(&self.ack_bits.to_le_bytes());
        out
    }

    /// Splits a datagram into its header and application payload.
    pub fn decode(datagram: &[u8], expected_magic: u16) -> Result<(Self, &[u8]), PacketError> {
        let (magic, rest) = take::<2>(datagram)?;
        let magic = u16::from_le_bytes(*magic);
        if magic != expected_magic {
            return Err(PacketError::BadMagic(magic));
        }
        let (sequence, rest) = take::<4>(rest)?;
        let (ack, rest) = take::<4>(rest)?;
        let (ack_bits, rest) = take::<4>(rest)?;

        Ok((
            Self {
                magic,
                sequence: u32::from_le_bytes(*sequence),
                ack: u32::from_le_bytes(*ack),
                ack_bits: u32::from_le_bytes(*ack_bits),
            },
            rest,
        ))
    }
}

/// Closed set of application message kinds. The discriminant is the low
/// three bits of every message's ID byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    ServerFrame = 0,
    ClientFrame = 1,
    VisibilityChange = 2,
}

const RELIABLE_KINDS: [bool; 8] = [false, false, true, false, false, false, false, false];

impl MessageKind {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & KIND_MASK {
            0 => Some(Self::ServerFrame),
            1 => Some(Self::ClientFrame),
            2 => Some(Self::VisibilityChange),
            _ => None,
        }
    }

    pub fn is_reliable(self) -> bool {
        RELIABLE_KINDS[self as usize]
    }
}

/// `(kind & 0b111) | (parity << 3) | (extra << 4)`
#[inline]
pub fn pack_id(kind: MessageKind, parity: bool, extra: u8) -> u8 {
    (kind as u8 & KIND_MASK) | if parity { PARITY_BIT } else { 0 } | (extra << EXTRA_SHIFT)
}

#[inline]
pub fn unpack_id(id: u8) -> Result<(MessageKind, bool, u8), PacketError> {
    let kind = MessageKind::from_bits(id).ok_or(PacketError::UnknownKind(id & KIND_MASK))?;
    Ok((kind, id & PARITY_BIT != 0, id >> EXTRA_SHIFT))
}

/// Writable, size-capped application payload handed out by a channel.
#[derive(Debug, Clone)]
pub struct Packet {
    bytes: Vec<u8>,
    limit: usize,
}

impl Packet {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.bytes.len()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), PacketError> {
        if data.len() > self.remaining() {
            return Err(PacketError::Overflow {
                needed: data.len(),
                remaining: self.remaining(),
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Appends one message. On failure the packet is left as it was.
    pub fn push(&mut self, message: &Message, parity: bool) -> Result<(), PacketError> {
        let mark = self.bytes.len();
        let result = message.encode(parity, self);
        if result.is_err() {
            self.bytes.truncate(mark);
        }
        result
    }
}

/// One decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ServerFrame(WorldSnapshot),
    /// `commands[i]` belongs to frame `frame - i`.
    ClientFrame {
        frame: Frame,
        commands: Vec<UserCommand>,
    },
    VisibilityChange {
        visible: bool,
    },
}

/// A message together with the parity bit it travelled with.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub parity: bool,
    pub message: Message,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ServerFrame(_) => MessageKind::ServerFrame,
            Self::ClientFrame { .. } => MessageKind::ClientFrame,
            Self::VisibilityChange { .. } => MessageKind::VisibilityChange,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.kind().is_reliable()
    }

    fn encode(&self, parity: bool, packet: &mut Packet) -> Result<(), PacketError> {
        let parity = parity && self.is_reliable();
        match self {
            Self::ServerFrame(snapshot) => {
                let body = snapshot.to_bytes()?;
                let len = u16::try_from(body.len())
                    .map_err(|_| PacketError::SnapshotTooLarge(body.len()))?;
                if 3 + body.len() > packet.remaining() {
                    return Err(PacketError::SnapshotTooLarge(body.len()));
                }
                packet.write(&[pack_id(MessageKind::ServerFrame, parity, 0)])?;
                packet.write(&len.to_le_bytes())?;
                packet.write(&body)
            }
            Self::ClientFrame { frame, commands } => {
                encode_client_frame(*frame, commands, packet)
            }
            Self::VisibilityChange { visible } => packet.write(&[pack_id(
                MessageKind::VisibilityChange,
                parity,
                *visible as u8,
            )]),
        }
    }

    /// Decodes the message at the front of `input` and returns the bytes
    /// that follow it.
    pub fn decode(input: &[u8]) -> Result<(Envelope, &[u8]), PacketError> {
        let (id, rest) = take::<1>(input)?;
        let (kind, parity, extra) = unpack_id(id[0])?;

        let (message, rest) = match kind {
            MessageKind::ServerFrame => {
                let (len, rest) = take::<2>(rest)?;
                let len = u16::from_le_bytes(*len) as usize;
                if rest.len() < len {
                    return Err(PacketError::Truncated {
                        needed: len,
                        available: rest.len(),
                    });
                }
                let (body, rest) = rest.split_at(len);
                (Self::ServerFrame(WorldSnapshot::from_bytes(body)?), rest)
            }
            MessageKind::ClientFrame => {
                let (frame, mut rest) = take::<4>(rest)?;
                let frame = u32::from_le_bytes(*frame);
                let count = extra;
                if count == 0 || (count as Frame - 1) > frame {
                    return Err(PacketError::InvalidFrame { frame, count });
                }

                let mut commands = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (bytes, tail) = take::<{ UserCommand::WIRE_SIZE }>(rest)?;
                    commands.push(UserCommand::from_bytes(bytes));
                    rest = tail;
                }
                (Self::ClientFrame { frame, commands }, rest)
            }
            MessageKind::VisibilityChange => (
                Self::VisibilityChange {
                    visible: extra & 1 != 0,
                },
                rest,
            ),
        };

        let parity = parity && kind.is_reliable();
        Ok((Envelope { parity, message }, rest))
    }
}

/// Writes a ClientFrame holding as many of `commands` (newest first) as
/// fit. Dropping the oldest commands to fit is a sizing bug, so debug
/// builds assert on it.
fn encode_client_frame(
    frame: Frame,
    commands: &[UserCommand],
    packet: &mut Packet,
) -> Result<(), PacketError> {
    const FIXED: usize = 1 + 4;
    let fitting = packet.remaining().saturating_sub(FIXED) / UserCommand::WIRE_SIZE;
    let mut count = commands.len().min(MAX_REPEAT_COUNT as usize);

    if count > fitting {
        debug_assert!(
            false,
            "client frame {} needs {} commands, only {} fit",
            frame, count, fitting
        );
        log::warn!(
            "Client frame {} truncated from {} to {} commands",
            frame,
            count,
            fitting
        );
        count = fitting;
    }
    if count == 0 || (count as Frame - 1) > frame {
        return Err(PacketError::InvalidFrame {
            frame,
            count: count as u8,
        });
    }

    packet.write(&[pack_id(MessageKind::ClientFrame, false, count as u8)])?;
    packet.write(&frame.to_le_bytes())?;
    for command in &commands[..count] {
        packet.write(&command.to_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EntityKind, EntityState};

    fn decode_all(mut input: &[u8]) -> Vec<Envelope> {
        let mut out = Vec::new();
        while !input.is_empty() {
            let (envelope, rest) = Message::decode(input).unwrap();
            out.push(envelope);
            input = rest;
        }
        out
    }

    fn command(x: i8) -> UserCommand {
        UserCommand {
            move_direction: [x, 0, 0],
            ..Default::default()
        }
    }

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn id_byte_layout() {
        assert_eq!(pack_id(MessageKind::ClientFrame, false, 3), 0b0011_0001);
        assert_eq!(pack_id(MessageKind::VisibilityChange, true, 1), 0b0001_1010);
        assert_eq!(
            unpack_id(0b0011_0001).unwrap(),
            (MessageKind::ClientFrame, false, 3)
        );
        assert!(matches!(unpack_id(0b0000_0101), Err(PacketError::UnknownKind(5))));
    }

    #[test]
    fn only_visibility_change_is_reliable() {
        assert!(MessageKind::VisibilityChange.is_reliable());
        assert!(!MessageKind::ClientFrame.is_reliable());
        assert!(!MessageKind::ServerFrame.is_reliable());
    }

    #[test]
    fn client_frame_entries_are_newest_first() {
        let mut packet = Packet::with_limit(256);
        let message = Message::ClientFrame {
            frame: 50,
            commands: vec![command(50), command(49), command(48)],
        };
        packet.push(&message, false).unwrap();

        assert_eq!(packet.as_bytes()[0] >> 4, 3);
        assert_eq!(&packet.as_bytes()[1..5], &50u32.to_le_bytes());

        let decoded = decode_all(packet.as_bytes());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].message, message);
    }

    #[test]
    fn messages_concatenate_in_one_packet() {
        let mut snapshot = WorldSnapshot::new(9, 150.0);
        snapshot.entities.push(EntityState::new(3, EntityKind::Player));

        let mut packet = Packet::with_limit(1024);
        packet
            .push(&Message::VisibilityChange { visible: true }, true)
            .unwrap();
        packet.push(&Message::ServerFrame(snapshot.clone()), true).unwrap();

        let decoded = decode_all(packet.as_bytes());
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].parity);
        assert_eq!(decoded[0].message, Message::VisibilityChange { visible: true });
        // Parity is meaningless for unreliable kinds and is never set on the wire.
        assert!(!decoded[1].parity);
        assert_eq!(decoded[1].message, Message::ServerFrame(snapshot));
    }

    #[test]
    fn truncated_client_frame_is_an_error() {
        let mut packet = Packet::with_limit(256);
        packet
            .push(
                &Message::ClientFrame {
                    frame: 10,
                    commands: vec![command(1), command(2)],
                },
                false,
            )
            .unwrap();

        let bytes = &packet.as_bytes()[..packet.len() - 3];
        assert!(matches!(
            Message::decode(bytes),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn client_frame_cannot_reach_before_frame_zero() {
        let mut bytes = vec![pack_id(MessageKind::ClientFrame, false, 3)];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 27]);

        assert!(matches!(
            Message::decode(&bytes),
            Err(PacketError::InvalidFrame { frame: 1, count: 3 })
        ));
    }

    #[test]
    fn failed_push_leaves_packet_untouched() {
        let mut snapshot = WorldSnapshot::new(1, 0.0);
        for id in 0..64 {
            snapshot.entities.push(EntityState::new(id, EntityKind::Item));
        }

        let mut packet = Packet::with_limit(64);
        packet
            .push(&Message::VisibilityChange { visible: false }, false)
            .unwrap();
        assert!(packet.push(&Message::ServerFrame(snapshot), false).is_err());
        assert_eq!(packet.len(), 1);
    }

    #[test]
    fn channel_header_round_trip_and_magic_check() {
        let header = ChannelHeader {
            magic: 0x4E46,
            sequence: 7,
            ack: 6,
            ack_bits: 0b101,
        };
        let mut datagram = header.to_bytes().to_vec();
        datagram.push(0xAA);

        let (decoded, payload) = ChannelHeader::decode(&datagram, 0x4E46).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, &[0xAA]);

        assert!(matches!(
            ChannelHeader::decode(&datagram, 0x1234),
            Err(PacketError::BadMagic(0x4E46))
        ));
        assert!(matches!(
            ChannelHeader::decode(&datagram[..5], 0x4E46),
            Err(PacketError::Truncated { .. })
        ));
    }
}
