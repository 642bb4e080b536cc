use super::protocol::{CHANNEL_HEADER_SIZE, MAX_REPEAT_COUNT, PacketError};

pub const PROTOCOL_MAGIC: u16 = 0x4E46;
pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_COMMAND_BACKLOG: u32 = 5;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Wire layout every endpoint of a session must agree on. Built once and
/// shared (behind an `Arc`) by every channel and connection; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSchema {
    magic: u16,
    max_packet_size: usize,
    max_command_backlog: u32,
    max_repeat_count: u8,
}

impl Default for WireSchema {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            max_packet_size: MAX_PACKET_SIZE,
            max_command_backlog: DEFAULT_COMMAND_BACKLOG,
            max_repeat_count: DEFAULT_COMMAND_BACKLOG as u8 + 1,
        }
    }
}

impl WireSchema {
    pub fn new(
        magic: u16,
        max_packet_size: usize,
        max_command_backlog: u32,
    ) -> Result<Self, PacketError> {
        // Room for the channel header plus one ClientFrame carrying a single command.
        let minimum = CHANNEL_HEADER_SIZE + 1 + 4 + crate::UserCommand::WIRE_SIZE;
        if max_packet_size < minimum {
            return Err(PacketError::SchemaTooSmall {
                size: max_packet_size,
                minimum,
            });
        }

        let repeat_needed = max_command_backlog.saturating_add(1);
        let max_repeat_count = repeat_needed.min(MAX_REPEAT_COUNT as u32) as u8;

        Ok(Self {
            magic,
            max_packet_size,
            max_command_backlog,
            max_repeat_count,
        })
    }

    pub fn magic(&self) -> u16 {
        self.magic
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Bytes left for application messages after the channel header.
    pub fn max_payload_size(&self) -> usize {
        self.max_packet_size - CHANNEL_HEADER_SIZE
    }

    /// How many frames behind the newest one a ClientFrame may resend.
    pub fn max_command_backlog(&self) -> u32 {
        self.max_command_backlog
    }

    pub fn max_repeat_count(&self) -> u8 {
        self.max_repeat_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let schema = WireSchema::default();
        assert_eq!(schema.max_payload_size(), MAX_PACKET_SIZE - CHANNEL_HEADER_SIZE);
        assert_eq!(schema.max_command_backlog(), 5);
        assert_eq!(schema.max_repeat_count(), 6);
        assert_eq!(WireSchema::new(PROTOCOL_MAGIC, MAX_PACKET_SIZE, 5).unwrap(), schema);
    }

    #[test]
    fn repeat_count_fits_header_bits() {
        let schema = WireSchema::new(1, 512, 40).unwrap();
        assert_eq!(schema.max_repeat_count(), MAX_REPEAT_COUNT);

        let schema = WireSchema::new(1, 512, 2).unwrap();
        assert_eq!(schema.max_repeat_count(), 3);
    }

    #[test]
    fn rejects_packets_too_small_for_a_frame() {
        assert!(matches!(
            WireSchema::new(1, 16, 5),
            Err(PacketError::SchemaTooSmall { .. })
        ));
    }
}
