mod channel;
mod connection;
mod memory;
mod protocol;
mod schema;
mod stats;
mod tracking;
mod transport;
mod udp;

pub use channel::{Channel, ChannelEvent, ChannelState, LOSS_TIMEOUT};
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionState, ConnectionStats, InputSample,
    PacketClass, Role,
};
pub use memory::{LinkControl, MemoryTransport};
pub use protocol::{
    CHANNEL_HEADER_SIZE, ChannelHeader, Envelope, MAX_REPEAT_COUNT, Message, MessageKind, Packet,
    PacketError, pack_id, sequence_greater_than, unpack_id,
};
pub use schema::{
    DEFAULT_COMMAND_BACKLOG, DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PACKET_SIZE, PROTOCOL_MAGIC,
    WireSchema,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckOutcome, AckTracker, ReceiveTracker};
pub use transport::{Transport, TransportEvent};
pub use udp::{DEFAULT_PEER_TIMEOUT, NetError, UdpHost, UdpPeer, UdpTransport};
