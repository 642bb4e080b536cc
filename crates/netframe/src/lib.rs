pub mod module;
pub mod net;
pub mod simulation;
pub mod snapshot;

/// One fixed simulation tick. The key shared by every ring and wire message.
pub type Frame = u32;

pub use module::{ClientModule, DisconnectReason, ModuleEvent, ServerModule, ServerModuleConfig};
pub use net::{
    Channel, ChannelEvent, Connection, ConnectionConfig, ConnectionState, InputSample,
    MemoryTransport, Message, NetError, NetworkStats, Packet, PacketError, PacketLossSimulation,
    Role, Transport, TransportEvent, UdpHost, UdpTransport, WireSchema,
};
pub use simulation::{Buttons, ClockConfig, ClockError, CommandRing, TimeBase, UserCommand};
pub use snapshot::{EntityKind, EntityState, Interpolate, SnapshotRing, WorldSnapshot};
