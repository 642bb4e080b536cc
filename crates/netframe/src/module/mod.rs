mod client;
mod events;
mod server;

pub use client::{ClientModule, RESYNC_THRESHOLD_MS};
pub use events::{DisconnectReason, ModuleEvent};
pub use server::{DEFAULT_MAX_CLIENTS, ServerModule, ServerModuleConfig};
