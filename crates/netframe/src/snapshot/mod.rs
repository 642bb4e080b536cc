mod buffer;
mod entity;
mod interpolate;
mod world;

pub use buffer::{Bracket, DEFAULT_SNAPSHOT_CAPACITY, SnapshotMiss, SnapshotRing};
pub use entity::{EntityKind, EntityState};
pub use interpolate::{Framed, Interpolate, lerp_angle};
pub use world::WorldSnapshot;
