//! Persistence for environment maps: content-hashed snapshots, a file-backed
//! snapshot store, and the wire codec for per-frame height updates.
//!
//! # Invariants
//! - A snapshot whose content hash does not match is never restored.
//! - Store files are chained by SHA-256 in the manifest; loads fail closed.

mod codec;
mod error;
pub mod snapshot;
pub mod store;
mod updates;

pub use error::PersistError;
pub use snapshot::{HeightSnapshot, MapSnapshot, VolumeSnapshot};
pub use store::{IntegrityManifest, ManifestEntry, SnapshotStore, StoreMeta};
pub use updates::{decode_updates, encode_updates};
