use envmap_height::PerFrameUpdates;

use crate::codec;
use crate::error::PersistError;

/// Serialize a frame's written cells for transport to other peers.
pub fn encode_updates(updates: &PerFrameUpdates) -> Result<Vec<u8>, PersistError> {
    let bytes = codec::pack(updates)?;
    tracing::trace!(cells = updates.len(), bytes = bytes.len(), "encoded height updates");
    Ok(bytes)
}

/// Inverse of [`encode_updates`]. Cell values are validated on apply, not here.
pub fn decode_updates(bytes: &[u8]) -> Result<PerFrameUpdates, PersistError> {
    codec::unpack(bytes)
}
