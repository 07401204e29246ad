use envmap_kernel::Strategy;

/// Errors from snapshot capture, storage, and the update codec.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("snapshot content hash mismatch: expected {expected:#x}, got {actual:#x}")]
    HashMismatch { expected: u64, actual: u64 },
    #[error("snapshot holds {actual} elements, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("snapshot is for the {snapshot} strategy but the environment runs {active}")]
    StrategyMismatch { snapshot: Strategy, active: Strategy },
    #[error("restore rejected: {0}")]
    Restore(String),
    #[error("snapshot {0} not found")]
    NotFound(u32),
    #[error("no snapshots found")]
    NoSnapshots,
}
