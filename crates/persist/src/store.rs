//! File-backed snapshot store.
//!
//! Layout inside the store directory:
//! ```text
//! meta.json                    - schema version and snapshot count
//! snapshots/
//!   000001.snapshot.cbor.zst   - CBOR+zstd compressed map snapshots
//! manifest.json                - SHA-256 hash chain over snapshot files
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{pack, sha256_hex, unpack};
use crate::error::PersistError;
use crate::snapshot::MapSnapshot;

const SCHEMA_VERSION: u32 = 1;
const META_FILE: &str = "meta.json";
const MANIFEST_FILE: &str = "manifest.json";
const SNAPSHOT_DIR: &str = "snapshots";

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub snapshot_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Hash chain over every snapshot file, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

impl IntegrityManifest {
    fn entry(&self, filename: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }
}

/// Directory of numbered map snapshots with schema versioning and integrity checks.
pub struct SnapshotStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl SnapshotStore {
    /// Open the store at `path`, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(SNAPSHOT_DIR))?;

        let meta_path = root.join(META_FILE);
        let manifest_path = root.join(MANIFEST_FILE);
        if !meta_path.exists() {
            let store = Self {
                root,
                meta: StoreMeta {
                    schema_version: SCHEMA_VERSION,
                    snapshot_count: 0,
                },
                manifest: IntegrityManifest::default(),
            };
            store.save_meta()?;
            store.save_manifest()?;
            tracing::info!(root = %store.root.display(), "created snapshot store");
            return Ok(store);
        }

        let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(PersistError::SchemaMismatch {
                file_version: meta.schema_version,
                expected_version: SCHEMA_VERSION,
            });
        }
        let manifest = if manifest_path.exists() {
            serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
        } else {
            IntegrityManifest::default()
        };
        tracing::debug!(root = %root.display(), snapshots = meta.snapshot_count, "opened snapshot store");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Write `snapshot` as the next numbered file. Returns its number.
    pub fn save(&mut self, snapshot: &MapSnapshot) -> Result<u32, PersistError> {
        let index = self.meta.snapshot_count + 1;
        let filename = snapshot_filename(index);
        let compressed = pack(snapshot)?;
        let sha256 = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(self.root.join(SNAPSHOT_DIR).join(&filename), &compressed)?;
        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256,
            prev_hash,
        });
        self.meta.snapshot_count = index;
        self.save_meta()?;
        self.save_manifest()?;
        tracing::info!(index, strategy = %snapshot.strategy(), bytes = compressed.len(), "snapshot saved");
        Ok(index)
    }

    /// Load snapshot number `index`, checking its file digest and content hash.
    pub fn load(&self, index: u32) -> Result<MapSnapshot, PersistError> {
        if index == 0 || index > self.meta.snapshot_count {
            return Err(PersistError::NotFound(index));
        }
        let filename = snapshot_filename(index);
        let entry = self
            .manifest
            .entry(&filename)
            .ok_or(PersistError::NotFound(index))?;
        let compressed = std::fs::read(self.root.join(SNAPSHOT_DIR).join(&filename))?;
        let actual = sha256_hex(&compressed);
        if actual != entry.sha256 {
            return Err(PersistError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }

        let snapshot: MapSnapshot = unpack(&compressed)?;
        if !snapshot.verify() {
            return Err(PersistError::IntegrityMismatch {
                expected: "valid snapshot hash".into(),
                actual: "snapshot hash mismatch".into(),
            });
        }
        Ok(snapshot)
    }

    pub fn load_latest(&self) -> Result<MapSnapshot, PersistError> {
        if self.meta.snapshot_count == 0 {
            return Err(PersistError::NoSnapshots);
        }
        self.load(self.meta.snapshot_count)
    }

    /// Walk the manifest chain and re-hash every file.
    pub fn verify_integrity(&self) -> Result<(), PersistError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(PersistError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(self.root.join(SNAPSHOT_DIR).join(&entry.filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                tracing::warn!(file = %entry.filename, "snapshot digest mismatch");
                return Err(PersistError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    fn save_meta(&self) -> Result<(), PersistError> {
        let file = std::fs::File::create(self.root.join(META_FILE))?;
        serde_json::to_writer_pretty(file, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), PersistError> {
        let file = std::fs::File::create(self.root.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(file, &self.manifest)?;
        Ok(())
    }
}

fn snapshot_filename(index: u32) -> String {
    format!("{index:06}.snapshot.cbor.zst")
}
