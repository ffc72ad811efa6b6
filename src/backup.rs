//! Snapshot export, import and archive
//!
//! One versioned JSON envelope holds the full state of an attribute store and
//! a memory loop:
//! - Metadata header (format version, counts, SHA-256 checksum of the body)
//! - Atomic import: both components are validated before either is replaced
//! - Capture and commit hold the loop lock across the store step, so a
//!   concurrent ingest never splits a memory from its mirrored record
//! - File writes go to a temp file first and are renamed into place
//! - A directory archive with list, verify and purge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::constants::{DIMENSION_COUNT, SNAPSHOT_FORMAT_VERSION, TOTAL_PAGES};
use crate::errors::{HypercubeError, Result};
use crate::identity::identity_of_value;
use crate::memory::{LoopSnapshot, MemoryLoop, Phase};
use crate::store::{AttributeStore, StoreSnapshot};

/// Envelope header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    pub dimensions: usize,
    pub phases: usize,
    pub pages: u32,
    pub record_count: usize,
    pub memory_count: usize,
    /// SHA-256 over the canonical JSON of `{store, memory}`
    pub checksum: String,
}

/// Full snapshot of both components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypercubeSnapshot {
    pub metadata: SnapshotMetadata,
    pub store: StoreSnapshot,
    pub memory: LoopSnapshot,
}

fn body_checksum(store: &Value, memory: &Value) -> String {
    identity_of_value(&json!({ "store": store, "memory": memory }))
        .as_str()
        .to_string()
}

/// Capture both components as one JSON document
fn capture(store: &AttributeStore, engine: &MemoryLoop) -> Result<(SnapshotMetadata, Value)> {
    let (loop_snapshot, store_snapshot) = engine.snapshot_with(|| store.snapshot());

    let metadata_counts = (store_snapshot.records.len(), loop_snapshot.memories.len());
    let store_value = serde_json::to_value(&store_snapshot)?;
    let memory_value = serde_json::to_value(&loop_snapshot)?;

    let metadata = SnapshotMetadata {
        format_version: SNAPSHOT_FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        dimensions: DIMENSION_COUNT,
        phases: Phase::ALL.len(),
        pages: TOTAL_PAGES,
        record_count: metadata_counts.0,
        memory_count: metadata_counts.1,
        checksum: body_checksum(&store_value, &memory_value),
    };

    let mut document = Map::new();
    document.insert("metadata".to_string(), serde_json::to_value(&metadata)?);
    document.insert("store".to_string(), store_value);
    document.insert("memory".to_string(), memory_value);
    Ok((metadata, Value::Object(document)))
}

fn read_metadata(document: &Value) -> Result<SnapshotMetadata> {
    let header = document
        .get("metadata")
        .ok_or_else(|| HypercubeError::Format("snapshot has no metadata header".to_string()))?;
    let metadata: SnapshotMetadata = serde_json::from_value(header.clone())
        .map_err(|e| HypercubeError::Format(format!("invalid snapshot metadata: {e}")))?;

    if metadata.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(HypercubeError::Format(format!(
            "unsupported snapshot format '{}' (expected {})",
            metadata.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    Ok(metadata)
}

fn body_parts(document: &Value) -> Result<(&Value, &Value)> {
    let store = document
        .get("store")
        .ok_or_else(|| HypercubeError::Format("snapshot has no store section".to_string()))?;
    let memory = document
        .get("memory")
        .ok_or_else(|| HypercubeError::Format("snapshot has no memory section".to_string()))?;
    Ok((store, memory))
}

/// Check header and checksum without loading anything
fn verify_document(document: &Value) -> Result<SnapshotMetadata> {
    let metadata = read_metadata(document)?;
    let (store, memory) = body_parts(document)?;
    if body_checksum(store, memory) != metadata.checksum {
        return Err(HypercubeError::Format(
            "snapshot checksum mismatch".to_string(),
        ));
    }
    Ok(metadata)
}

/// Validate a parsed envelope and replace both components with its content.
///
/// Nothing is replaced unless both sections are valid.
fn restore_document(
    store: &AttributeStore,
    engine: &MemoryLoop,
    document: Value,
) -> Result<SnapshotMetadata> {
    let metadata = verify_document(&document)?;
    let snapshot: HypercubeSnapshot = serde_json::from_value(document)
        .map_err(|e| HypercubeError::Format(format!("invalid snapshot body: {e}")))?;

    if snapshot.store.records.len() != metadata.record_count
        || snapshot.memory.memories.len() != metadata.memory_count
    {
        return Err(HypercubeError::Format(
            "snapshot counts do not match its header".to_string(),
        ));
    }

    let prepared_store = store.prepare_restore(snapshot.store)?;
    let prepared_loop = engine.prepare_restore(snapshot.memory)?;
    engine.commit_restore_with(prepared_loop, || store.commit_restore(prepared_store));

    tracing::info!(
        records = metadata.record_count,
        memories = metadata.memory_count,
        exported_at = %metadata.exported_at,
        "Snapshot imported"
    );
    Ok(metadata)
}

/// Write both components to `sink` as one envelope
pub fn export_snapshot<W: Write>(
    store: &AttributeStore,
    engine: &MemoryLoop,
    sink: W,
) -> Result<SnapshotMetadata> {
    let (metadata, document) = capture(store, engine)?;
    serde_json::to_writer_pretty(sink, &document)?;
    Ok(metadata)
}

/// Replace both components from an envelope written by [`export_snapshot`]
pub fn import_snapshot<R: Read>(
    store: &AttributeStore,
    engine: &MemoryLoop,
    source: R,
) -> Result<SnapshotMetadata> {
    let document: Value = serde_json::from_reader(source)
        .map_err(|e| HypercubeError::Format(format!("snapshot is not valid JSON: {e}")))?;
    restore_document(store, engine, document)
}

/// Export to `path` through a temp file, so a failed write never clobbers an
/// existing snapshot
pub fn save_to_file(
    store: &AttributeStore,
    engine: &MemoryLoop,
    path: &Path,
) -> Result<SnapshotMetadata> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");

    let written = (|| -> Result<SnapshotMetadata> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let metadata = export_snapshot(store, engine, &mut writer)?;
        writer.flush()?;
        Ok(metadata)
    })();

    let metadata = match written {
        Ok(metadata) => metadata,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::info!(
        path = %path.display(),
        records = metadata.record_count,
        memories = metadata.memory_count,
        "Snapshot saved"
    );
    Ok(metadata)
}

fn read_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(HypercubeError::NotFound(format!(
            "snapshot {}",
            path.display()
        )));
    }
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader)
        .map_err(|e| HypercubeError::Format(format!("{} is not valid JSON: {e}", path.display())))
}

/// Load both components from `path`
pub fn load_from_file(
    store: &AttributeStore,
    engine: &MemoryLoop,
    path: &Path,
) -> Result<SnapshotMetadata> {
    let document = read_document(path)?;
    restore_document(store, engine, document)
}

/// Check a snapshot file's header and checksum.
///
/// `Ok(false)` for a readable envelope whose body no longer matches.
pub fn verify_file(path: &Path) -> Result<bool> {
    let document = read_document(path)?;
    match verify_document(&document) {
        Ok(_) => Ok(true),
        Err(HypercubeError::Format(reason)) if reason.contains("checksum") => Ok(false),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Archive
// ============================================================================

/// An archived snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSnapshot {
    /// Sequence number, increasing with every save
    pub id: u64,
    pub path: PathBuf,
    pub metadata: SnapshotMetadata,
}

/// Directory of numbered snapshot envelopes (`snapshot_000001.json`, ...)
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("snapshot_{id:06}.json"))
    }

    fn parse_id(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix("snapshot_")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    /// Archived ids, oldest first
    fn ids(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| Self::parse_id(&e.path()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Save a new snapshot under the next id
    pub fn save(&self, store: &AttributeStore, engine: &MemoryLoop) -> Result<ArchivedSnapshot> {
        let id = self.ids()?.last().map_or(1, |last| last + 1);
        let path = self.path_for(id);
        let metadata = save_to_file(store, engine, &path)?;
        tracing::info!(id, path = %path.display(), "Snapshot archived");
        Ok(ArchivedSnapshot { id, path, metadata })
    }

    /// Every readable archived snapshot, oldest first
    pub fn list(&self) -> Result<Vec<ArchivedSnapshot>> {
        let mut archived = Vec::new();
        for id in self.ids()? {
            let path = self.path_for(id);
            match read_document(&path).and_then(|doc| read_metadata(&doc)) {
                Ok(metadata) => archived.push(ArchivedSnapshot { id, path, metadata }),
                Err(e) => tracing::warn!(id, error = %e, "Skipping unreadable archived snapshot"),
            }
        }
        Ok(archived)
    }

    /// Replace both components with archived snapshot `id`
    pub fn load(
        &self,
        id: u64,
        store: &AttributeStore,
        engine: &MemoryLoop,
    ) -> Result<SnapshotMetadata> {
        load_from_file(store, engine, &self.path_for(id))
    }

    /// Load the newest archived snapshot; `None` when the archive is empty
    pub fn restore_latest(
        &self,
        store: &AttributeStore,
        engine: &MemoryLoop,
    ) -> Result<Option<ArchivedSnapshot>> {
        let Some(&id) = self.ids()?.last() else {
            return Ok(None);
        };
        let metadata = self.load(id, store, engine)?;
        Ok(Some(ArchivedSnapshot {
            id,
            path: self.path_for(id),
            metadata,
        }))
    }

    pub fn verify(&self, id: u64) -> Result<bool> {
        verify_file(&self.path_for(id))
    }

    /// Delete all but the newest `keep` snapshots. `keep` must be at least 1.
    pub fn purge_old(&self, keep: usize) -> Result<usize> {
        if keep == 0 {
            return Err(HypercubeError::validation(
                "keep",
                "must be >= 1 to prevent deleting every snapshot",
            ));
        }

        let ids = self.ids()?;
        if ids.len() <= keep {
            return Ok(0);
        }

        let to_delete = ids.len() - keep;
        for id in &ids[..to_delete] {
            fs::remove_file(self.path_for(*id))?;
        }

        tracing::info!(purged = to_delete, kept = keep, "Purged old snapshots");
        Ok(to_delete)
    }
}
