//! Snapshot Tests
//!
//! Tests export and import of the full state:
//! - Round trips preserve query, recall and ledger results
//! - Tampered or inconsistent envelopes are rejected without side effects
//! - File saves and the numbered archive

use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

use hypercube::backup::{self, SnapshotArchive};
use hypercube::errors::HypercubeError;
use hypercube::identity::{identity_of_value, Identity};
use hypercube::memory::{MemoryLoop, Phase, RecallRequest};
use hypercube::populate::BrandGenerator;
use hypercube::store::{AttributeQuery, AttributeStore, Dimension};

// ============================================================================
// TEST INFRASTRUCTURE
// ============================================================================

fn populated() -> (Arc<AttributeStore>, MemoryLoop) {
    let store = Arc::new(AttributeStore::default());
    let mut generator = BrandGenerator::new(Some(11));
    for index in 1..=20 {
        store.store(generator.brand(index)).unwrap();
    }

    let engine = MemoryLoop::default().with_store(Arc::clone(&store));
    for i in 0..12 {
        engine
            .ingest(
                &json!({"sector": "quantum_ai", "event": format!("launch-{i}")}),
                &[format!("wave-{}", i % 3)],
            )
            .unwrap();
    }
    for _ in 0..5 {
        engine.run_cycle();
    }
    (store, engine)
}

fn export_document(store: &AttributeStore, engine: &MemoryLoop) -> Value {
    let mut buffer = Vec::new();
    backup::export_snapshot(store, engine, &mut buffer).unwrap();
    serde_json::from_slice(&buffer).unwrap()
}

fn reseal(document: &mut Value) {
    let checksum = identity_of_value(&json!({
        "store": document["store"],
        "memory": document["memory"],
    }));
    document["metadata"]["checksum"] = json!(checksum.as_str());
}

fn identities(records: Vec<hypercube::store::Record>) -> Vec<Identity> {
    records.into_iter().map(|r| r.identity).collect()
}

// ============================================================================
// ROUND TRIPS
// ============================================================================

#[test]
fn test_empty_round_trip() {
    let store = AttributeStore::default();
    let engine = MemoryLoop::default();
    let mut buffer = Vec::new();
    let exported = backup::export_snapshot(&store, &engine, &mut buffer).unwrap();
    assert_eq!(exported.record_count, 0);
    assert_eq!(exported.memory_count, 0);

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    let imported =
        backup::import_snapshot(&target_store, &target_engine, buffer.as_slice()).unwrap();
    assert_eq!(imported.checksum, exported.checksum);
    assert!(target_store.is_empty());
    assert!(target_engine.is_empty());
}

#[test]
fn test_round_trip_preserves_observable_state() {
    let (store, engine) = populated();
    let mut buffer = Vec::new();
    backup::export_snapshot(&store, &engine, &mut buffer).unwrap();

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    backup::import_snapshot(&target_store, &target_engine, buffer.as_slice()).unwrap();

    let queries = [
        AttributeQuery::new(),
        AttributeQuery::new().eq(Dimension::Sector, "quantum_ai"),
        AttributeQuery::new().gte(Dimension::QualityScore, 0.85),
        AttributeQuery::new().one_of(Dimension::Region, ["europe", "global"]).limit(3),
    ];
    for query in &queries {
        assert_eq!(
            identities(store.query(query).unwrap()),
            identities(target_store.query(query).unwrap())
        );
    }

    let before = engine.recall(&RecallRequest::all()).unwrap();
    let after = target_engine.recall(&RecallRequest::all()).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        engine.recall(&RecallRequest::by_tags(["wave-1"])).unwrap(),
        target_engine.recall(&RecallRequest::by_tags(["wave-1"])).unwrap()
    );

    let (a, b) = (store.get_stats(), target_store.get_stats());
    assert_eq!(a.record_count, b.record_count);
    assert_eq!(a.total_stored, b.total_stored);
    assert!((a.care_pool - b.care_pool).abs() < 1e-9);

    assert_eq!(
        engine.get_generational_wisdom(None),
        target_engine.get_generational_wisdom(None)
    );
    assert_eq!(target_engine.get_stats().current_generation, 1);
}

#[test]
fn test_restored_engine_keeps_cycling() {
    let (store, engine) = populated();
    let mut buffer = Vec::new();
    backup::export_snapshot(&store, &engine, &mut buffer).unwrap();

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    backup::import_snapshot(&target_store, &target_engine, buffer.as_slice()).unwrap();

    let stats = target_engine.run_cycle();
    assert_eq!(stats.cycle, 6);
    assert_eq!(stats.advanced_into(Phase::Amplify), 12);
}

#[test]
fn test_store_only_round_trip() {
    let (store, _engine) = populated();
    let mut buffer = Vec::new();
    store.export(&mut buffer).unwrap();

    let target = AttributeStore::default();
    target.import(buffer.as_slice()).unwrap();
    assert_eq!(target.len(), store.len());
    assert!((target.get_stats().care_pool - store.get_stats().care_pool).abs() < 1e-9);
}

#[test]
fn test_import_replaces_populated_store() {
    let (store, _engine) = populated();
    let mut buffer = Vec::new();
    store.export(&mut buffer).unwrap();

    let target = AttributeStore::default();
    let stale = target
        .store_json(&json!({"sector": "stale", "value": 5000.0}))
        .unwrap();
    assert!(target.get_stats().care_pool > 0.0);

    target.import(buffer.as_slice()).unwrap();

    assert!(target.get(&stale).is_none());
    let old_bucket = target
        .query(&AttributeQuery::new().eq(Dimension::Sector, "stale"))
        .unwrap();
    assert!(old_bucket.is_empty());
    assert_eq!(target.len(), store.len());
    assert_eq!(
        identities(target.query(&AttributeQuery::new().eq(Dimension::Sector, "quantum_ai")).unwrap()),
        identities(store.query(&AttributeQuery::new().eq(Dimension::Sector, "quantum_ai")).unwrap())
    );

    let (source, restored) = (store.get_stats(), target.get_stats());
    assert!((restored.care_pool - source.care_pool).abs() < 1e-9);
    assert_eq!(restored.total_stored, source.total_stored);
    assert_eq!(restored.index_buckets, source.index_buckets);
}

#[test]
fn test_memory_loop_round_trip_into_populated_engine() {
    let engine = MemoryLoop::default();
    let kept = engine
        .ingest(&json!({"event": "kept"}), &["fresh".to_string()])
        .unwrap();
    for _ in 0..3 {
        engine.run_cycle();
    }
    let mut buffer = Vec::new();
    engine.export(&mut buffer).unwrap();

    let target = MemoryLoop::default();
    let stale = target
        .ingest(&json!({"event": "stale"}), &["old".to_string()])
        .unwrap();
    target.run_cycle();

    target.import(buffer.as_slice()).unwrap();

    assert!(target.get(&stale).is_none());
    assert!(target.recall(&RecallRequest::by_tags(["old"])).unwrap().is_empty());
    let fresh = target.recall(&RecallRequest::by_tags(["fresh"])).unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].identity, kept);
    assert_eq!(Some(fresh[0].phase), engine.get(&kept).map(|m| m.phase));

    let (a, b) = (engine.get_stats(), target.get_stats());
    assert_eq!(a.loop_count, b.loop_count);
    assert_eq!(a.herd_validations, b.herd_validations);
    assert_eq!(a.top_tags, b.top_tags);
}

#[test]
fn test_envelope_import_replaces_populated_targets() {
    let (store, engine) = populated();
    let mut buffer = Vec::new();
    backup::export_snapshot(&store, &engine, &mut buffer).unwrap();

    let target_store = Arc::new(AttributeStore::default());
    let target_engine = MemoryLoop::default().with_store(Arc::clone(&target_store));
    let stale = target_engine
        .ingest(&json!({"sector": "stale", "value": 40.0}), &["old".to_string()])
        .unwrap();

    backup::import_snapshot(&target_store, &target_engine, buffer.as_slice()).unwrap();

    assert!(target_engine.get(&stale).is_none());
    assert!(target_engine
        .recall(&RecallRequest::by_tags(["old"]))
        .unwrap()
        .is_empty());
    assert!(target_store
        .query(&AttributeQuery::new().eq(Dimension::Sector, "stale"))
        .unwrap()
        .is_empty());
    assert_eq!(target_store.len(), store.len());
    assert_eq!(target_engine.len(), engine.len());
    assert!((target_store.get_stats().care_pool - store.get_stats().care_pool).abs() < 1e-9);
}

#[test]
fn test_export_during_ingest_keeps_mirrors_paired() {
    let store = Arc::new(AttributeStore::default());
    let engine = Arc::new(MemoryLoop::default().with_store(Arc::clone(&store)));

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..200 {
                engine.ingest(&json!({"event": i}), &[]).unwrap();
            }
        })
    };

    for _ in 0..20 {
        let document = export_document(&store, &engine);
        assert_eq!(
            document["metadata"]["record_count"],
            document["metadata"]["memory_count"]
        );
    }
    writer.join().unwrap();

    let document = export_document(&store, &engine);
    assert_eq!(document["metadata"]["memory_count"], json!(200));
}

// ============================================================================
// REJECTION
// ============================================================================

#[test]
fn test_malformed_record_identity_is_format_error() {
    let (store, _engine) = populated();
    let mut buffer = Vec::new();
    store.export(&mut buffer).unwrap();
    let mut document: Value = serde_json::from_slice(&buffer).unwrap();
    // Multi-byte character straddling the short-form boundary
    document["records"][0]["identity"] = json!("aaaaaaaaaaaaaaaé0000");

    let target = AttributeStore::default();
    let err = target
        .import(serde_json::to_vec(&document).unwrap().as_slice())
        .unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
    assert!(target.is_empty());
}

#[test]
fn test_malformed_memory_identity_is_format_error() {
    let (_store, engine) = populated();
    let mut buffer = Vec::new();
    engine.export(&mut buffer).unwrap();
    let mut document: Value = serde_json::from_slice(&buffer).unwrap();
    document["memories"][0]["identity"] = json!("aaaaaaaaaaaaaaaé0000");

    let target = MemoryLoop::default();
    let err = target
        .import(serde_json::to_vec(&document).unwrap().as_slice())
        .unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
    assert!(target.is_empty());
}

#[test]
fn test_malformed_identity_in_envelope_is_format_error() {
    let (store, engine) = populated();
    let mut document = export_document(&store, &engine);
    document["memory"]["memories"][0]["associations"] = json!(["not-a-hash"]);
    reseal(&mut document);

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    let bytes = serde_json::to_vec(&document).unwrap();
    let err = backup::import_snapshot(&target_store, &target_engine, bytes.as_slice()).unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
    assert!(target_store.is_empty());
    assert!(target_engine.is_empty());
}

#[test]
fn test_tampered_body_fails_checksum() {
    let (store, engine) = populated();
    let mut document = export_document(&store, &engine);
    document["store"]["total_queries"] = json!(999);

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    let bytes = serde_json::to_vec(&document).unwrap();
    let err = backup::import_snapshot(&target_store, &target_engine, bytes.as_slice()).unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
    assert!(target_store.is_empty());
    assert!(target_engine.is_empty());
}

#[test]
fn test_invalid_memory_section_leaves_both_components_untouched() {
    let (store, engine) = populated();
    let mut document = export_document(&store, &engine);
    document["memory"]["memories"][0]["strength"] = json!(0.5);
    reseal(&mut document);

    let target_store = AttributeStore::default();
    target_store.store_json(&json!({"sector": "existing"})).unwrap();
    let target_engine = MemoryLoop::default();
    target_engine.ingest(&json!({"event": "existing"}), &[]).unwrap();

    let bytes = serde_json::to_vec(&document).unwrap();
    let err = backup::import_snapshot(&target_store, &target_engine, bytes.as_slice()).unwrap_err();
    assert!(matches!(err, HypercubeError::Format(_)));

    assert_eq!(target_store.len(), 1);
    assert_eq!(target_engine.len(), 1);
    let existing = target_store
        .query(&AttributeQuery::new().eq(Dimension::Sector, "existing"))
        .unwrap();
    assert_eq!(existing.len(), 1);
}

#[test]
fn test_header_count_mismatch_rejected() {
    let (store, engine) = populated();
    let mut document = export_document(&store, &engine);
    document["metadata"]["record_count"] = json!(1);

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    let bytes = serde_json::to_vec(&document).unwrap();
    let err = backup::import_snapshot(&target_store, &target_engine, bytes.as_slice()).unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
    assert!(target_store.is_empty());
}

#[test]
fn test_garbage_input_is_format_error() {
    let store = AttributeStore::default();
    let engine = MemoryLoop::default();
    let err = backup::import_snapshot(&store, &engine, &b"not json"[..]).unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");

    let err = backup::import_snapshot(&store, &engine, &b"{}"[..]).unwrap_err();
    assert_eq!(err.code(), "FORMAT_ERROR");
}

// ============================================================================
// FILES & ARCHIVE
// ============================================================================

#[test]
fn test_save_and_load_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("state").join("hypercube.json");
    let (store, engine) = populated();

    let saved = backup::save_to_file(&store, &engine, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());
    assert!(backup::verify_file(&path).unwrap());

    let target_store = AttributeStore::default();
    let target_engine = MemoryLoop::default();
    let loaded = backup::load_from_file(&target_store, &target_engine, &path).unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(target_store.len(), store.len());
    assert_eq!(target_engine.len(), 12);
}

#[test]
fn test_missing_file_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let store = AttributeStore::default();
    let engine = MemoryLoop::default();
    let err = backup::load_from_file(&store, &engine, &temp_dir.path().join("absent.json"))
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn test_verify_file_detects_edits() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshot.json");
    let (store, engine) = populated();
    backup::save_to_file(&store, &engine, &path).unwrap();

    let mut document: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    document["memory"]["counters"]["loop_count"] = json!(1000);
    fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

    assert!(!backup::verify_file(&path).unwrap());
}

#[test]
fn test_archive_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let archive = SnapshotArchive::new(temp_dir.path().join("archive")).unwrap();
    let (store, engine) = populated();

    assert!(archive.list().unwrap().is_empty());
    let empty_store = AttributeStore::default();
    let empty_engine = MemoryLoop::default();
    assert!(archive
        .restore_latest(&empty_store, &empty_engine)
        .unwrap()
        .is_none());

    let first = archive.save(&store, &engine).unwrap();
    engine.ingest(&json!({"event": "after first save"}), &[]).unwrap();
    let second = archive.save(&store, &engine).unwrap();
    engine.run_cycle();
    let third = archive.save(&store, &engine).unwrap();
    assert_eq!((first.id, second.id, third.id), (1, 2, 3));

    let listed: Vec<u64> = archive.list().unwrap().iter().map(|a| a.id).collect();
    assert_eq!(listed, vec![1, 2, 3]);
    assert!(archive.verify(2).unwrap());

    assert_eq!(archive.purge_old(2).unwrap(), 1);
    let listed: Vec<u64> = archive.list().unwrap().iter().map(|a| a.id).collect();
    assert_eq!(listed, vec![2, 3]);
    assert_eq!(archive.purge_old(5).unwrap(), 0);

    let restored = archive
        .restore_latest(&empty_store, &empty_engine)
        .unwrap()
        .unwrap();
    assert_eq!(restored.id, 3);
    assert_eq!(empty_engine.len(), 13);
    assert_eq!(empty_store.len(), store.len());

    // Ids keep increasing after a purge
    assert_eq!(archive.save(&store, &engine).unwrap().id, 4);
}
