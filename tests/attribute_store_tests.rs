//! Attribute Store Tests
//!
//! Tests the public behaviour of the 40-slot store:
//! - Content identity and deduplication
//! - Equality, membership and range queries, and their intersection
//! - CARE ledger accounting
//! - Validation failures leaving state untouched
//! - Concurrent store and query access

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use hypercube::identity::identity_of;
use hypercube::memory::MemoryLoop;
use hypercube::store::{
    AttributeQuery, AttributeStore, AttributeValue, Attributes, Dimension, StoreConfig,
    StoreRequest,
};

// ============================================================================
// TEST INFRASTRUCTURE
// ============================================================================

fn brand(sector: &str, name: &str, quality: f64) -> StoreRequest {
    StoreRequest::new(
        Attributes::new()
            .with(Dimension::Sector, sector)
            .with(Dimension::Brand, name)
            .with(Dimension::QualityScore, quality),
    )
}

fn seeded_store() -> AttributeStore {
    let store = AttributeStore::default();
    store.store(brand("ai", "Alpha", 0.95)).unwrap();
    store.store(brand("ai", "Beta", 0.75)).unwrap();
    store.store(brand("ai", "Gamma", 0.55)).unwrap();
    store.store(brand("bio", "Delta", 0.85)).unwrap();
    store
}

fn brands(records: &[hypercube::store::Record]) -> Vec<String> {
    let mut names: Vec<String> = records
        .iter()
        .filter_map(|r| r.get(Dimension::Brand).map(|v| v.to_string()))
        .collect();
    names.sort();
    names
}

// ============================================================================
// IDENTITY
// ============================================================================

#[test]
fn test_identity_ignores_key_order() {
    let a = json!({"sector": "ai", "year": 2025, "nested": {"x": 1, "y": 2}});
    let b = json!({"nested": {"y": 2, "x": 1}, "year": 2025, "sector": "ai"});
    assert_eq!(identity_of(&a).unwrap(), identity_of(&b).unwrap());
    assert_eq!(identity_of(&a).unwrap(), identity_of(&a).unwrap());
}

#[test]
fn test_store_json_identity_ignores_key_order() {
    let store = AttributeStore::default();
    let a = store.store_json(&json!({"sector": "ai", "brand": "X", "value": 10.0})).unwrap();
    let b = store.store_json(&json!({"value": 10.0, "brand": "X", "sector": "ai"})).unwrap();
    assert_eq!(a, b);
    assert_eq!(store.len(), 1);
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn test_sector_scenario() {
    let store = seeded_store();
    let mut filters = serde_json::Map::new();
    filters.insert("sector".to_string(), json!("ai"));

    let hits = store.query_json(&filters, &HashMap::new(), None).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(brands(&hits), vec!["Alpha", "Beta", "Gamma"]);
}

#[test]
fn test_no_filters_returns_everything() {
    let store = seeded_store();
    let hits = store
        .query_json(&serde_json::Map::new(), &HashMap::new(), None)
        .unwrap();
    assert_eq!(hits.len(), 4);
}

#[test]
fn test_range_and_equality_intersect() {
    let store = seeded_store();
    let query = AttributeQuery::new()
        .eq(Dimension::Sector, "ai")
        .gte(Dimension::QualityScore, 0.75);
    let hits = store.query(&query).unwrap();
    assert_eq!(brands(&hits), vec!["Alpha", "Beta"]);
}

#[test]
fn test_membership_query() {
    let store = seeded_store();
    let query = AttributeQuery::new().one_of(Dimension::Brand, ["Alpha", "Delta", "Nobody"]);
    let hits = store.query(&query).unwrap();
    assert_eq!(brands(&hits), vec!["Alpha", "Delta"]);
}

#[test]
fn test_strict_range_operators() {
    let store = seeded_store();
    let gt = store
        .query(&AttributeQuery::new().gt(Dimension::QualityScore, 0.85))
        .unwrap();
    assert_eq!(brands(&gt), vec!["Alpha"]);

    let lt = store
        .query(&AttributeQuery::new().lt(Dimension::QualityScore, 0.75))
        .unwrap();
    assert_eq!(brands(&lt), vec!["Gamma"]);

    let lte = store
        .query(&AttributeQuery::new().lte(Dimension::QualityScore, 0.75))
        .unwrap();
    assert_eq!(brands(&lte), vec!["Beta", "Gamma"]);
}

#[test]
fn test_absent_slot_never_matches() {
    let store = seeded_store();
    let hits = store
        .query(&AttributeQuery::new().gte(Dimension::Confidence, 0.0))
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_no_match_is_empty_not_error() {
    let store = seeded_store();
    let hits = store
        .query(&AttributeQuery::new().eq(Dimension::Sector, "space"))
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_limit_truncates_most_recent_first() {
    let store = seeded_store();
    let hits = store
        .query(&AttributeQuery::new().eq(Dimension::Sector, "ai").limit(2))
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].get(Dimension::Brand), Some(&AttributeValue::from("Gamma")));
    assert_eq!(hits[1].get(Dimension::Brand), Some(&AttributeValue::from("Beta")));
}

#[test]
fn test_int_and_float_are_distinct_equality_keys() {
    let store = AttributeStore::default();
    store
        .store(StoreRequest::new(Attributes::new().with(Dimension::Year, 2025)))
        .unwrap();

    let as_int = store.query(&AttributeQuery::new().eq(Dimension::Year, 2025)).unwrap();
    assert_eq!(as_int.len(), 1);
    let as_float = store.query(&AttributeQuery::new().eq(Dimension::Year, 2025.0)).unwrap();
    assert!(as_float.is_empty());

    // Ranges compare numerically across int and float
    let range = store.query(&AttributeQuery::new().gte(Dimension::Year, 2024.5)).unwrap();
    assert_eq!(range.len(), 1);
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_unknown_slot_in_query_rejected() {
    let store = seeded_store();
    let mut filters = serde_json::Map::new();
    filters.insert("sector".to_string(), json!("ai"));
    filters.insert("mood".to_string(), json!("calm"));

    let err = store.query_json(&filters, &HashMap::new(), None).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[test]
fn test_operator_value_mismatch_rejected() {
    let store = seeded_store();
    let mut filters = serde_json::Map::new();
    filters.insert("sector".to_string(), json!("ai"));
    let mut operators = HashMap::new();
    operators.insert("sector".to_string(), "in".to_string());

    let err = store.query_json(&filters, &operators, None).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    operators.insert("sector".to_string(), "~".to_string());
    assert!(store.query_json(&filters, &operators, None).is_err());
}

#[test]
fn test_failed_query_does_not_count() {
    let store = seeded_store();
    let bad = AttributeQuery::new().eq(Dimension::Sector, "ai").limit(0);
    assert!(store.query(&bad).is_err());
    assert_eq!(store.get_stats().total_queries, 0);
}

#[test]
fn test_empty_string_slot_rejected() {
    let store = AttributeStore::default();
    let err = store.store_json(&json!({"sector": ""})).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(store.is_empty());

    let err = store
        .query(&AttributeQuery::new().eq(Dimension::Sector, ""))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[test]
fn test_mirror_skips_empty_string_slots() {
    let store = Arc::new(AttributeStore::default());
    let engine = MemoryLoop::default().with_store(Arc::clone(&store));
    engine
        .ingest(&json!({"sector": "", "brand": "Acme"}), &[])
        .unwrap();

    let records = store.query(&AttributeQuery::new()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attributes.len(), 1);
    assert_eq!(
        records[0].attributes.get(Dimension::Brand),
        Some(&AttributeValue::from("Acme"))
    );
    assert!(records[0].attributes.get(Dimension::Sector).is_none());
}

// ============================================================================
// CARE LEDGER
// ============================================================================

#[test]
fn test_care_pool_increases_by_rate() {
    let store = AttributeStore::default();
    store.store(brand("ai", "A", 0.9).with_value(1000.0)).unwrap();

    let stats = store.get_stats();
    assert!((stats.care_pool - 150.0).abs() < 1e-9);
    assert!((stats.care_redistributed - 150.0).abs() < 1e-9);

    store.store(brand("ai", "B", 0.9).with_value(200.0)).unwrap();
    let stats = store.get_stats();
    assert!((stats.care_pool - 180.0).abs() < 1e-9);
}

#[test]
fn test_restore_of_same_content_is_accounted_again() {
    let store = AttributeStore::default();
    store.store(brand("ai", "A", 0.9).with_value(100.0)).unwrap();
    store.store(brand("ai", "A", 0.9).with_value(100.0)).unwrap();

    let stats = store.get_stats();
    assert_eq!(stats.record_count, 1);
    assert_eq!(stats.total_stored, 2);
    assert!((stats.care_pool - 30.0).abs() < 1e-9);
}

#[test]
fn test_custom_care_rate() {
    let store = AttributeStore::new(StoreConfig {
        care_rate: 0.5,
        ..Default::default()
    })
    .unwrap();
    store.store(brand("ai", "A", 0.9).with_value(10.0)).unwrap();
    assert!((store.get_stats().care_pool - 5.0).abs() < 1e-9);

    assert!(AttributeStore::new(StoreConfig {
        care_rate: 1.5,
        ..Default::default()
    })
    .is_err());
}

// ============================================================================
// STATS & CONCURRENCY
// ============================================================================

#[test]
fn test_stats_track_queries_and_buckets() {
    let store = seeded_store();
    store.query(&AttributeQuery::new()).unwrap();
    store.query(&AttributeQuery::new().eq(Dimension::Sector, "ai")).unwrap();

    let stats = store.get_stats();
    assert_eq!(stats.total_queries, 2);
    assert_eq!(stats.dimensions, 40);
    // 2 sectors + 4 brands + 4 quality scores
    assert_eq!(stats.index_buckets, 10);
    assert!((stats.free_capacity_percent - 92.5).abs() < 1e-9);
}

#[test]
fn test_concurrent_stores_and_queries() {
    let store = Arc::new(AttributeStore::default());
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..50 {
                    store
                        .store(brand("ai", &format!("T{t}-{i}"), 0.5).with_value(1.0))
                        .unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    store
                        .query(&AttributeQuery::new().eq(Dimension::Sector, "ai"))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let stats = store.get_stats();
    assert_eq!(stats.record_count, 200);
    assert!((stats.care_pool - 30.0).abs() < 1e-6);
    let all = store.query(&AttributeQuery::new().eq(Dimension::Sector, "ai")).unwrap();
    assert_eq!(all.len(), 200);
}
