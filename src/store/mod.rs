//! 40-slot attribute store
//!
//! Holds content-addressed records tagged with up to 40 named slots:
//! - Equality index per (slot, value) bucket for `==` and `in`
//! - Linear scan for range operators (`>`, `<`, `>=`, `<=`)
//! - CARE ledger applied on every store call that carries a value
//! - Full-state export/import as one JSON document

pub mod ledger;
pub mod types;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::constants::{
    DEFAULT_CARE_RATE, DEFAULT_QUERY_SLA_MS, DIMENSION_COUNT, SNAPSHOT_FORMAT_VERSION,
};
use crate::errors::{HypercubeError, Result};
use crate::identity::Identity;
use crate::metrics;

pub use ledger::{CareLedger, LedgerTotals};
pub use types::*;

/// Configuration for an attribute store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Share of each stored value redistributed into the CARE pool
    pub care_rate: f64,

    /// Soft latency budget per query; breaches are logged, never enforced
    pub query_sla: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            care_rate: DEFAULT_CARE_RATE,
            query_sla: Duration::from_millis(DEFAULT_QUERY_SLA_MS),
        }
    }
}

/// Records plus indexes. Always mutated as a unit under the store's write lock.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    records: HashMap<Identity, Record>,
    /// Identities in insertion order
    order: Vec<Identity>,
    index: HashMap<(Dimension, IndexKey), HashSet<Identity>>,
    total_stored: u64,
    next_sequence: u64,
}

impl StoreState {
    fn insert(&mut self, request: StoreRequest, identity: Identity, now: DateTime<Utc>) -> bool {
        self.total_stored += 1;
        if self.records.contains_key(&identity) {
            return false;
        }

        for (dimension, value) in request.attributes.iter() {
            self.index
                .entry((dimension, value.index_key()))
                .or_default()
                .insert(identity.clone());
        }

        let record = Record {
            identity: identity.clone(),
            attributes: request.attributes,
            value: request.value,
            payload: request.payload,
            created_at: now,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.order.push(identity.clone());
        self.records.insert(identity, record);
        true
    }

    /// Rebuild a state from exported records, rejecting anything inconsistent
    fn from_records(records: Vec<Record>, total_stored: u64) -> Result<Self> {
        let mut state = StoreState::default();
        let mut sorted = records;
        sorted.sort_by_key(|r| r.sequence);

        for record in sorted {
            record.attributes.validate().map_err(|e| {
                HypercubeError::Format(format!("record {}: {}", record.identity.short(), e))
            })?;
            if record.content_identity() != record.identity {
                return Err(HypercubeError::Format(format!(
                    "record {} does not match its content hash",
                    record.identity.short()
                )));
            }
            if state.records.contains_key(&record.identity) {
                return Err(HypercubeError::Format(format!(
                    "duplicate record {}",
                    record.identity.short()
                )));
            }

            for (dimension, value) in record.attributes.iter() {
                state
                    .index
                    .entry((dimension, value.index_key()))
                    .or_default()
                    .insert(record.identity.clone());
            }
            state.next_sequence = state.next_sequence.max(record.sequence + 1);
            state.order.push(record.identity.clone());
            state.records.insert(record.identity.clone(), record);
        }

        state.total_stored = total_stored.max(state.records.len() as u64);
        Ok(state)
    }

    fn filled_slots(&self) -> usize {
        self.records.values().map(|r| r.attributes.len()).sum()
    }
}

#[derive(Debug, Default)]
struct QueryStats {
    total_queries: u64,
    total_time: Duration,
}

/// Exported header for one store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshotMetadata {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub dimensions: usize,
    pub record_count: usize,
}

/// Full exported state of an attribute store.
///
/// Indexes are not written; they are rebuilt from the records on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub metadata: StoreSnapshotMetadata,
    pub care_rate: f64,
    pub ledger: LedgerTotals,
    pub total_stored: u64,
    pub total_queries: u64,
    pub records: Vec<Record>,
}

/// Validated replacement state, ready to swap in
pub(crate) struct PreparedStore {
    state: StoreState,
    ledger: LedgerTotals,
    total_queries: u64,
}

/// The 40-slot attribute store.
///
/// Thread-safe: mutations take the write lock for the whole operation, queries
/// share the read lock.
#[derive(Debug)]
pub struct AttributeStore {
    config: StoreConfig,
    state: RwLock<StoreState>,
    ledger: CareLedger,
    query_stats: Mutex<QueryStats>,
}

impl AttributeStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let ledger = CareLedger::new(config.care_rate)?;
        Ok(Self {
            config,
            state: RwLock::new(StoreState::default()),
            ledger,
            query_stats: Mutex::new(QueryStats::default()),
        })
    }

    /// Store with the default CARE rate and SLA
    pub fn with_defaults() -> Self {
        Self {
            config: StoreConfig::default(),
            state: RwLock::new(StoreState::default()),
            ledger: CareLedger::default(),
            query_stats: Mutex::new(QueryStats::default()),
        }
    }

    /// Store a record and return its identity.
    ///
    /// Storing content that is already present keeps the existing record
    /// (same identity, original `created_at`) but still counts toward
    /// `total_stored` and still applies the ledger entry.
    pub fn store(&self, request: StoreRequest) -> Result<Identity> {
        if let Err(e) = request.validate() {
            metrics::STORE_TOTAL.with_label_values(&["invalid"]).inc();
            return Err(e);
        }
        let identity = request.identity();
        let value = request.value;

        let inserted = {
            let mut state = self.state.write();
            if let Some(value) = value {
                self.ledger.apply(value)?;
            }
            state.insert(request, identity.clone(), Utc::now())
        };

        metrics::STORE_TOTAL.with_label_values(&["ok"]).inc();
        if value.is_some() {
            metrics::CARE_POOL.set(self.ledger.totals().pool);
        }
        tracing::debug!(
            identity = identity.short(),
            inserted,
            value = ?value,
            "Record stored"
        );

        Ok(identity)
    }

    /// Store a flat string-keyed document (slot names plus `value`)
    pub fn store_json(&self, document: &serde_json::Value) -> Result<Identity> {
        self.store(StoreRequest::from_json(document)?)
    }

    /// Run a query. Never errors on zero matches; invalid filters fail the
    /// whole query before any lookup.
    pub fn query(&self, query: &AttributeQuery) -> Result<Vec<Record>> {
        query.validate()?;
        let start = Instant::now();

        let results = {
            let state = self.state.read();
            Self::execute(&state, query)
        };

        let elapsed = start.elapsed();
        self.record_query(query, results.len(), elapsed);
        Ok(results)
    }

    /// String-keyed query form: slot → value and slot → operator symbol
    pub fn query_json(
        &self,
        filters: &serde_json::Map<String, serde_json::Value>,
        operators: &HashMap<String, String>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let query = AttributeQuery::from_json(filters, operators, limit)?;
        self.query(&query)
    }

    fn execute(state: &StoreState, query: &AttributeQuery) -> Vec<Record> {
        let mut candidates: Option<HashSet<Identity>> = None;

        for filter in &query.filters {
            let matched = Self::resolve_filter(state, filter);
            candidates = Some(match candidates {
                None => matched,
                Some(current) => current.intersection(&matched).cloned().collect(),
            });
            if candidates.as_ref().is_some_and(|c| c.is_empty()) {
                return Vec::new();
            }
        }

        let mut scored: Vec<(usize, &Record)> = match &candidates {
            None => state.records.values().map(|r| (0, r)).collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| state.records.get(id))
                .map(|r| {
                    let matching = query.filters.iter().filter(|f| f.matches(r)).count();
                    (matching, r)
                })
                .collect(),
        };

        // Relevance: most matching filters first, then most recent
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.sequence.cmp(&a.1.sequence)));

        let limit = query.limit.unwrap_or(usize::MAX);
        scored.into_iter().take(limit).map(|(_, r)| r.clone()).collect()
    }

    fn resolve_filter(state: &StoreState, filter: &Filter) -> HashSet<Identity> {
        if !filter.operator.uses_index() {
            return state
                .records
                .values()
                .filter(|r| filter.matches(r))
                .map(|r| r.identity.clone())
                .collect();
        }

        // Validated filters pair `==` with a scalar and `in` with a set
        let values: &[AttributeValue] = match &filter.value {
            FilterValue::Scalar(value) => std::slice::from_ref(value),
            FilterValue::Set(values) => values,
        };
        let mut matched = HashSet::new();
        for value in values {
            if let Some(bucket) = state.index.get(&(filter.dimension, value.index_key())) {
                matched.extend(bucket.iter().cloned());
            }
        }
        matched
    }

    fn record_query(&self, query: &AttributeQuery, result_count: usize, elapsed: Duration) {
        {
            let mut stats = self.query_stats.lock();
            stats.total_queries += 1;
            stats.total_time += elapsed;
        }

        metrics::QUERY_DURATION.observe(elapsed.as_secs_f64());
        metrics::QUERY_RESULTS.observe(result_count as f64);

        if elapsed > self.config.query_sla {
            metrics::QUERY_SLA_BREACHES.inc();
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                sla_ms = self.config.query_sla.as_millis() as u64,
                filters = query.filters.len(),
                "Query exceeded latency budget"
            );
        } else {
            tracing::debug!(
                elapsed_us = elapsed.as_micros() as u64,
                filters = query.filters.len(),
                results = result_count,
                "Query completed"
            );
        }
    }

    /// Look up one record by identity
    pub fn get(&self, identity: &Identity) -> Option<Record> {
        self.state.read().records.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> StoreStats {
        let state = self.state.read();
        let ledger = self.ledger.totals();
        let (total_queries, total_time) = {
            let q = self.query_stats.lock();
            (q.total_queries, q.total_time)
        };

        let record_count = state.records.len();
        let dense = record_count * DIMENSION_COUNT;
        let free_capacity_percent = if dense == 0 {
            100.0
        } else {
            100.0 * (1.0 - state.filled_slots() as f64 / dense as f64)
        };
        let avg_query_time_ms = if total_queries == 0 {
            0.0
        } else {
            total_time.as_secs_f64() * 1000.0 / total_queries as f64
        };

        StoreStats {
            total_stored: state.total_stored,
            total_queries,
            record_count,
            index_buckets: state.index.len(),
            dimensions: DIMENSION_COUNT,
            care_rate: self.ledger.rate(),
            care_pool: ledger.pool,
            care_redistributed: ledger.redistributed,
            avg_query_time_ms,
            free_capacity_percent,
        }
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Capture the full state
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        let records: Vec<Record> = state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect();

        StoreSnapshot {
            metadata: StoreSnapshotMetadata {
                exported_at: Utc::now(),
                version: SNAPSHOT_FORMAT_VERSION.to_string(),
                dimensions: DIMENSION_COUNT,
                record_count: records.len(),
            },
            care_rate: self.ledger.rate(),
            ledger: self.ledger.totals(),
            total_stored: state.total_stored,
            total_queries: self.query_stats.lock().total_queries,
            records,
        }
    }

    /// Validate a snapshot and build the state it describes without touching
    /// the live store.
    pub(crate) fn prepare_restore(&self, snapshot: StoreSnapshot) -> Result<PreparedStore> {
        if snapshot.metadata.version != SNAPSHOT_FORMAT_VERSION {
            return Err(HypercubeError::Format(format!(
                "unsupported store snapshot version '{}' (expected {})",
                snapshot.metadata.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        if snapshot.metadata.dimensions != DIMENSION_COUNT {
            return Err(HypercubeError::Format(format!(
                "snapshot has {} dimensions (expected {})",
                snapshot.metadata.dimensions, DIMENSION_COUNT
            )));
        }
        if (snapshot.care_rate - self.ledger.rate()).abs() > f64::EPSILON {
            tracing::warn!(
                snapshot_rate = snapshot.care_rate,
                store_rate = self.ledger.rate(),
                "Snapshot CARE rate differs from this store; keeping the store's rate"
            );
        }

        let state = StoreState::from_records(snapshot.records, snapshot.total_stored)?;
        Ok(PreparedStore {
            state,
            ledger: snapshot.ledger,
            total_queries: snapshot.total_queries,
        })
    }

    /// Swap in a prepared state. Infallible.
    pub(crate) fn commit_restore(&self, prepared: PreparedStore) {
        let mut state = self.state.write();
        *state = prepared.state;
        self.ledger.restore(prepared.ledger);
        *self.query_stats.lock() = QueryStats {
            total_queries: prepared.total_queries,
            total_time: Duration::ZERO,
        };
        metrics::CARE_POOL.set(prepared.ledger.pool);
        tracing::info!(records = state.records.len(), "Attribute store restored");
    }

    /// Replace the whole state with a snapshot; all-or-nothing
    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<()> {
        let prepared = self.prepare_restore(snapshot)?;
        self.commit_restore(prepared);
        Ok(())
    }

    /// Write the full state as one JSON document
    pub fn export<W: Write>(&self, sink: W) -> Result<()> {
        let snapshot = self.snapshot();
        serde_json::to_writer_pretty(sink, &snapshot)?;
        Ok(())
    }

    /// Replace the full state from a JSON document written by [`Self::export`]
    pub fn import<R: Read>(&self, source: R) -> Result<()> {
        let snapshot: StoreSnapshot = serde_json::from_reader(source)
            .map_err(|e| HypercubeError::Format(format!("invalid store snapshot: {e}")))?;
        self.restore(snapshot)
    }
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}
