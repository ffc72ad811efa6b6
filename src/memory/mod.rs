//! Staged memory loop
//!
//! Memories move through six ordered phases, at most one phase per cycle:
//! - INTAKE → SORT → CONSENSUS → ENCODE → TRANSFER → AMPLIFY
//! - Strength and counters only grow; memories are never deleted
//! - Generation snapshots summarise the loop every N TRANSFER entries
//! - Ingested content is optionally mirrored into an [`AttributeStore`]

pub mod types;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::{
    CONSENSUS_BONUS_VALIDATIONS, CONSENSUS_STRENGTH_BONUS, HERD_VALIDATIONS_REQUIRED,
    INITIAL_STRENGTH, SNAPSHOT_FORMAT_VERSION, SORT_MIN_STRENGTH, TOTAL_PAGES, VALUE_FIELD,
};
use crate::errors::{HypercubeError, Result, ValidationErrorExt};
use crate::identity::{identity_of_value, Identity};
use crate::metrics;
use crate::store::{AttributeStore, Attributes, StoreRequest};
use crate::validation;

pub use types::*;

/// Memories plus the indexes derived from them
#[derive(Debug, Default)]
struct LoopState {
    /// Insertion order
    memories: Vec<Memory>,
    by_identity: HashMap<Identity, usize>,
    /// Tag → memory positions, in insertion order
    by_tag: BTreeMap<String, Vec<usize>>,
    generations: Vec<GenerationSnapshot>,
    current_generation: u64,
    /// Lifetime count of memories that entered TRANSFER
    transferred_total: u64,
    /// `transferred_total` value at the last snapshot boundary
    snapshot_mark: u64,
    loop_count: u64,
    total_echoes: u64,
    herd_validations: u64,
    phase_transitions: u64,
}

impl LoopState {
    fn from_parts(
        memories: Vec<Memory>,
        generations: Vec<GenerationSnapshot>,
        counters: LoopCounters,
    ) -> Result<Self> {
        let mut state = LoopState {
            generations,
            current_generation: counters.current_generation,
            transferred_total: counters.transferred_total,
            snapshot_mark: counters.snapshot_mark,
            loop_count: counters.loop_count,
            total_echoes: counters.total_echoes,
            herd_validations: counters.herd_validations,
            phase_transitions: counters.phase_transitions,
            ..Default::default()
        };

        for memory in memories {
            if identity_of_value(&memory.content) != memory.identity {
                return Err(HypercubeError::Format(format!(
                    "memory {} does not match its content hash",
                    memory.identity.short()
                )));
            }
            if !memory.strength.is_finite() || memory.strength < INITIAL_STRENGTH {
                return Err(HypercubeError::Format(format!(
                    "memory {} has invalid strength {}",
                    memory.identity.short(),
                    memory.strength
                )));
            }
            if state.by_identity.contains_key(&memory.identity) {
                return Err(HypercubeError::Format(format!(
                    "duplicate memory {}",
                    memory.identity.short()
                )));
            }
            state.push(memory);
        }

        for memory in &state.memories {
            if let Some(missing) = memory
                .associations
                .iter()
                .find(|a| !state.by_identity.contains_key(*a))
            {
                return Err(HypercubeError::Format(format!(
                    "memory {} is associated with unknown memory {}",
                    memory.identity.short(),
                    missing.short()
                )));
            }
        }

        let mut previous: Option<u64> = None;
        for snapshot in &state.generations {
            if previous.is_some_and(|p| snapshot.generation <= p)
                || snapshot.generation >= state.current_generation
            {
                return Err(HypercubeError::Format(format!(
                    "generation {} is out of sequence",
                    snapshot.generation
                )));
            }
            previous = Some(snapshot.generation);
        }
        if state.snapshot_mark > state.transferred_total {
            return Err(HypercubeError::Format(
                "snapshot mark is ahead of the transfer count".to_string(),
            ));
        }

        Ok(state)
    }

    fn push(&mut self, memory: Memory) {
        let position = self.memories.len();
        for tag in &memory.tags {
            self.by_tag.entry(tag.clone()).or_default().push(position);
        }
        self.by_identity.insert(memory.identity.clone(), position);
        self.memories.push(memory);
    }

    /// Up to `max` other memories sharing a tag, walking tags in the memory's
    /// own order and each tag bucket in insertion order
    fn associations_for(&self, position: usize, max: usize) -> Vec<Identity> {
        let mut found: Vec<Identity> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();

        'tags: for tag in &self.memories[position].tags {
            let Some(bucket) = self.by_tag.get(tag) else {
                continue;
            };
            for &other in bucket {
                if found.len() >= max {
                    break 'tags;
                }
                if other != position && seen.insert(other) {
                    found.push(self.memories[other].identity.clone());
                }
            }
        }
        found
    }

    fn avg_strength(&self) -> f64 {
        if self.memories.is_empty() {
            return 0.0;
        }
        self.memories.iter().map(|m| m.strength).sum::<f64>() / self.memories.len() as f64
    }

    fn top_tags(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .by_tag
            .iter()
            .map(|(tag, positions)| (tag.clone(), positions.len()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        counts
    }

    fn memories_by_phase(&self) -> BTreeMap<Phase, usize> {
        let mut counts = BTreeMap::new();
        for memory in &self.memories {
            *counts.entry(memory.phase).or_insert(0) += 1;
        }
        counts
    }

    fn counters(&self) -> LoopCounters {
        LoopCounters {
            current_generation: self.current_generation,
            transferred_total: self.transferred_total,
            snapshot_mark: self.snapshot_mark,
            loop_count: self.loop_count,
            total_echoes: self.total_echoes,
            herd_validations: self.herd_validations,
            phase_transitions: self.phase_transitions,
        }
    }
}

/// Exported loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopCounters {
    pub current_generation: u64,
    pub transferred_total: u64,
    pub snapshot_mark: u64,
    pub loop_count: u64,
    pub total_echoes: u64,
    pub herd_validations: u64,
    pub phase_transitions: u64,
}

/// Exported header for the memory loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSnapshotMetadata {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub phases: usize,
    pub pages: u32,
    pub memory_count: usize,
}

/// Full exported state of a memory loop. Tag and identity indexes are
/// rebuilt from `memories` on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub metadata: LoopSnapshotMetadata,
    pub counters: LoopCounters,
    pub memories: Vec<Memory>,
    pub generations: Vec<GenerationSnapshot>,
}

/// Validated replacement state, ready to swap in
pub(crate) struct PreparedLoop {
    state: LoopState,
}

/// The staged memory loop
pub struct MemoryLoop {
    config: LoopConfig,
    state: RwLock<LoopState>,
    store: Option<Arc<AttributeStore>>,
}

impl MemoryLoop {
    pub fn new(config: LoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(LoopState::default()),
            store: None,
        })
    }

    /// Mirror every newly ingested memory into `store`
    pub fn with_store(mut self, store: Arc<AttributeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Ingest content with tags.
    ///
    /// Content already present strengthens the existing memory (one more
    /// echo) instead of creating a duplicate; its tags are left untouched.
    pub fn ingest<T: Serialize + ?Sized>(&self, content: &T, tags: &[String]) -> Result<Identity> {
        validation::validate_tags(tags).map_validation_err("tags")?;
        let content = serde_json::to_value(content)
            .map_err(|e| HypercubeError::validation("content", e.to_string()))?;
        let identity = identity_of_value(&content);

        let mut state = self.state.write();

        if let Some(&position) = state.by_identity.get(&identity) {
            state.memories[position].echo_count += 1;
            state.total_echoes += 1;
            metrics::INGEST_TOTAL.with_label_values(&["echo"]).inc();
            debug!(identity = identity.short(), "Existing memory echoed");
            return Ok(identity);
        }

        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique_tags.contains(tag) {
                unique_tags.push(tag.clone());
            }
        }

        let memory = Memory::new(identity.clone(), content, unique_tags, state.current_generation);

        // Mirror before inserting so a rejected mirror leaves the loop untouched
        if let Some(store) = &self.store {
            store.store(Self::mirror_request(&memory))?;
        }

        debug!(
            identity = identity.short(),
            tags = memory.tags.len(),
            generation = memory.generation,
            "Memory ingested"
        );
        state.push(memory);
        metrics::INGEST_TOTAL.with_label_values(&["new"]).inc();
        Ok(identity)
    }

    /// Attribute-store copy of a memory: slot-named content fields become
    /// attributes, everything else rides along in the payload
    fn mirror_request(memory: &Memory) -> StoreRequest {
        let attributes = Attributes::extract_known(&memory.content);
        let value = memory
            .content
            .get(VALUE_FIELD)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite());

        let payload = json!({
            "content": memory.content,
            "memory": {
                "identity": memory.identity,
                "phase": memory.phase,
                "page": memory.page(),
                "strength": memory.strength,
                "generation": memory.generation,
                "tags": memory.tags,
                "created_at": memory.created_at,
            }
        });

        let mut request = StoreRequest::new(attributes).with_payload(payload);
        request.value = value;
        request
    }

    /// Run one pass of the phase rules over every memory.
    ///
    /// Each memory is judged by the phase it held when the cycle began, so no
    /// memory advances more than one phase per call.
    pub fn run_cycle(&self) -> CycleStats {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.loop_count += 1;

        let mut stats = CycleStats {
            cycle: state.loop_count,
            ..Default::default()
        };

        for position in 0..state.memories.len() {
            let phase = state.memories[position].phase;
            let advance = match phase {
                Phase::Intake => {
                    let memory = &state.memories[position];
                    memory.strength >= SORT_MIN_STRENGTH || memory.echo_count > 0
                }
                Phase::Sort => {
                    state.herd_validations += 1;
                    let memory = &mut state.memories[position];
                    memory.herd_validations += 1;
                    memory.herd_validations >= HERD_VALIDATIONS_REQUIRED
                }
                Phase::Consensus => {
                    state.herd_validations += 1;
                    let memory = &mut state.memories[position];
                    memory.herd_validations += 1;
                    memory.consensus_validations += 1;
                    if memory.consensus_validations <= CONSENSUS_BONUS_VALIDATIONS {
                        memory.strength += CONSENSUS_STRENGTH_BONUS;
                    }
                    let baseline = memory.consensus_baseline.unwrap_or(INITIAL_STRENGTH);
                    memory.herd_validations >= HERD_VALIDATIONS_REQUIRED
                        && memory.strength > baseline
                }
                Phase::Encode => {
                    let associations =
                        state.associations_for(position, self.config.max_associations);
                    let memory = &mut state.memories[position];
                    memory.associations = associations;
                    memory.strength = memory.strength.max(INITIAL_STRENGTH);
                    true
                }
                Phase::Transfer => true,
                Phase::Amplify => {
                    state.memories[position].echo_count += 1;
                    state.total_echoes += 1;
                    stats.echoes += 1;
                    false
                }
            };

            if !advance {
                continue;
            }
            let Some(next) = phase.next() else {
                continue;
            };

            let memory = &mut state.memories[position];
            memory.phase = next;
            match next {
                Phase::Consensus => {
                    memory.consensus_baseline = Some(memory.strength);
                    memory.consensus_validations = 0;
                }
                Phase::Amplify => {
                    memory.echo_count += 1;
                    state.total_echoes += 1;
                    stats.echoes += 1;
                }
                Phase::Transfer => state.transferred_total += 1,
                _ => {}
            }

            state.phase_transitions += 1;
            *stats.advanced.entry(next).or_insert(0) += 1;
            metrics::CYCLE_TRANSITIONS
                .with_label_values(&[next.label()])
                .inc();
        }

        let threshold = self.config.generation_threshold;
        while state.transferred_total - state.snapshot_mark >= threshold {
            state.snapshot_mark += threshold;
            let generation = self.create_generation_snapshot(state);
            stats.generations_created.push(generation);
        }

        debug!(
            cycle = stats.cycle,
            advanced = stats.total_advanced(),
            echoes = stats.echoes,
            "Cycle complete"
        );
        stats
    }

    fn create_generation_snapshot(&self, state: &mut LoopState) -> u64 {
        let generation = state.current_generation;
        let snapshot = GenerationSnapshot {
            generation,
            created_at: Utc::now(),
            total_memories: state.memories.len(),
            avg_strength: state.avg_strength(),
            top_tags: state.top_tags(self.config.top_tags),
            memories_by_phase: state.memories_by_phase(),
        };
        state.generations.push(snapshot);
        state.current_generation += 1;

        metrics::GENERATIONS_TOTAL.inc();
        info!(
            generation,
            memories = state.memories.len(),
            "Generation snapshot created"
        );
        generation
    }

    /// Look up memories by identity, tags (any match) or phase.
    ///
    /// Results are in insertion order. Zero matches is an empty vec.
    pub fn recall(&self, request: &RecallRequest) -> Result<Vec<Memory>> {
        request.validate()?;
        let state = self.state.read();
        let limit = request.limit.unwrap_or(usize::MAX);

        if let Some(identity) = &request.identity {
            return Ok(state
                .by_identity
                .get(identity)
                .map(|&p| vec![state.memories[p].clone()])
                .unwrap_or_default());
        }

        if let Some(tags) = &request.tags {
            let mut positions: Vec<usize> = tags
                .iter()
                .filter_map(|t| state.by_tag.get(t))
                .flatten()
                .copied()
                .collect();
            positions.sort_unstable();
            positions.dedup();
            return Ok(positions
                .into_iter()
                .take(limit)
                .map(|p| state.memories[p].clone())
                .collect());
        }

        Ok(state
            .memories
            .iter()
            .filter(|m| request.phase.map_or(true, |p| m.phase == p))
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn get(&self, identity: &Identity) -> Option<Memory> {
        let state = self.state.read();
        state
            .by_identity
            .get(identity)
            .map(|&p| state.memories[p].clone())
    }

    /// All generation snapshots, or just the one numbered `generation`
    /// (empty when there is no such generation)
    pub fn get_generational_wisdom(&self, generation: Option<u64>) -> Vec<GenerationSnapshot> {
        let state = self.state.read();
        match generation {
            None => state.generations.clone(),
            Some(g) => state
                .generations
                .iter()
                .filter(|s| s.generation == g)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> LoopStats {
        let state = self.state.read();
        LoopStats {
            total_memories: state.memories.len(),
            total_echoes: state.total_echoes,
            total_generations: state.generations.len(),
            herd_validations: state.herd_validations,
            phase_transitions: state.phase_transitions,
            loop_count: state.loop_count,
            pages: TOTAL_PAGES,
            avg_strength: state.avg_strength(),
            memories_by_phase: state.memories_by_phase(),
            top_tags: state.top_tags(self.config.top_tags),
            current_generation: state.current_generation,
        }
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    pub fn snapshot(&self) -> LoopSnapshot {
        Self::snapshot_of(&self.state.read())
    }

    /// Snapshot the loop and run `alongside` while the loop is still read
    /// locked, so an ingest cannot land between the two captures.
    ///
    /// `ingest` locks the loop before the mirror store, and so does this.
    pub(crate) fn snapshot_with<R>(&self, alongside: impl FnOnce() -> R) -> (LoopSnapshot, R) {
        let state = self.state.read();
        let other = alongside();
        (Self::snapshot_of(&state), other)
    }

    fn snapshot_of(state: &LoopState) -> LoopSnapshot {
        LoopSnapshot {
            metadata: LoopSnapshotMetadata {
                exported_at: Utc::now(),
                version: SNAPSHOT_FORMAT_VERSION.to_string(),
                phases: Phase::ALL.len(),
                pages: TOTAL_PAGES,
                memory_count: state.memories.len(),
            },
            counters: state.counters(),
            memories: state.memories.clone(),
            generations: state.generations.clone(),
        }
    }

    pub(crate) fn prepare_restore(&self, snapshot: LoopSnapshot) -> Result<PreparedLoop> {
        if snapshot.metadata.version != SNAPSHOT_FORMAT_VERSION {
            return Err(HypercubeError::Format(format!(
                "unsupported memory snapshot version '{}' (expected {})",
                snapshot.metadata.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        if snapshot.metadata.phases != Phase::ALL.len() {
            return Err(HypercubeError::Format(format!(
                "snapshot has {} phases (expected {})",
                snapshot.metadata.phases,
                Phase::ALL.len()
            )));
        }

        let state = LoopState::from_parts(snapshot.memories, snapshot.generations, snapshot.counters)?;
        Ok(PreparedLoop { state })
    }

    pub(crate) fn commit_restore(&self, prepared: PreparedLoop) {
        self.commit_restore_with(prepared, || {});
    }

    /// Swap in a prepared state, running `alongside` under the same write lock
    pub(crate) fn commit_restore_with(&self, prepared: PreparedLoop, alongside: impl FnOnce()) {
        let mut state = self.state.write();
        alongside();
        *state = prepared.state;
        info!(
            memories = state.memories.len(),
            generations = state.generations.len(),
            "Memory loop restored"
        );
    }

    /// Replace the whole state with a snapshot; all-or-nothing
    pub fn restore(&self, snapshot: LoopSnapshot) -> Result<()> {
        let prepared = self.prepare_restore(snapshot)?;
        self.commit_restore(prepared);
        Ok(())
    }

    pub fn export<W: Write>(&self, sink: W) -> Result<()> {
        serde_json::to_writer_pretty(sink, &self.snapshot())?;
        Ok(())
    }

    pub fn import<R: Read>(&self, source: R) -> Result<()> {
        let snapshot: LoopSnapshot = serde_json::from_reader(source)
            .map_err(|e| HypercubeError::Format(format!("invalid memory snapshot: {e}")))?;
        self.restore(snapshot)
    }
}

impl Default for MemoryLoop {
    fn default() -> Self {
        Self {
            config: LoopConfig::default(),
            state: RwLock::new(LoopState::default()),
            store: None,
        }
    }
}
