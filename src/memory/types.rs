//! Type definitions for the staged memory loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_GENERATION_THRESHOLD, DEFAULT_MAX_ASSOCIATIONS, DEFAULT_TOP_TAGS, INITIAL_STRENGTH,
    PAGES_PER_PHASE,
};
use crate::errors::{HypercubeError, Result, ValidationErrorExt};
use crate::identity::Identity;
use crate::validation;

/// Processing stage of a memory. Ordered; memories only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Intake,
    Sort,
    Consensus,
    Encode,
    Transfer,
    Amplify,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Intake,
        Phase::Sort,
        Phase::Consensus,
        Phase::Encode,
        Phase::Transfer,
        Phase::Amplify,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Phase::Intake => "INTAKE",
            Phase::Sort => "SORT",
            Phase::Consensus => "CONSENSUS",
            Phase::Encode => "ENCODE",
            Phase::Transfer => "TRANSFER",
            Phase::Amplify => "AMPLIFY",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Following phase; `None` for the terminal phase
    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }

    /// First loop page owned by this phase (1-based)
    pub fn first_page(self) -> u32 {
        self.index() as u32 * PAGES_PER_PHASE + 1
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Phase {
    type Err = HypercubeError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Phase::ALL
            .into_iter()
            .find(|p| p.label() == upper)
            .ok_or_else(|| {
                HypercubeError::validation(
                    "phase",
                    format!(
                        "unknown phase '{s}' (expected INTAKE, SORT, CONSENSUS, ENCODE, TRANSFER or AMPLIFY)"
                    ),
                )
            })
    }
}

/// One memory held by the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub identity: Identity,
    pub content: Value,
    pub created_at: DateTime<Utc>,

    /// Never decreases; never below [`INITIAL_STRENGTH`]
    pub strength: f64,
    pub phase: Phase,

    /// Engine generation current when the memory was ingested
    pub generation: u64,
    pub herd_validations: u32,
    pub echo_count: u64,

    /// Fixed at ingestion, in first-seen order
    pub tags: Vec<String>,

    /// Filled once, during ENCODE
    #[serde(default)]
    pub associations: Vec<Identity>,

    /// Strength recorded when the memory entered CONSENSUS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_baseline: Option<f64>,

    /// Validations received while in CONSENSUS
    #[serde(default)]
    pub consensus_validations: u32,
}

impl Memory {
    pub(crate) fn new(
        identity: Identity,
        content: Value,
        tags: Vec<String>,
        generation: u64,
    ) -> Self {
        Self {
            identity,
            content,
            created_at: Utc::now(),
            strength: INITIAL_STRENGTH,
            phase: Phase::Intake,
            generation,
            herd_validations: 0,
            echo_count: 0,
            tags,
            associations: Vec::new(),
            consensus_baseline: None,
            consensus_validations: 0,
        }
    }

    pub fn page(&self) -> u32 {
        self.phase.first_page()
    }
}

/// Immutable aggregate taken when enough memories have passed through TRANSFER
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub total_memories: usize,
    pub avg_strength: f64,
    /// (tag, memory count), most frequent first
    pub top_tags: Vec<(String, usize)>,
    pub memories_by_phase: BTreeMap<Phase, usize>,
}

/// Outcome of one `run_cycle` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Lifetime cycle number of this pass (1-based)
    pub cycle: u64,
    /// Memories that entered each phase during this cycle
    pub advanced: BTreeMap<Phase, usize>,
    /// Echo increments applied to memories in AMPLIFY
    pub echoes: usize,
    /// Generation numbers of snapshots taken at the end of this cycle
    pub generations_created: Vec<u64>,
}

impl CycleStats {
    pub fn advanced_into(&self, phase: Phase) -> usize {
        self.advanced.get(&phase).copied().unwrap_or(0)
    }

    pub fn total_advanced(&self) -> usize {
        self.advanced.values().sum()
    }
}

/// Recall filter. At most one of `identity`, `tags` and `phase` may be set;
/// none means "all memories".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RecallRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Default::default()
        }
    }

    pub fn by_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn by_phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let filters = [
            self.identity.is_some(),
            self.tags.is_some(),
            self.phase.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        if filters > 1 {
            return Err(HypercubeError::validation(
                "recall",
                "supply at most one of identity, tags or phase",
            ));
        }
        if let Some(limit) = self.limit {
            validation::validate_limit(limit).map_validation_err("limit")?;
        }
        Ok(())
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStats {
    pub total_memories: usize,
    pub total_echoes: u64,
    pub total_generations: usize,
    pub herd_validations: u64,
    pub phase_transitions: u64,
    pub loop_count: u64,
    pub pages: u32,
    pub avg_strength: f64,
    pub memories_by_phase: BTreeMap<Phase, usize>,
    pub top_tags: Vec<(String, usize)>,
    pub current_generation: u64,
}

/// Configuration for the memory loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// TRANSFER entries between generation snapshots
    pub generation_threshold: u64,

    /// Associations computed per memory during ENCODE
    pub max_associations: usize,

    /// Tags reported in snapshots and stats
    pub top_tags: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            generation_threshold: DEFAULT_GENERATION_THRESHOLD,
            max_associations: DEFAULT_MAX_ASSOCIATIONS,
            top_tags: DEFAULT_TOP_TAGS,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.generation_threshold == 0 {
            return Err(HypercubeError::validation(
                "generation_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
