//! Documented constants for the hypercube
//!
//! This module contains all tunable parameters with justification for their values.
//! Centralizing constants prevents magic numbers and makes tuning easier.

// =============================================================================
// ATTRIBUTE STORE CONSTANTS
// =============================================================================

/// Number of named attribute slots on every record
///
/// Four categories of ten slots each: business, technical, temporal, quality.
/// The slot list itself lives in [`crate::store::types::Dimension`].
pub const DIMENSION_COUNT: usize = 40;

/// Slots per category
pub const SLOTS_PER_CATEGORY: usize = 10;

/// Default redistribution rate applied to a stored record's `value` (15%)
///
/// Every store call that carries a numeric value moves `value * rate` into the
/// CARE pool. The rate is fixed for the lifetime of a ledger instance.
pub const DEFAULT_CARE_RATE: f64 = 0.15;

/// Soft latency budget for a single query, in milliseconds
///
/// Queries are never aborted when they exceed this. A query that does is
/// logged at warn level so the breach shows up in operations logs.
pub const DEFAULT_QUERY_SLA_MS: u64 = 9_000;

/// Reserved payload key carrying the ledger amount
///
/// Not a slot. Accepted alongside slot names in string-keyed input.
pub const VALUE_FIELD: &str = "value";

// =============================================================================
// STAGED MEMORY ENGINE CONSTANTS
// =============================================================================

/// Strength assigned to every new memory; strength never drops below it
pub const INITIAL_STRENGTH: f64 = 1.0;

/// Minimum strength for INTAKE → SORT promotion
///
/// Memories with any echoes are promoted regardless of strength.
pub const SORT_MIN_STRENGTH: f64 = 0.5;

/// Validations a memory needs before leaving SORT and CONSENSUS
pub const HERD_VALIDATIONS_REQUIRED: u32 = 2;

/// Strength gained per validation while in CONSENSUS
///
/// Only the first [`CONSENSUS_BONUS_VALIDATIONS`] validations in the phase earn
/// the bonus, so consensus can add at most +0.2 over a memory's lifetime.
pub const CONSENSUS_STRENGTH_BONUS: f64 = 0.1;

/// Number of CONSENSUS validations that earn [`CONSENSUS_STRENGTH_BONUS`]
pub const CONSENSUS_BONUS_VALIDATIONS: u32 = 2;

/// Maximum associations computed for a memory during ENCODE
pub const DEFAULT_MAX_ASSOCIATIONS: usize = 5;

/// Memories that must enter TRANSFER between two generation snapshots
pub const DEFAULT_GENERATION_THRESHOLD: u64 = 10;

/// Tags reported in snapshots and engine stats
pub const DEFAULT_TOP_TAGS: usize = 10;

/// Pages in the memory loop
///
/// Each phase owns a contiguous page range (eight pages per phase, six for
/// AMPLIFY). Memories always sit on the first page of their phase; the page
/// number is reported for compatibility with exported loop layouts.
pub const TOTAL_PAGES: u32 = 46;

/// Pages owned by each non-terminal phase
pub const PAGES_PER_PHASE: u32 = 8;

// =============================================================================
// SNAPSHOT CONSTANTS
// =============================================================================

/// Version written into every snapshot envelope and required on import
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0.0";

/// Default number of archived snapshots to keep when purging
pub const DEFAULT_ARCHIVE_KEEP: usize = 7;

/// Default cadence for the external cycle driver, in seconds
///
/// The core never schedules itself; only the CLI `run` loop reads this.
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 9;
