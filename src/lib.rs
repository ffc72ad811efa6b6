//! Hypercube Library
//!
//! In-process 40-slot attribute store with a staged memory loop.
//!
//! # Key Features
//! - Content-addressed records tagged with up to 40 named slots
//! - Equality indexes plus range scans, intersected per query
//! - CARE ledger applied on every valued store
//! - Six-phase memory loop with generation snapshots
//! - Versioned, checksummed JSON snapshots of the whole state

pub mod backup;
pub mod config;
pub mod constants;
pub mod errors;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod populate;
pub mod store;
pub mod tracing_setup;
pub mod validation;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use serde_json;

pub use errors::{HypercubeError, Result};
pub use identity::{identity_of, Identity};
pub use memory::{MemoryLoop, Phase, RecallRequest};
pub use store::{AttributeQuery, AttributeStore, Attributes, Dimension, StoreRequest};
