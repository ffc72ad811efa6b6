//! Synthetic brand records covering all 40 slots
//!
//! Used by the CLI `populate` command and the benchmarks. Seeded generation is
//! fully deterministic.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::store::{Attributes, Dimension, StoreRequest};

const SECTORS: &[&str] = &[
    "quantum_ai", "blockchain", "fintech", "healthtech", "cleantech", "edtech", "agritech",
    "biotech", "nanotech", "spacetech", "robotics", "cybersecurity", "cloud_computing", "iot",
    "5g_networks",
];

const MARKETS: &[&str] = &[
    "enterprise", "consumer", "government", "education", "healthcare", "finance", "energy",
    "manufacturing", "retail", "logistics",
];

const REGIONS: &[&str] = &[
    "north_america", "europe", "asia_pacific", "latin_america", "middle_east", "africa",
    "oceania", "global",
];

const TECH_STACKS: &[&str] = &[
    "CUDA-Q", "TensorFlow", "PyTorch", "Kubernetes", "Docker", "React", "Vue", "Angular",
    "Node.js", "Python", "Rust", "Go", "Java", "C++", "Solidity",
];

const PRODUCT_TYPES: &[&str] = &[
    "platform", "saas", "api", "sdk", "framework", "tool", "service", "infrastructure",
    "application", "protocol",
];

const NAME_PREFIXES: &[&str] = &["Quantum", "Neural", "Cyber", "Smart", "Cloud", "Data", "AI", "Crypto"];
const NAME_SUFFIXES: &[&str] = &["Labs", "Tech", "Systems", "Solutions", "Network", "Hub", "Core", "Dynamics"];

/// Brand sources and their share of a generated batch
pub const SOURCES: [(&str, u32); 3] = [("FAA", 7_344), ("HSOMNI", 6_219), ("Seedwave", 150)];

/// Deterministic (when seeded) generator of brand store requests
pub struct BrandGenerator {
    rng: StdRng,
}

impl BrandGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    fn pick(&mut self, pool: &[&'static str]) -> &'static str {
        pool.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn score(&mut self, low: f64) -> f64 {
        (self.rng.gen_range(low..=1.0) * 100.0).round() / 100.0
    }

    /// Source of the `index`-th record in a batch, following [`SOURCES`] proportions
    pub fn source_for(index: usize) -> &'static str {
        let total: u32 = SOURCES.iter().map(|(_, n)| n).sum();
        let slot = (index as u32) % total;
        let mut boundary = 0;
        for (name, count) in SOURCES {
            boundary += count;
            if slot < boundary {
                return name;
            }
        }
        SOURCES[0].0
    }

    /// One brand record with every slot filled and a ledger value
    pub fn brand(&mut self, index: usize) -> StoreRequest {
        let source = Self::source_for(index);
        let name = format!(
            "{source}-{}{}-{index:04}",
            self.pick(NAME_PREFIXES),
            self.pick(NAME_SUFFIXES)
        );

        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
            + Duration::days(self.rng.gen_range(0..=365));
        let epoch = base
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .unwrap_or_default();

        let version = format!(
            "{}.{}.{}",
            self.rng.gen_range(1..=10),
            self.rng.gen_range(0..=20),
            self.rng.gen_range(0..=50)
        );

        let attributes = Attributes::new()
            // Business
            .with(Dimension::Sector, self.pick(SECTORS))
            .with(Dimension::Brand, name)
            .with(Dimension::ProductType, self.pick(PRODUCT_TYPES))
            .with(Dimension::Market, self.pick(MARKETS))
            .with(Dimension::Region, self.pick(REGIONS))
            .with(Dimension::CustomerSegment, self.pick(&["b2b", "b2c", "b2g", "b2b2c"]))
            .with(
                Dimension::RevenueTier,
                self.pick(&["seed", "series_a", "series_b", "growth", "unicorn"]),
            )
            .with(
                Dimension::GrowthStage,
                self.pick(&["startup", "scaleup", "mature", "established"]),
            )
            .with(
                Dimension::Partnership,
                self.pick(&["nvidia", "microsoft", "google", "aws", "independent"]),
            )
            .with(
                Dimension::ComplianceZone,
                self.pick(&["gdpr", "ccpa", "hipaa", "sox", "pci_dss", "global"]),
            )
            // Technical
            .with(Dimension::TechStack, self.pick(TECH_STACKS))
            .with(Dimension::Version, version)
            .with(
                Dimension::DeploymentEnv,
                self.pick(&["cloud", "hybrid", "on_prem", "edge", "multi_cloud"]),
            )
            .with(
                Dimension::LatencyTier,
                self.pick(&["realtime", "near_realtime", "batch", "streaming"]),
            )
            .with(
                Dimension::StorageType,
                self.pick(&["sql", "nosql", "graph", "timeseries", "hybrid"]),
            )
            .with(
                Dimension::ApiProtocol,
                self.pick(&["rest", "graphql", "grpc", "websocket", "mqtt"]),
            )
            .with(
                Dimension::SecurityLevel,
                self.pick(&["9atm", "enterprise", "government", "military"]),
            )
            .with(
                Dimension::IntegrationType,
                self.pick(&["native", "api", "webhook", "plugin", "embedded"]),
            )
            .with(
                Dimension::ComputeTier,
                self.pick(&["serverless", "container", "vm", "bare_metal", "quantum"]),
            )
            .with(
                Dimension::NetworkZone,
                self.pick(&["public", "private", "hybrid", "isolated", "global"]),
            )
            // Temporal
            .with(Dimension::Year, base.year() as i64)
            .with(Dimension::Quarter, ((base.month() - 1) / 3 + 1) as i64)
            .with(Dimension::Month, base.month() as i64)
            .with(Dimension::Week, base.iso_week().week() as i64)
            .with(Dimension::Day, base.day() as i64)
            .with(Dimension::Hour, self.rng.gen_range(0..=23i64))
            .with(Dimension::BreathCycle, self.rng.gen_range(0..=8i64))
            .with(Dimension::Epoch, epoch)
            .with(
                Dimension::Milestone,
                self.pick(&["launch", "beta", "ga", "v2", "scale", "exit"]),
            )
            .with(Dimension::Phase, self.pick(&["q1", "q2", "q3", "q4"]))
            // Quality
            .with(Dimension::QualityScore, self.score(0.7))
            .with(Dimension::Completeness, self.score(0.8))
            .with(Dimension::Verified, self.rng.gen_bool(0.75))
            .with(Dimension::Confidence, self.score(0.6))
            .with(Dimension::Relevance, self.score(0.5))
            .with(Dimension::Freshness, self.score(0.7))
            .with(Dimension::Authority, self.score(0.6))
            .with(Dimension::Coverage, self.score(0.5))
            .with(Dimension::Accessibility, self.score(0.8))
            .with(Dimension::Consistency, self.score(0.7));

        let value = (self.rng.gen_range(1_000.0..=100_000.0f64) * 100.0).round() / 100.0;

        StoreRequest::new(attributes)
            .with_value(value)
            .with_payload(json!({"source": source, "source_index": index}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DIMENSION_COUNT;

    #[test]
    fn test_brand_fills_every_slot() {
        let mut generator = BrandGenerator::new(Some(7));
        let request = generator.brand(1);
        assert_eq!(request.attributes.len(), DIMENSION_COUNT);
        assert!(request.value.unwrap() >= 1_000.0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = BrandGenerator::new(Some(42)).brand(3);
        let b = BrandGenerator::new(Some(42)).brand(3);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_source_proportions() {
        assert_eq!(BrandGenerator::source_for(0), "FAA");
        assert_eq!(BrandGenerator::source_for(7_344), "HSOMNI");
        assert_eq!(BrandGenerator::source_for(13_600), "Seedwave");
    }
}
