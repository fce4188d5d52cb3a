//! Runtime configuration for a [`crate::Tree`].
//!
//! Grounded in `convex-portfolio`'s `AnalyticsConfig`: a plain data
//! struct with a `Default` impl and fluent `with_*` setters, rather than
//! a file-backed config loader (this engine takes no environment
//! variables or config files of its own — the driver owns that layer).

use serde::{Deserialize, Serialize};

/// Tunables for the tree's accounting that spec.md leaves as fixed
/// constants but which a long-running harness benefits from being able
/// to override (e.g. a faster paper-trade seed capital for small unit
/// tests).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Seed capital funded into a non-root strategy's paper twin at
    /// `setup` (spec §4.2, `setup`: "fixed seed capital (1,000,000)").
    pub paper_seed_capital: f64,

    /// Epsilon below which a rounded share quantity is treated as zero
    /// (guards against `q` landing on e.g. `-0.0` or a tiny float
    /// residue from the floor/ceil rounding in `allocate`).
    pub rounding_epsilon: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paper_seed_capital: 1_000_000.0,
            rounding_epsilon: 1e-9,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the paper-twin seed capital.
    #[must_use]
    pub fn with_paper_seed_capital(mut self, capital: f64) -> Self {
        self.paper_seed_capital = capital;
        self
    }

    /// Sets the rounding epsilon used to treat a near-zero share
    /// quantity as exactly zero.
    #[must_use]
    pub fn with_rounding_epsilon(mut self, epsilon: f64) -> Self {
        self.rounding_epsilon = epsilon;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.paper_seed_capital, 1_000_000.0);
        assert_eq!(cfg.rounding_epsilon, 1e-9);
    }

    #[test]
    fn test_builder_pattern() {
        let cfg = EngineConfig::new()
            .with_paper_seed_capital(500.0)
            .with_rounding_epsilon(1e-6);
        assert_eq!(cfg.paper_seed_capital, 500.0);
        assert_eq!(cfg.rounding_epsilon, 1e-6);
    }

    #[test]
    fn test_serde() {
        let cfg = EngineConfig::new().with_paper_seed_capital(42.0);
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cfg);
    }
}
