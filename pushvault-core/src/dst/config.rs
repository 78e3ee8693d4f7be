//! SimConfig - Simulation Seed
//!
//! TigerStyle: every run has a seed, and the seed is logged.

use super::rng::DeterministicRng;

/// Environment variable overriding the simulation seed.
pub const DST_SEED_ENV: &str = "DST_SEED";

/// Configuration for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    seed: u64,
}

impl SimConfig {
    /// Create a config with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Use `DST_SEED` if set, otherwise a fresh random seed.
    ///
    /// The chosen seed is logged so a failing run can be replayed.
    #[must_use]
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var(DST_SEED_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or_else(rand::random);
        tracing::info!(seed, "DST seed (replay with {DST_SEED_ENV}={seed})");
        Self { seed }
    }

    /// The seed for this run.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Build the deterministic RNG for this run.
    #[must_use]
    pub fn rng(&self) -> DeterministicRng {
        DeterministicRng::new(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_seed() {
        let config = SimConfig::with_seed(42);
        assert_eq!(config.seed(), 42);
        assert_eq!(config.rng().seed(), 42);
    }
}
