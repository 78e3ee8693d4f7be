//! FaultInjector - Simulated Store Failures
//!
//! TigerStyle: faults are either probabilistic (seeded) or scheduled for an
//! exact operation, so every failure is reproducible.

use std::collections::HashMap;
use std::sync::Mutex;

use super::rng::DeterministicRng;

/// Class of store operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    /// Point reads and queries.
    StorageReadFail,
    /// Puts, upserts and updates.
    StorageWriteFail,
    /// Deletes.
    StorageDeleteFail,
    /// Calls that never complete (exercises call timeouts).
    StorageStall,
}

/// A probabilistic fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Operation class affected.
    pub fault_type: FaultType,
    /// Probability in `[0.0, 1.0]` that a matching operation fails.
    pub probability: f64,
}

impl FaultConfig {
    /// Create a fault config.
    ///
    /// # Panics
    /// Panics if probability is outside `[0.0, 1.0]`.
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "fault probability {probability} must be in [0, 1]"
        );
        Self {
            fault_type,
            probability,
        }
    }
}

#[derive(Debug)]
struct InjectorState {
    rng: DeterministicRng,
    /// Operations seen so far, per fault type.
    seen: HashMap<FaultType, u64>,
    /// Scheduled one-shot faults: fail when `seen` reaches the value.
    scheduled: Vec<(FaultType, u64)>,
    injected_count: u64,
}

/// Decides whether a given store operation fails.
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultConfig>,
    state: Mutex<InjectorState>,
}

impl FaultInjector {
    /// Start building an injector.
    #[must_use]
    pub fn builder(rng: DeterministicRng) -> FaultInjectorBuilder {
        FaultInjectorBuilder {
            rng,
            faults: Vec::new(),
            scheduled: Vec::new(),
        }
    }

    /// Record one operation of `fault_type` and decide whether it fails.
    pub fn should_inject(&self, fault_type: FaultType) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let seen = {
            let counter = state.seen.entry(fault_type).or_insert(0);
            *counter += 1;
            *counter
        };

        let scheduled_hit = match state
            .scheduled
            .iter()
            .position(|&(kind, nth)| kind == fault_type && nth == seen)
        {
            Some(index) => {
                state.scheduled.swap_remove(index);
                true
            }
            None => false,
        };

        let mut inject = scheduled_hit;
        for fault in self.faults.iter().filter(|f| f.fault_type == fault_type) {
            if state.rng.next_bool(fault.probability) {
                inject = true;
            }
        }

        if inject {
            state.injected_count += 1;
            tracing::debug!(?fault_type, operation = seen, "injecting storage fault");
        }
        inject
    }

    /// Total faults injected so far.
    #[must_use]
    pub fn injected_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .injected_count
    }
}

/// Builder for [`FaultInjector`].
#[derive(Debug)]
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
    scheduled: Vec<(FaultType, u64)>,
}

impl FaultInjectorBuilder {
    /// Add a probabilistic fault.
    #[must_use]
    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.faults.push(fault);
        self
    }

    /// Fail exactly the `nth` (1-based) operation of `fault_type`.
    ///
    /// # Panics
    /// Panics if `nth` is zero.
    #[must_use]
    pub fn fail_nth(mut self, fault_type: FaultType, nth: u64) -> Self {
        assert!(nth > 0, "nth is 1-based");
        self.scheduled.push((fault_type, nth));
        self
    }

    /// Build the injector.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        FaultInjector {
            faults: self.faults,
            state: Mutex::new(InjectorState {
                rng: self.rng,
                seen: HashMap::new(),
                scheduled: self.scheduled,
                injected_count: 0,
            }),
        }
    }
}
