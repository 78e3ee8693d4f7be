//! DST - Deterministic Simulation Testing
//!
//! Seeded randomness, simulated time and fault injection for the in-memory
//! engines.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use pushvault_core::dst::{FaultConfig, FaultInjector, FaultType, SimConfig};
//! use pushvault_core::storage::kv::MemoryKvEngine;
//!
//! let config = SimConfig::with_seed(42);
//! let faults = FaultInjector::builder(config.rng())
//!     .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 0.1))
//!     .build();
//! let engine = MemoryKvEngine::new().with_faults(Arc::new(faults));
//! # let _ = engine;
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod clock;
mod config;
mod fault;
mod rng;

pub use clock::SimClock;
pub use config::SimConfig;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use rng::DeterministicRng;
