#![cfg_attr(feature = "nightly", feature(core_intrinsics))]

//! Memory-efficient hash map and set built on a bitmap-compressed sparse
//! bucket array with quadratic (triangular) probing.

/// Table configuration
pub mod config;
/// Crate error types
pub mod error;
/// Map variant
pub mod map;
/// Growth policies
pub mod policy;
/// Set variant
pub mod set;
/// Snapshot persistence hooks
#[cfg(feature = "snapshot")]
pub mod snapshot;

/// Set of compiler hints
mod hint;
/// Probing and tombstone engine
mod raw;
/// Two-level sparse bucket storage
mod sparse;

pub use crate::config::TableConfig;
pub use crate::error::{Result, SparseTableError};
pub use crate::map::SparseMap;
#[cfg(feature = "snapshot")]
pub use crate::policy::PersistPolicy;
pub use crate::policy::{FactorGrowthPolicy, GrowthPolicy, PowerOfTwoPolicy, PrimeGrowthPolicy};
pub use crate::set::SparseSet;
#[cfg(feature = "snapshot")]
pub use crate::snapshot::Persist;

// Set FxHash to default as most keys tend to be small
pub type DefaultHashBuilder = fxhash::FxBuildHasher;
