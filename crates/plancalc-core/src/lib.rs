//! # plancalc-core
//!
//! Core data structures for the plancalc planning engine.
//!
//! This crate provides the fundamental types used throughout plancalc:
//! - [`Dimension`], [`DimensionRegistry`] - Dimension kinds and their master lists
//! - [`Fact`], [`FactKey`], [`CellKey`] - Numeric cells and their composite keys
//! - [`FactStore`], [`UnitOfWork`] - The storage contract and its transaction guard
//! - [`MemoryFactStore`] - The in-memory reference store
//! - [`RunLedger`], [`MemoryLedger`] - The audit trail of runs
//!
//! ## Example
//!
//! ```rust
//! use plancalc_core::{
//!     AggregateKind, CellKey, DimId, ExtraDims, FactFilter, FactStore, FactValues,
//!     MemoryFactStore, Scope,
//! };
//! use rust_decimal::Decimal;
//!
//! let mut store = MemoryFactStore::new();
//! let session = store.create_session("Plan 2025", DimId(1), DimId(2025), None).unwrap();
//! let batch = store.ensure_batch(session.id).unwrap();
//!
//! let cell = CellKey {
//!     session: session.id,
//!     version: DimId(1),
//!     year: DimId(2025),
//!     period: DimId(1),
//!     org_unit: DimId(1),
//!     service: None,
//!     account: None,
//!     key_figure: DimId(10),
//!     extra: ExtraDims::new(),
//! };
//! store.put(cell.in_batch(batch.id), FactValues::amount(Decimal::new(1000, 0))).unwrap();
//!
//! let total = store
//!     .aggregate(AggregateKind::Sum, DimId(10), &FactFilter::new(), &Scope::session(session.id))
//!     .unwrap();
//! assert_eq!(total, Decimal::new(1000, 0));
//! ```

pub mod dimension;
pub mod error;
pub mod fact;
pub mod filter;
pub mod ledger;
pub mod memory;
pub mod store;

// Re-exports for convenience
pub use dimension::{DimId, Dimension, DimensionRegistry, DimensionRepository, DimensionValue};
pub use error::{Error, Result};
pub use fact::{
    ActionType, Batch, BatchId, CellKey, ExtraDims, Fact, FactId, FactKey, FactValues, Session,
    SessionId,
};
pub use filter::{AggregateKind, FactFilter, Scope};
pub use ledger::{MemoryLedger, Run, RunEntry, RunId, RunLedger, RunSource};
pub use memory::MemoryFactStore;
pub use store::{aggregate_values, FactStore, UnitOfWork};

/// Default number of decimal places formula results are rounded to
pub const DEFAULT_SCALE: u32 = 4;

/// Number of decimal places amounts are displayed with
pub const DISPLAY_SCALE: u32 = 2;
