//! # plancalc
//!
//! A planning and budgeting calculation engine.
//!
//! Plancalc evaluates planning formulas over a store of numeric facts keyed by
//! dimensions (org unit, period, version, year, key figure, ...) and runs bulk
//! planning functions on those facts. Every run is atomic and audited.
//!
//! ## Features
//!
//! - FOREACH formula runs over the Cartesian product of loop dimensions
//! - Sub-formulas, constants and reference data (`REF`) substituted before evaluation
//! - Exact decimal arithmetic with a configurable result scale
//! - Planning functions: Copy, Distribute, Convert, Repost, ResetSlice
//! - A run ledger recording old and new value of every touched cell
//! - Preview runs that audit without writing
//!
//! ## Example
//!
//! ```rust
//! use plancalc::prelude::*;
//! use rust_decimal_macros::dec;
//!
//! let mut registry = DimensionRegistry::new();
//! registry.add_value(&Dimension::Version, DimensionValue::new(1, "PLAN", "Plan")).unwrap();
//! registry.add_value(&Dimension::Year, DimensionValue::new(2025, "2025", "2025")).unwrap();
//! registry.add_value(&Dimension::Period, DimensionValue::new(1, "P01", "January")).unwrap();
//! for (id, code) in [(1, "A"), (2, "B"), (3, "C")] {
//!     registry.add_value(&Dimension::OrgUnit, DimensionValue::new(id, code, code)).unwrap();
//! }
//! registry.add_value(&Dimension::KeyFigure, DimensionValue::new(1, "COST", "Cost")).unwrap();
//! registry.add_value(&Dimension::KeyFigure, DimensionValue::new(2, "TOTAL", "Total")).unwrap();
//!
//! let mut engine = Engine::new(MemoryFactStore::new(), MemoryLedger::new(), registry);
//! let session = engine.create_session("Plan 2025", "PLAN", "2025", Some("A")).unwrap();
//! for (org_unit, value) in [("A", dec!(10)), ("B", dec!(20)), ("C", dec!(30))] {
//!     let cell = engine.cell(session.id, "COST", [("Period", "P01"), ("OrgUnit", org_unit)]).unwrap();
//!     engine.load_fact(cell, FactValues::amount(value)).unwrap();
//! }
//!
//! let formula = Formula::new("total", "[TOTAL] = SUM:COST");
//! let report = engine
//!     .run_formula(&formula, &RunRequest::new(session.id).with_period("P01"))
//!     .unwrap();
//! assert_eq!(report.entries[0].new_value, dec!(60));
//! ```

pub mod calculation;
pub mod engine;
pub mod error;
pub mod functions;
pub mod naming;
pub mod options;
pub mod prelude;

pub use calculation::{combinations, CompiledFormula, Formula, RunReport, RunRequest};
pub use engine::Engine;
pub use error::{Error, Result};
pub use functions::{FunctionOutcome, PlanningFunction, RowError};
pub use naming::{cell_name, key_name};
pub use options::EngineOptions;

// Re-export the data model
pub use plancalc_core::{
    ActionType, AggregateKind, Batch, BatchId, CellKey, DimId, Dimension, DimensionRegistry,
    DimensionValue, ExtraDims, Fact, FactFilter, FactId, FactKey, FactStore, FactValues,
    MemoryFactStore, MemoryLedger, Run, RunEntry, RunId, RunLedger, RunSource, Scope, Session,
    SessionId, UnitOfWork, DEFAULT_SCALE, DISPLAY_SCALE,
};

// Re-export the formula layer
pub use plancalc_formula::{Catalog, FormulaError, ReferenceData, UnitConversions};

/// Errors raised by the fact store and dimension registry
pub use plancalc_core::Error as StoreError;
