//! Prelude module - common imports for plancalc users
//!
//! ```rust
//! use plancalc::prelude::*;
//! ```

pub use crate::{
    // Formula catalog
    Catalog,
    // Data model
    CellKey,
    DimId,
    Dimension,
    DimensionRegistry,
    DimensionValue,
    // Engine
    Engine,
    EngineOptions,
    // Error types
    Error,
    FactStore,
    FactValues,
    Formula,
    FormulaError,
    FunctionOutcome,
    // Stores
    MemoryFactStore,
    MemoryLedger,
    PlanningFunction,
    ReferenceData,
    Result,
    RunLedger,
    RunReport,
    RunRequest,
    Scope,
    SessionId,
};
