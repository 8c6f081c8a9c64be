//! # plancalc-formula
//!
//! Formula language of the plancalc planning engine.
//!
//! This crate provides:
//! - Statement and expression parsing (text → AST), restricted to a whitelist
//! - Sub-formula expansion with cycle detection, constants and `REF` substitution
//! - Evaluation against a [`plancalc_core::FactStore`] in exact decimal arithmetic
//!
//! ## Example
//!
//! ```rust
//! use plancalc_core::{DimensionRegistry, MemoryFactStore, Scope};
//! use plancalc_formula::{
//!     evaluate_scalar, parse_expression, Catalog, EvaluationContext, Expander, LoopBindings,
//! };
//! use rust_decimal::Decimal;
//!
//! let catalog = Catalog::new().with_constant("GROWTH", Decimal::new(11, 1));
//! let registry = DimensionRegistry::new();
//! let store = MemoryFactStore::new();
//!
//! let expr = parse_expression("1000 * GROWTH").unwrap();
//! let expr = Expander::new(&catalog, &registry).expand(&expr).unwrap();
//!
//! let bindings = LoopBindings::new();
//! let ctx = EvaluationContext::new(&store, &registry, Scope::unscoped(), &bindings);
//! assert_eq!(evaluate_scalar(&expr, &ctx, 4).unwrap().to_string(), "1100.0000");
//! ```

pub mod ast;
pub mod catalog;
pub mod error;
pub mod evaluator;
pub mod expansion;
pub mod functions;
pub mod parser;
pub mod reference;

pub use ast::{
    BinaryOperator, CellReference, DimFilter, DimValue, FormulaExpr, FormulaStatement,
    ReferenceCall, UnaryOperator,
};
pub use catalog::{Catalog, ReferenceData, UnitConversions};
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{
    evaluate, evaluate_scalar, resolve_cell_ref, resolve_dim_value, resolve_filters, round_result,
    EvaluationContext, FormulaValue, LoopBindings,
};
pub use expansion::{
    check_sub_formulas, loop_dimensions_used, Expander, SubFormulaGraph,
    DEFAULT_MAX_EXPANSION_DEPTH,
};
pub use parser::{parse_expression, parse_statement};
pub use reference::{has_references, ReferenceResolver};
