//! Reference data substitution
//!
//! `REF('name', dim=value, ...)` reads an aggregate from a named reference data
//! source. It is substituted per loop combination, before evaluation, so the
//! evaluator only ever sees the resulting literal.

use plancalc_core::{Dimension, DimensionRegistry, FactFilter, FactStore, Scope};
use rust_decimal::Decimal;

use crate::ast::{FormulaExpr, ReferenceCall};
use crate::catalog::Catalog;
use crate::error::FormulaResult;
use crate::evaluator::{resolve_filters, LoopBindings};

/// Resolves `REF` nodes against the catalog's reference data sources
pub struct ReferenceResolver<'a> {
    store: &'a dyn FactStore,
    registry: &'a DimensionRegistry,
    catalog: &'a Catalog,
    version: Option<&'a str>,
    year: Option<&'a str>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        store: &'a dyn FactStore,
        registry: &'a DimensionRegistry,
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            version: None,
            year: None,
        }
    }

    /// Version to read instead of each source's own
    pub fn with_version(mut self, version: Option<&'a str>) -> Self {
        self.version = version;
        self
    }

    /// Year to read instead of each source's own
    pub fn with_year(mut self, year: Option<&'a str>) -> Self {
        self.year = year;
        self
    }

    /// Current value of one `REF` call
    pub fn value(&self, call: &ReferenceCall, bindings: &LoopBindings) -> FormulaResult<Decimal> {
        let data = self.catalog.reference(&call.name)?;
        let key_figure = self
            .registry
            .resolve_literal(&Dimension::KeyFigure, &data.key_figure)?;

        let mut filter = FactFilter::new();
        for (name, value) in &data.filter {
            let dimension = self.registry.dimension(name)?;
            let id = self.registry.resolve_literal(&dimension, value)?;
            filter.insert(dimension, id);
        }
        if let Some(version) = self.version.or(data.version.as_deref()) {
            filter.insert(
                Dimension::Version,
                self.registry.resolve_literal(&Dimension::Version, version)?,
            );
        }
        if let Some(year) = self.year.or(data.year.as_deref()) {
            filter.insert(
                Dimension::Year,
                self.registry.resolve_literal(&Dimension::Year, year)?,
            );
        }

        // Call-site filters narrow the source's own
        let overlay = resolve_filters(&call.filters, self.registry, bindings)?;
        let filter = filter.merged(&overlay);

        let value = self
            .store
            .aggregate(data.kind, key_figure, &filter, &Scope::unscoped())?;
        tracing::trace!(reference = %call.name, %value, "resolved reference data");
        Ok(value)
    }

    /// Replace every `REF` node with its current value
    pub fn substitute(
        &self,
        expr: &FormulaExpr,
        bindings: &LoopBindings,
    ) -> FormulaResult<FormulaExpr> {
        match expr {
            FormulaExpr::Reference(call) => Ok(FormulaExpr::Number(self.value(call, bindings)?)),
            FormulaExpr::BinaryOp { op, left, right } => Ok(FormulaExpr::BinaryOp {
                op: *op,
                left: Box::new(self.substitute(left, bindings)?),
                right: Box::new(self.substitute(right, bindings)?),
            }),
            FormulaExpr::UnaryOp { op, operand } => Ok(FormulaExpr::UnaryOp {
                op: *op,
                operand: Box::new(self.substitute(operand, bindings)?),
            }),
            FormulaExpr::Function { name, args } => Ok(FormulaExpr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| self.substitute(arg, bindings))
                    .collect::<FormulaResult<_>>()?,
            }),
            other => Ok(other.clone()),
        }
    }
}

/// Whether an expression contains `REF` nodes
pub fn has_references(expr: &FormulaExpr) -> bool {
    let mut found = false;
    expr.walk(&mut |node| {
        if matches!(node, FormulaExpr::Reference(_)) {
            found = true;
        }
    });
    found
}
