//! Sub-formula expansion and compile-time resolution
//!
//! Expansion runs once per formula, before any combination is evaluated:
//! `$NAME` nodes are replaced by the parsed body of the named sub-formula,
//! constants become literals, and literal dimension values are resolved to ids
//! so unknown codes fail before anything is written.

use std::collections::{BTreeMap, BTreeSet};

use plancalc_core::{Dimension, DimensionRegistry};

use crate::ast::{CellReference, DimFilter, DimValue, FormulaExpr, FormulaStatement, ReferenceCall};
use crate::catalog::Catalog;
use crate::error::{FormulaError, FormulaResult};
use crate::parser::parse_expression;

/// Default limit on nested sub-formulas
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 32;

/// Expands macros in formula ASTs against a catalog
pub struct Expander<'a> {
    catalog: &'a Catalog,
    registry: &'a DimensionRegistry,
    max_depth: usize,
}

impl<'a> Expander<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a DimensionRegistry) -> Self {
        Self {
            catalog,
            registry,
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
        }
    }

    /// Limit sub-formula nesting
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand the expression of a statement and resolve its target
    pub fn expand_statement(&self, statement: &FormulaStatement) -> FormulaResult<FormulaStatement> {
        if let Some(kind) = statement.target.aggregate {
            return Err(FormulaError::InvalidTarget(format!(
                "cannot assign to a {} aggregate",
                kind
            )));
        }
        Ok(FormulaStatement {
            target: self.resolve_cell_ref(&statement.target)?,
            expr: self.expand(&statement.expr)?,
        })
    }

    /// Expand sub-formulas and constants, resolving literal dimension values
    ///
    /// `REF` nodes are kept (with resolved filters); they depend on the loop
    /// combination and are substituted per combination.
    pub fn expand(&self, expr: &FormulaExpr) -> FormulaResult<FormulaExpr> {
        let mut stack = Vec::new();
        self.expand_inner(expr, &mut stack)
    }

    fn expand_inner(&self, expr: &FormulaExpr, stack: &mut Vec<String>) -> FormulaResult<FormulaExpr> {
        match expr {
            FormulaExpr::SubFormula(name) => {
                if let Some(pos) = stack.iter().position(|s| s == name) {
                    let mut chain = stack[pos..].to_vec();
                    chain.push(name.clone());
                    return Err(FormulaError::CyclicExpansion { chain });
                }
                if stack.len() >= self.max_depth {
                    let mut chain = stack.clone();
                    chain.push(name.clone());
                    return Err(FormulaError::ExpansionTooDeep {
                        limit: self.max_depth,
                        chain,
                    });
                }

                let body = parse_sub_formula(name, self.catalog.sub_formula(name)?)?;
                tracing::trace!(sub_formula = %name, depth = stack.len(), "expanding");

                stack.push(name.clone());
                let expanded = self.expand_inner(&body, stack)?;
                stack.pop();
                Ok(expanded)
            }

            FormulaExpr::Constant(name) => Ok(FormulaExpr::Number(self.catalog.constant(name)?)),

            FormulaExpr::CellRef(reference) => {
                Ok(FormulaExpr::CellRef(self.resolve_cell_ref(reference)?))
            }

            FormulaExpr::Reference(call) => {
                self.catalog.reference(&call.name)?;
                Ok(FormulaExpr::Reference(ReferenceCall {
                    name: call.name.clone(),
                    filters: self.resolve_filters(&call.filters)?,
                }))
            }

            FormulaExpr::BinaryOp { op, left, right } => Ok(FormulaExpr::BinaryOp {
                op: *op,
                left: Box::new(self.expand_inner(left, stack)?),
                right: Box::new(self.expand_inner(right, stack)?),
            }),

            FormulaExpr::UnaryOp { op, operand } => Ok(FormulaExpr::UnaryOp {
                op: *op,
                operand: Box::new(self.expand_inner(operand, stack)?),
            }),

            FormulaExpr::Function { name, args } => Ok(FormulaExpr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| self.expand_inner(arg, stack))
                    .collect::<FormulaResult<_>>()?,
            }),

            FormulaExpr::Number(_) => Ok(expr.clone()),
        }
    }

    /// Resolve literal codes of a cell reference to ids
    pub fn resolve_cell_ref(&self, reference: &CellReference) -> FormulaResult<CellReference> {
        let key_figure = match &reference.key_figure {
            DimValue::Code(code) => {
                DimValue::Id(self.registry.resolve_literal(&Dimension::KeyFigure, code)?)
            }
            DimValue::Loop => {
                return Err(FormulaError::UnsupportedExpression(
                    "$LOOP as key figure".into(),
                ))
            }
            id => id.clone(),
        };

        Ok(CellReference {
            aggregate: reference.aggregate,
            filters: self.resolve_filters(&reference.filters)?,
            key_figure,
            optional: reference.optional,
        })
    }

    fn resolve_filters(&self, filters: &[DimFilter]) -> FormulaResult<Vec<DimFilter>> {
        filters
            .iter()
            .map(|filter| -> FormulaResult<DimFilter> {
                let repository = self.registry.repository(&filter.dimension)?;
                let value = match &filter.value {
                    DimValue::Code(text) => DimValue::Id(repository.resolve_literal(text)?),
                    other => other.clone(),
                };
                Ok(DimFilter::new(filter.dimension.clone(), value))
            })
            .collect()
    }
}

fn parse_sub_formula(name: &str, body: &str) -> FormulaResult<FormulaExpr> {
    parse_expression(body).map_err(|err| match err {
        FormulaError::Parse { offset, message } => FormulaError::Parse {
            offset,
            message: format!("in sub-formula ${}: {}", name, message),
        },
        other => other,
    })
}

/// Names of the sub-formulas an expression refers to directly, sorted
pub fn sub_formula_names(expr: &FormulaExpr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    expr.walk(&mut |node| {
        if let FormulaExpr::SubFormula(name) = node {
            names.insert(name.clone());
        }
    });
    names
}

/// Dimensions an expression binds with `$LOOP`
pub fn loop_dimensions_used(expr: &FormulaExpr) -> BTreeSet<Dimension> {
    let mut used = BTreeSet::new();
    let mut collect = |filters: &[DimFilter]| {
        for filter in filters {
            if filter.value == DimValue::Loop {
                used.insert(filter.dimension.clone());
            }
        }
    };
    expr.walk(&mut |node| match node {
        FormulaExpr::CellRef(reference) => collect(&reference.filters),
        FormulaExpr::Reference(call) => collect(&call.filters),
        _ => {}
    });
    used
}

/// Which sub-formulas use which, for validating a whole catalog up front
#[derive(Debug, Default)]
pub struct SubFormulaGraph {
    /// Sub-formula -> sub-formulas its body uses
    uses: BTreeMap<String, BTreeSet<String>>,
}

impl SubFormulaGraph {
    fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every sub-formula body in a catalog
    pub fn from_catalog(catalog: &Catalog) -> FormulaResult<Self> {
        let mut graph = Self::new();
        for (name, body) in &catalog.sub_formulas {
            graph.uses.entry(name.clone()).or_default();
            for used in sub_formula_names(&parse_sub_formula(name, body)?) {
                graph.add_use(name, &used);
            }
        }
        Ok(graph)
    }

    fn add_use(&mut self, user: &str, used: &str) {
        self.uses
            .entry(user.to_string())
            .or_default()
            .insert(used.to_string());
    }

    /// Sub-formulas used directly by `name`
    pub fn uses(&self, name: &str) -> impl Iterator<Item = &str> + '_ {
        self.uses
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// First cycle found, as a chain that starts and ends with the same name
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();

        for name in self.uses.keys() {
            if let Some(chain) = self.detect_cycle(name, &mut visited, &mut path) {
                return Some(chain);
            }
        }
        None
    }

    fn detect_cycle<'g>(
        &'g self,
        name: &'g str,
        visited: &mut BTreeSet<&'g str>,
        path: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| *p == name) {
            let mut chain: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            chain.push(name.to_string());
            return Some(chain);
        }
        if visited.contains(name) {
            return None;
        }

        path.push(name);
        for used in self.uses(name) {
            if let Some(chain) = self.detect_cycle(used, visited, path) {
                return Some(chain);
            }
        }
        path.pop();
        visited.insert(name);
        None
    }
}

/// Validate every sub-formula body of a catalog without expanding a formula
///
/// Bodies must parse, may only use sub-formulas the catalog defines, and must
/// not use each other in a cycle.
pub fn check_sub_formulas(catalog: &Catalog) -> FormulaResult<()> {
    let graph = SubFormulaGraph::from_catalog(catalog)?;
    for (user, used) in &graph.uses {
        if let Some(missing) = used.iter().find(|name| !graph.uses.contains_key(*name)) {
            tracing::debug!(sub_formula = %user, missing = %missing, "sub-formula uses an undefined name");
            return Err(FormulaError::UnknownSubFormula(missing.clone()));
        }
    }
    match graph.find_cycle() {
        Some(chain) => Err(FormulaError::CyclicExpansion { chain }),
        None => Ok(()),
    }
}
