//! Formula runs: the FOREACH loop driver
//!
//! A [`Formula`] is parsed and expanded once, then evaluated once per
//! combination of its loop dimensions. Combinations are the Cartesian product of
//! each loop dimension's master list (sorted by code) in declared order, so two
//! runs over the same data produce the same entries in the same order.
//!
//! # Example
//!
//! ```rust
//! use plancalc::prelude::*;
//! use rust_decimal_macros::dec;
//!
//! let mut registry = DimensionRegistry::new();
//! registry.add_value(&Dimension::Version, DimensionValue::new(1, "PLAN", "Plan")).unwrap();
//! registry.add_value(&Dimension::Year, DimensionValue::new(2025, "2025", "2025")).unwrap();
//! registry.add_value(&Dimension::Period, DimensionValue::new(1, "P01", "January")).unwrap();
//! registry.add_value(&Dimension::OrgUnit, DimensionValue::new(1, "A", "Unit A")).unwrap();
//! registry.add_value(&Dimension::KeyFigure, DimensionValue::new(1, "REVENUE", "Revenue")).unwrap();
//! registry.add_value(&Dimension::KeyFigure, DimensionValue::new(2, "COST", "Cost")).unwrap();
//!
//! let catalog = Catalog::new().with_constant("GROWTH_RATE", dec!(0.10));
//! let mut engine = Engine::new(MemoryFactStore::new(), MemoryLedger::new(), registry)
//!     .with_catalog(catalog);
//!
//! let session = engine.create_session("Plan 2025", "PLAN", "2025", None).unwrap();
//! let cell = engine.cell(session.id, "REVENUE", [("Period", "P01"), ("OrgUnit", "A")]).unwrap();
//! engine.load_fact(cell, FactValues::amount(dec!(1000.00))).unwrap();
//!
//! let formula = Formula::new(
//!     "cost",
//!     "[OrgUnit=$LOOP]?.[COST] = [OrgUnit=$LOOP]?.[REVENUE] * (1 + GROWTH_RATE)",
//! )
//! .looping(["OrgUnit"]);
//! let request = RunRequest::new(session.id).with_period("P01");
//!
//! let report = engine.run_formula(&formula, &request).unwrap();
//! assert_eq!(report.entries[0].key_name, "COST[OrgUnit=A]");
//! assert_eq!(report.entries[0].new_value.to_string(), "1100.0000");
//! ```

use std::borrow::Cow;

use plancalc_core::{
    BatchId, DimId, Dimension, DimensionRegistry, FactKey, FactStore, FactValues, Run, RunEntry,
    RunId, RunLedger, RunSource, Scope, Session, SessionId, UnitOfWork,
};
use plancalc_formula::{
    evaluate_scalar, has_references, loop_dimensions_used, parse_statement, resolve_dim_value,
    Catalog, CellReference, DimFilter, DimValue, EvaluationContext, Expander, FormulaError,
    FormulaStatement, LoopBindings, ReferenceResolver,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::naming::key_name;

/// A named assignment evaluated once per loop combination
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Formula {
    pub name: String,
    /// `[target] = expression`
    pub expression: String,
    /// Dimensions iterated, outermost first
    #[cfg_attr(feature = "serde", serde(default))]
    pub loop_dimensions: Vec<String>,
    /// Version `REF` sources read, overriding each source's own
    #[cfg_attr(feature = "serde", serde(default))]
    pub reference_version: Option<String>,
    /// Year `REF` sources read, overriding each source's own
    #[cfg_attr(feature = "serde", serde(default))]
    pub reference_year: Option<String>,
}

impl Formula {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            loop_dimensions: Vec::new(),
            reference_version: None,
            reference_year: None,
        }
    }

    /// Declare the loop dimensions, outermost first
    pub fn looping<I, D>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.loop_dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reference_version(mut self, version: impl Into<String>) -> Self {
        self.reference_version = Some(version.into());
        self
    }

    pub fn with_reference_year(mut self, year: impl Into<String>) -> Self {
        self.reference_year = Some(year.into());
        self
    }
}

/// Where and how a formula runs
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunRequest {
    pub session: SessionId,
    /// Period code reads and writes default to
    #[cfg_attr(feature = "serde", serde(default))]
    pub period: Option<String>,
    /// Record entries without writing facts
    #[cfg_attr(feature = "serde", serde(default))]
    pub preview: bool,
}

impl RunRequest {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            period: None,
            preview: false,
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }
}

/// Result of a formula run: the ledger header and its entries in order
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunReport {
    pub run: Run,
    pub entries: Vec<RunEntry>,
}

impl RunReport {
    /// Number of cells the run touched
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A formula parsed, expanded and checked against the registry
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    pub name: String,
    pub statement: FormulaStatement,
    pub loop_dimensions: Vec<Dimension>,
    has_references: bool,
}

impl CompiledFormula {
    /// Whether the expression reads reference data
    pub fn has_references(&self) -> bool {
        self.has_references
    }
}

/// Everything one run needs besides the engine's own state
struct RunPlan<'a> {
    compiled: &'a CompiledFormula,
    formula: &'a Formula,
    catalog: &'a Catalog,
    session: &'a Session,
    scope: Scope,
    combinations: &'a [LoopBindings],
    run: RunId,
    preview: bool,
}

impl<S: FactStore, L: RunLedger> Engine<S, L> {
    /// Parse and expand a formula without running it
    pub fn compile(&self, formula: &Formula) -> Result<CompiledFormula> {
        let statement = parse_statement(&formula.expression)?;
        let statement = Expander::new(&self.catalog, &self.registry)
            .with_max_depth(self.options.max_expansion_depth)
            .expand_statement(&statement)?;

        let mut loop_dimensions: Vec<Dimension> = Vec::new();
        for name in &formula.loop_dimensions {
            let dimension = self
                .registry
                .dimension(name)
                .map_err(FormulaError::from)?;
            if loop_dimensions.contains(&dimension) {
                return Err(Error::invalid_request(format!(
                    "loop dimension {} declared twice",
                    dimension
                )));
            }
            loop_dimensions.push(dimension);
        }

        let mut used = loop_dimensions_used(&statement.expr);
        used.extend(
            statement
                .target
                .filters
                .iter()
                .filter(|f| f.value == DimValue::Loop)
                .map(|f| f.dimension.clone()),
        );
        if let Some(unbound) = used.iter().find(|d| !loop_dimensions.contains(d)) {
            return Err(FormulaError::UnboundLoopDimension(unbound.name().to_string()).into());
        }

        let has_references = has_references(&statement.expr);
        Ok(CompiledFormula {
            name: formula.name.clone(),
            statement,
            loop_dimensions,
            has_references,
        })
    }

    /// Run a formula over every loop combination inside one unit of work
    ///
    /// Any failure rolls back the writes and discards the ledger run. In preview
    /// mode entries are recorded but nothing is written.
    pub fn run_formula(&mut self, formula: &Formula, request: &RunRequest) -> Result<RunReport> {
        self.options.validate()?;
        let compiled = self.compile(formula)?;
        let catalog = self.catalog.clone();
        let session = self.store.session(request.session)?;
        let period = request
            .period
            .as_deref()
            .map(|code| self.resolve(&Dimension::Period, code))
            .transpose()?;
        let combinations = combinations(&self.registry, &compiled.loop_dimensions)?;

        info!(
            formula = %formula.name,
            session = %session.id,
            combinations = combinations.len(),
            preview = request.preview,
            "running formula"
        );

        let run = self
            .ledger
            .begin_run(RunSource::Formula(formula.name.clone()), request.preview)?;
        let plan = RunPlan {
            compiled: &compiled,
            formula,
            catalog: &catalog,
            session: &session,
            scope: Scope::session(session.id).with_period(period),
            combinations: &combinations,
            run,
            preview: request.preview,
        };

        if let Err(e) = self.execute(&plan) {
            warn!(formula = %formula.name, error = %e, "formula run failed");
            if let Err(discard) = self.ledger.discard_run(run) {
                warn!(run = %run, error = %discard, "could not discard failed run");
            }
            return Err(e);
        }

        let header = self
            .ledger
            .run(run)
            .ok_or_else(|| plancalc_core::Error::other(format!("run {} vanished", run)))?;
        let entries = self.ledger.entries(run);
        info!(formula = %formula.name, run = %run, entries = entries.len(), "formula run complete");
        Ok(RunReport {
            run: header,
            entries,
        })
    }

    fn execute(&mut self, plan: &RunPlan<'_>) -> Result<()> {
        let mut unit = UnitOfWork::begin(&mut self.store)?;
        let batch = unit.ensure_batch(plan.session.id)?.id;
        let statement = &plan.compiled.statement;

        // Every combination reads the state as of the start of the run; writes
        // are applied only once all of them have evaluated.
        let mut results = Vec::with_capacity(plan.combinations.len());
        {
            let reader: &dyn FactStore = &*unit;
            for bindings in plan.combinations {
                let (key, name) = target_key(
                    &self.registry,
                    &statement.target,
                    plan.session,
                    plan.scope.period,
                    batch,
                    bindings,
                )?;

                let expr = if plan.compiled.has_references {
                    let resolver = ReferenceResolver::new(reader, &self.registry, plan.catalog)
                        .with_version(plan.formula.reference_version.as_deref())
                        .with_year(plan.formula.reference_year.as_deref());
                    Cow::Owned(resolver.substitute(&statement.expr, bindings)?)
                } else {
                    Cow::Borrowed(&statement.expr)
                };
                let ctx = EvaluationContext::new(reader, &self.registry, plan.scope, bindings);
                let value = evaluate_scalar(&expr, &ctx, self.options.scale)?;

                let old = reader
                    .current_fact(&key.cell)?
                    .map(|fact| fact.value)
                    .unwrap_or(Decimal::ZERO);
                debug!(key = %name, %old, new = %value, "evaluated combination");
                results.push((key, name, old, value));
            }
        }

        for (key, name, old, value) in results {
            self.ledger
                .record_entry(plan.run, key.clone(), name, old, value)?;
            if !plan.preview {
                let (fact, _) = unit.upsert(key, FactValues::amount(value))?;
                fact.value = value;
            }
        }

        if plan.preview {
            unit.rollback()?;
        } else {
            unit.commit()?;
        }
        Ok(())
    }
}

/// Every loop combination, first dimension outermost
///
/// No loop dimensions yields exactly one empty combination; a dimension with an
/// empty master list yields none.
pub fn combinations(
    registry: &DimensionRegistry,
    dimensions: &[Dimension],
) -> Result<Vec<LoopBindings>> {
    let mut result = vec![LoopBindings::new()];
    for dimension in dimensions {
        let values = registry.list_all(dimension).map_err(FormulaError::from)?;
        result = result
            .into_iter()
            .flat_map(|bindings| {
                values.iter().map(move |value| {
                    let mut bindings = bindings.clone();
                    bindings.bind(dimension.clone(), *value);
                    bindings
                })
            })
            .collect();
    }
    Ok(result)
}

/// Full key of the cell a combination writes, with its ledger name
fn target_key(
    registry: &DimensionRegistry,
    target: &CellReference,
    session: &Session,
    scope_period: Option<DimId>,
    batch: BatchId,
    bindings: &LoopBindings,
) -> Result<(FactKey, String)> {
    let key_figure = resolve_dim_value(
        &DimFilter::new(Dimension::KeyFigure, target.key_figure.clone()),
        registry,
        bindings,
    )?;
    let mut pairs: Vec<(Dimension, DimId)> = Vec::with_capacity(target.filters.len());
    for filter in &target.filters {
        pairs.push((
            filter.dimension.clone(),
            resolve_dim_value(filter, registry, bindings)?,
        ));
    }

    let lookup = |wanted: &Dimension| {
        pairs
            .iter()
            .find(|(dimension, _)| dimension == wanted)
            .map(|(_, id)| *id)
    };
    let name = key_name(registry, key_figure, pairs.iter().map(|(d, id)| (d, *id)));

    let period = lookup(&Dimension::Period).or(scope_period).ok_or_else(|| {
        FormulaError::InvalidTarget(format!(
            "{}: no Period in the target or the run request",
            name
        ))
    })?;
    let org_unit = lookup(&Dimension::OrgUnit)
        .or(session.org_unit)
        .ok_or_else(|| {
            FormulaError::InvalidTarget(format!(
                "{}: no OrgUnit in the target and the session has no default",
                name
            ))
        })?;

    let mut cell = plancalc_core::CellKey {
        session: session.id,
        version: session.version,
        year: session.year,
        period,
        org_unit,
        service: None,
        account: None,
        key_figure,
        extra: Default::default(),
    };
    for (dimension, id) in &pairs {
        match dimension {
            Dimension::Version if *id != session.version => {
                return Err(FormulaError::InvalidTarget(format!(
                    "{}: target version differs from the session's",
                    name
                ))
                .into())
            }
            Dimension::Year if *id != session.year => {
                return Err(FormulaError::InvalidTarget(format!(
                    "{}: target year differs from the session's",
                    name
                ))
                .into())
            }
            Dimension::KeyFigure => {
                return Err(FormulaError::InvalidTarget(format!(
                    "{}: key figure belongs after the filters",
                    name
                ))
                .into())
            }
            _ => cell.set(dimension, *id),
        }
    }

    Ok((cell.in_batch(batch), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancalc_core::{DimensionValue, MemoryFactStore, MemoryLedger};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn registry() -> DimensionRegistry {
        let mut registry = DimensionRegistry::new();
        let values = [
            (Dimension::Version, 1, "PLAN"),
            (Dimension::Year, 2025, "2025"),
            (Dimension::Period, 1, "P01"),
            (Dimension::Period, 2, "P02"),
            (Dimension::OrgUnit, 1, "B"),
            (Dimension::OrgUnit, 2, "A"),
            (Dimension::KeyFigure, 1, "REVENUE"),
            (Dimension::KeyFigure, 2, "COST"),
        ];
        for (dimension, id, code) in values {
            registry
                .add_value(&dimension, DimensionValue::new(id, code, code))
                .unwrap();
        }
        registry
    }

    fn engine() -> (Engine<MemoryFactStore, MemoryLedger>, SessionId) {
        let mut engine = Engine::new(MemoryFactStore::new(), MemoryLedger::new(), registry());
        let session = engine.create_session("plan", "PLAN", "2025", None).unwrap();
        for (org_unit, value) in [("A", dec!(100)), ("B", dec!(200))] {
            let cell = engine
                .cell(session.id, "REVENUE", [("Period", "P01"), ("OrgUnit", org_unit)])
                .unwrap();
            engine.load_fact(cell, FactValues::amount(value)).unwrap();
        }
        (engine, session.id)
    }

    #[test]
    fn test_combinations_follow_code_order() {
        let registry = registry();
        let combos = combinations(&registry, &[Dimension::Period, Dimension::OrgUnit]).unwrap();
        let flat: Vec<(u32, u32)> = combos
            .iter()
            .map(|b| {
                (
                    b.get(&Dimension::Period).unwrap().0,
                    b.get(&Dimension::OrgUnit).unwrap().0,
                )
            })
            .collect();
        // OrgUnit "A" has id 2 and sorts first
        assert_eq!(flat, vec![(1, 2), (1, 1), (2, 2), (2, 1)]);
    }

    #[test]
    fn test_no_loop_dimensions_is_one_combination() {
        assert_eq!(combinations(&registry(), &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_run_writes_each_combination() {
        let (mut engine, session) = engine();
        let formula = Formula::new("double", "[OrgUnit=$LOOP].[COST] = [OrgUnit=$LOOP].[REVENUE] * 2")
            .looping(["OrgUnit"]);
        let report = engine
            .run_formula(&formula, &RunRequest::new(session).with_period("P01"))
            .unwrap();

        let names: Vec<&str> = report.entries.iter().map(|e| e.key_name.as_str()).collect();
        assert_eq!(names, vec!["COST[OrgUnit=A]", "COST[OrgUnit=B]"]);
        assert_eq!(report.entries[1].new_value, dec!(400.0000));
        assert_eq!(engine.store().len(), 4);
    }

    #[test]
    fn test_unbound_loop_dimension() {
        let (engine, _) = engine();
        let formula = Formula::new("bad", "[OrgUnit=$LOOP].[COST] = 1");
        assert!(matches!(
            engine.compile(&formula),
            Err(Error::Formula(FormulaError::UnboundLoopDimension(_)))
        ));
    }

    #[test]
    fn test_duplicate_loop_dimension() {
        let (engine, _) = engine();
        let formula = Formula::new("bad", "[OrgUnit=$LOOP].[COST] = 1").looping(["OrgUnit", "OrgUnit"]);
        assert!(matches!(engine.compile(&formula), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_missing_period_is_invalid_target() {
        let (mut engine, session) = engine();
        let formula = Formula::new("p", "[OrgUnit=A].[COST] = 1");
        let err = engine
            .run_formula(&formula, &RunRequest::new(session))
            .unwrap_err();
        assert!(matches!(err, Error::Formula(FormulaError::InvalidTarget(_))));
        // The failed run leaves nothing in the ledger
        assert!(engine.ledger().is_empty());
        assert_eq!(engine.store().len(), 2);
    }

    #[test]
    fn test_period_from_target_filter() {
        let (mut engine, session) = engine();
        let formula = Formula::new("p", "[OrgUnit=A,Period=P02].[COST] = 5");
        let report = engine
            .run_formula(&formula, &RunRequest::new(session))
            .unwrap();
        assert_eq!(report.entries[0].key_name, "COST[OrgUnit=A,Period=P02]");
        assert_eq!(report.entries[0].key.cell.period, DimId(2));
    }

    #[test]
    fn test_second_run_records_old_value() {
        let (mut engine, session) = engine();
        let formula = Formula::new("c", "[OrgUnit=A].[COST] = 7");
        let request = RunRequest::new(session).with_period("P01");
        engine.run_formula(&formula, &request).unwrap();
        let report = engine.run_formula(&formula, &request).unwrap();
        assert_eq!(report.entries[0].old_value, dec!(7.0000));
    }
}
