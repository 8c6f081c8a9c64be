//! Formula evaluator
//!
//! Evaluates expanded formula ASTs against a fact store. Only literals,
//! operators, whitelisted functions and cell references are evaluable; macro
//! nodes must have been expanded first.

use std::collections::BTreeMap;
use std::fmt;

use plancalc_core::{DimId, Dimension, DimensionRegistry, FactFilter, FactStore, Scope};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

use crate::ast::{BinaryOperator, CellReference, DimFilter, DimValue, FormulaExpr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{function_registry, FunctionKind};

/// Value types during formula evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaValue {
    Number(Decimal),
    Boolean(bool),
}

impl FormulaValue {
    /// Number for arithmetic; booleans are a type mismatch
    pub fn to_number(&self) -> FormulaResult<Decimal> {
        match self {
            FormulaValue::Number(n) => Ok(*n),
            FormulaValue::Boolean(b) => Err(FormulaError::evaluation(format!(
                "type mismatch: expected a number, got boolean {}",
                b
            ))),
        }
    }

    /// Condition value: zero is false, every other number true
    pub fn is_truthy(&self) -> bool {
        match self {
            FormulaValue::Number(n) => !n.is_zero(),
            FormulaValue::Boolean(b) => *b,
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaValue::Number(n) => write!(f, "{}", n),
            FormulaValue::Boolean(true) => f.write_str("TRUE"),
            FormulaValue::Boolean(false) => f.write_str("FALSE"),
        }
    }
}

impl From<Decimal> for FormulaValue {
    fn from(value: Decimal) -> Self {
        FormulaValue::Number(value)
    }
}

/// Values of the loop dimensions for the current combination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopBindings(BTreeMap<Dimension, DimId>);

impl LoopBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a loop dimension
    pub fn bind(&mut self, dimension: Dimension, value: DimId) {
        self.0.insert(dimension, value);
    }

    pub fn get(&self, dimension: &Dimension) -> Option<DimId> {
        self.0.get(dimension).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dimension, DimId)> {
        self.0.iter().map(|(d, v)| (d, *v))
    }
}

impl FromIterator<(Dimension, DimId)> for LoopBindings {
    fn from_iter<T: IntoIterator<Item = (Dimension, DimId)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Context for formula evaluation
pub struct EvaluationContext<'a> {
    /// Facts cell references read from
    pub store: &'a dyn FactStore,
    /// Master lists literal codes resolve against
    pub registry: &'a DimensionRegistry,
    /// Session and period reads are limited to
    pub scope: Scope,
    /// Current loop combination
    pub bindings: &'a LoopBindings,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        store: &'a dyn FactStore,
        registry: &'a DimensionRegistry,
        scope: Scope,
        bindings: &'a LoopBindings,
    ) -> Self {
        Self {
            store,
            registry,
            scope,
            bindings,
        }
    }
}

/// Evaluate an expanded formula expression
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match expr {
        FormulaExpr::Number(n) => Ok(FormulaValue::Number(*n)),

        FormulaExpr::CellRef(reference) => evaluate_cell_ref(reference, ctx),

        FormulaExpr::BinaryOp { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            evaluate_binary_op(*op, left, right)
        }

        FormulaExpr::UnaryOp { op, operand } => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOperator::Negate => Ok(FormulaValue::Number(-value.to_number()?)),
            }
        }

        FormulaExpr::Function { name, args } => evaluate_function(name, args, ctx),

        FormulaExpr::SubFormula(name) => Err(FormulaError::UnsupportedExpression(format!(
            "unexpanded sub-formula ${}",
            name
        ))),
        FormulaExpr::Constant(name) => Err(FormulaError::UnsupportedExpression(format!(
            "unsubstituted constant {}",
            name
        ))),
        FormulaExpr::Reference(call) => Err(FormulaError::UnsupportedExpression(format!(
            "unsubstituted REF('{}')",
            call.name
        ))),
    }
}

/// Evaluate to a number rounded to `scale` decimal places
///
/// Rounding is banker's rounding; the result always carries exactly `scale`
/// decimals, so `1100` at scale 4 is `1100.0000`.
pub fn evaluate_scalar(
    expr: &FormulaExpr,
    ctx: &EvaluationContext,
    scale: u32,
) -> FormulaResult<Decimal> {
    match evaluate(expr, ctx)? {
        FormulaValue::Number(n) => Ok(round_result(n, scale)),
        FormulaValue::Boolean(b) => Err(FormulaError::evaluation(format!(
            "formula result must be a number, got boolean {}",
            b
        ))),
    }
}

/// Round to `scale` decimals and fix the scale for display
pub fn round_result(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp(scale);
    rounded.rescale(scale);
    rounded
}

/// Resolve one filter value to a dimension id
pub fn resolve_dim_value(
    filter: &DimFilter,
    registry: &DimensionRegistry,
    bindings: &LoopBindings,
) -> FormulaResult<DimId> {
    match &filter.value {
        DimValue::Id(id) => Ok(*id),
        DimValue::Code(text) => Ok(registry.resolve_literal(&filter.dimension, text)?),
        DimValue::Loop => bindings
            .get(&filter.dimension)
            .ok_or_else(|| FormulaError::UnboundLoopDimension(filter.dimension.name().to_string())),
    }
}

/// Resolve a list of filters into a fact filter
pub fn resolve_filters(
    filters: &[DimFilter],
    registry: &DimensionRegistry,
    bindings: &LoopBindings,
) -> FormulaResult<FactFilter> {
    filters
        .iter()
        .map(|f| -> FormulaResult<(Dimension, DimId)> {
            Ok((f.dimension.clone(), resolve_dim_value(f, registry, bindings)?))
        })
        .collect()
}

/// Resolve a cell reference into its key figure and dimension filter
pub fn resolve_cell_ref(
    reference: &CellReference,
    registry: &DimensionRegistry,
    bindings: &LoopBindings,
) -> FormulaResult<(DimId, FactFilter)> {
    let key_figure = resolve_dim_value(
        &DimFilter::new(Dimension::KeyFigure, reference.key_figure.clone()),
        registry,
        bindings,
    )?;
    let filter = resolve_filters(&reference.filters, registry, bindings)?;
    Ok((key_figure, filter))
}

fn evaluate_cell_ref(
    reference: &CellReference,
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let (key_figure, filter) = resolve_cell_ref(reference, ctx.registry, ctx.bindings)?;
    let value = match reference.aggregate {
        Some(kind) => ctx.store.aggregate(kind, key_figure, &filter, &ctx.scope)?,
        None => ctx.store.get(key_figure, &filter, &ctx.scope)?,
    };
    Ok(FormulaValue::Number(value))
}

fn evaluate_binary_op(
    op: BinaryOperator,
    left: FormulaValue,
    right: FormulaValue,
) -> FormulaResult<FormulaValue> {
    if op.is_comparison() {
        return compare(op, left, right).map(FormulaValue::Boolean);
    }

    let l = left.to_number()?;
    let r = right.to_number()?;
    let overflow = || {
        FormulaError::evaluation(format!(
            "arithmetic overflow in {} {} {}",
            l,
            op.symbol(),
            r
        ))
    };

    let result = match op {
        BinaryOperator::Add => l.checked_add(r).ok_or_else(overflow)?,
        BinaryOperator::Subtract => l.checked_sub(r).ok_or_else(overflow)?,
        BinaryOperator::Multiply => l.checked_mul(r).ok_or_else(overflow)?,
        BinaryOperator::Divide => {
            if r.is_zero() {
                return Err(FormulaError::evaluation("division by zero"));
            }
            l.checked_div(r).ok_or_else(overflow)?
        }
        BinaryOperator::Power => {
            if l.is_zero() && r < Decimal::ZERO {
                return Err(FormulaError::evaluation(format!(
                    "zero raised to a negative power in {} ^ {}",
                    l, r
                )));
            }
            if l < Decimal::ZERO && !r.fract().is_zero() {
                return Err(FormulaError::evaluation(format!(
                    "exponent outside the domain of ^ in {} ^ {}",
                    l, r
                )));
            }
            power(l, r).ok_or_else(overflow)?
        }
        _ => unreachable!("comparison handled above"),
    };

    Ok(FormulaValue::Number(result))
}

fn power(base: Decimal, exponent: Decimal) -> Option<Decimal> {
    if base.is_zero() {
        return Some(if exponent.is_zero() { Decimal::ONE } else { Decimal::ZERO });
    }
    if exponent.fract().is_zero() {
        base.checked_powi(exponent.to_i64()?)
    } else {
        base.checked_powd(exponent)
    }
}

fn compare(op: BinaryOperator, left: FormulaValue, right: FormulaValue) -> FormulaResult<bool> {
    use FormulaValue::{Boolean, Number};

    match (op, left, right) {
        (BinaryOperator::Equal, Boolean(a), Boolean(b)) => Ok(a == b),
        (BinaryOperator::NotEqual, Boolean(a), Boolean(b)) => Ok(a != b),
        // A boolean never equals a number
        (BinaryOperator::Equal, Boolean(_), Number(_))
        | (BinaryOperator::Equal, Number(_), Boolean(_)) => Ok(false),
        (BinaryOperator::NotEqual, Boolean(_), Number(_))
        | (BinaryOperator::NotEqual, Number(_), Boolean(_)) => Ok(true),
        (op, Number(a), Number(b)) => Ok(match op {
            BinaryOperator::Equal => a == b,
            BinaryOperator::NotEqual => a != b,
            BinaryOperator::LessThan => a < b,
            BinaryOperator::LessEqual => a <= b,
            BinaryOperator::GreaterThan => a > b,
            BinaryOperator::GreaterEqual => a >= b,
            _ => unreachable!("arithmetic operator in comparison"),
        }),
        (op, _, _) => Err(FormulaError::evaluation(format!(
            "type mismatch: cannot order booleans with '{}'",
            op.symbol()
        ))),
    }
}

fn evaluate_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let def = function_registry()
        .get(name)
        .ok_or_else(|| FormulaError::UnsupportedExpression(format!("function {}", name)))?;
    def.check_arity(args.len())?;

    match def.kind {
        FunctionKind::Eager(implementation) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<FormulaResult<Vec<_>>>()?;
            implementation(&values)
        }
        FunctionKind::Conditional if def.name == "IF" => {
            // Only the selected branch is evaluated
            if evaluate(&args[0], ctx)?.is_truthy() {
                evaluate(&args[1], ctx)
            } else {
                evaluate(&args[2], ctx)
            }
        }
        FunctionKind::Conditional => evaluate_case(args, ctx),
    }
}

/// Arms top to bottom, first true `WHEN` wins, then `ELSE`, then zero
fn evaluate_case(args: &[FormulaExpr], ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut arms = args.chunks_exact(2);
    for arm in arms.by_ref() {
        if evaluate(&arm[0], ctx)?.is_truthy() {
            return evaluate(&arm[1], ctx);
        }
    }
    match arms.remainder() {
        [otherwise] => evaluate(otherwise, ctx),
        _ => Ok(FormulaValue::Number(Decimal::ZERO)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use plancalc_core::{
        CellKey, DimensionValue, ExtraDims, FactValues, MemoryFactStore, SessionId,
    };
    use rust_decimal_macros::dec;

    struct Fixture {
        store: MemoryFactStore,
        registry: DimensionRegistry,
        session: SessionId,
    }

    fn fixture() -> Fixture {
        let mut registry = DimensionRegistry::new();
        registry
            .add_value(&Dimension::Version, DimensionValue::new(1, "ACT", "Actual"))
            .unwrap();
        registry
            .add_value(&Dimension::Year, DimensionValue::new(2025, "2025", "2025"))
            .unwrap();
        registry
            .add_value(&Dimension::Period, DimensionValue::new(1, "P01", "January"))
            .unwrap();
        for (id, code) in [(1, "A"), (2, "B"), (3, "C")] {
            registry
                .add_value(&Dimension::OrgUnit, DimensionValue::new(id, code, code))
                .unwrap();
        }
        registry
            .add_value(&Dimension::KeyFigure, DimensionValue::new(10, "COST", "Cost"))
            .unwrap();

        let mut store = MemoryFactStore::new();
        let session = store
            .create_session("plan", DimId(1), DimId(2025), None)
            .unwrap();
        let batch = store.ensure_batch(session.id).unwrap();
        for (org_unit, value) in [(1, dec!(10)), (2, dec!(20)), (3, dec!(30))] {
            let cell = CellKey {
                session: session.id,
                version: DimId(1),
                year: DimId(2025),
                period: DimId(1),
                org_unit: DimId(org_unit),
                service: None,
                account: None,
                key_figure: DimId(10),
                extra: ExtraDims::new(),
            };
            store
                .put(cell.in_batch(batch.id), FactValues::amount(value))
                .unwrap();
        }

        Fixture {
            store,
            registry,
            session: session.id,
        }
    }

    fn eval_with(text: &str, bindings: &LoopBindings) -> FormulaResult<FormulaValue> {
        let f = fixture();
        let expr = parse_expression(text).unwrap();
        let ctx = EvaluationContext::new(&f.store, &f.registry, Scope::session(f.session), bindings);
        evaluate(&expr, &ctx)
    }

    fn eval(text: &str) -> FormulaResult<FormulaValue> {
        eval_with(text, &LoopBindings::new())
    }

    fn number(text: &str) -> Decimal {
        eval(text).unwrap().to_number().unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(number("1 + 2 * 3"), dec!(7));
        assert_eq!(number("(1 + 2) * 3"), dec!(9));
        assert_eq!(number("10 / 4"), dec!(2.5));
        assert_eq!(number("2 ^ 10"), dec!(1024));
        assert_eq!(number("-2 ^ 2"), dec!(4));
        assert_eq!(number("-(3 - 5)"), dec!(2));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(eval("1 / 0"), Err(FormulaError::Evaluation(_))));
    }

    #[test]
    fn test_overflow_is_error() {
        assert!(matches!(
            eval("79228162514264337593543950335 * 2"),
            Err(FormulaError::Evaluation(_))
        ));
    }

    #[test]
    fn test_power_domain() {
        assert_eq!(number("0 ^ 0.5"), dec!(0));
        assert_eq!(number("0 ^ 0"), dec!(1));
        assert_eq!(number("-2 ^ 3"), dec!(-8));

        let message = |text: &str| match eval(text) {
            Err(FormulaError::Evaluation(message)) => message,
            other => panic!("expected an evaluation error, got {other:?}"),
        };
        assert!(message("-8 ^ 0.5").contains("outside the domain"));
        assert!(message("0 ^ -1").contains("negative power"));
        assert!(message("10 ^ 100").contains("overflow"));
    }

    #[test]
    fn test_boolean_arithmetic_is_type_error() {
        assert!(matches!(eval("(1 > 0) + 1"), Err(FormulaError::Evaluation(_))));
        assert!(matches!(eval("(1 > 0) < 1"), Err(FormulaError::Evaluation(_))));
        assert_eq!(eval("(1 > 0) = 1").unwrap(), FormulaValue::Boolean(false));
    }

    #[test]
    fn test_cell_references() {
        assert_eq!(number("[OrgUnit=B].[COST]"), dec!(20));
        assert_eq!(number("[OrgUnit=2].[COST]"), dec!(20));
        assert_eq!(number("SUM:COST"), dec!(60));
        assert_eq!(number("AVG:[COST]"), dec!(20));
        assert_eq!(number("MAX:[Period=P01].[COST]"), dec!(30));
        // First matching fact in key order
        assert_eq!(number("[COST]"), dec!(10));
    }

    #[test]
    fn test_unknown_dimension_value() {
        assert!(matches!(
            eval("[OrgUnit=Z].[COST]"),
            Err(FormulaError::UnknownDimensionValue { value, .. }) if value == "Z"
        ));
    }

    #[test]
    fn test_loop_binding() {
        let bindings: LoopBindings = [(Dimension::OrgUnit, DimId(3))].into_iter().collect();
        assert_eq!(
            eval_with("[OrgUnit=$LOOP].[COST]", &bindings).unwrap(),
            FormulaValue::Number(dec!(30))
        );
        assert!(matches!(
            eval("[OrgUnit=$LOOP].[COST]"),
            Err(FormulaError::UnboundLoopDimension(dim)) if dim == "OrgUnit"
        ));
    }

    #[test]
    fn test_if_prunes_branches() {
        // The untaken branch would divide by zero
        assert_eq!(number("IF(1 > 0, 5, 1 / 0)"), dec!(5));
        assert_eq!(number("IF([OrgUnit=A].[COST] = 0, 1 / 0, 7)"), dec!(7));
    }

    #[test]
    fn test_case() {
        assert_eq!(number("CASE WHEN 1 > 2 THEN 1 WHEN 2 > 1 THEN 2 ELSE 3 END"), dec!(2));
        assert_eq!(number("CASE WHEN 1 > 2 THEN 1 ELSE 3 END"), dec!(3));
        assert_eq!(number("CASE WHEN 1 > 2 THEN 1 END"), dec!(0));
    }

    #[test]
    fn test_functions() {
        assert_eq!(number("ABS(-3) + MAX(1, 4, 2) - MIN(5, 2)"), dec!(5));
        assert_eq!(number("ROUND(2.345, 2)"), dec!(2.34));
        assert_eq!(eval("AND(1, NOT(0))").unwrap(), FormulaValue::Boolean(true));
    }

    #[test]
    fn test_unexpanded_nodes_are_unsupported() {
        for text in ["$BASE", "GROWTH", "REF('Budget')"] {
            assert!(matches!(
                eval(text),
                Err(FormulaError::UnsupportedExpression(_))
            ));
        }
    }

    #[test]
    fn test_scalar_rounding() {
        let f = fixture();
        let bindings = LoopBindings::new();
        let ctx = EvaluationContext::new(&f.store, &f.registry, Scope::session(f.session), &bindings);

        let value = evaluate_scalar(&parse_expression("1000 * 1.1").unwrap(), &ctx, 4).unwrap();
        assert_eq!(value.to_string(), "1100.0000");

        let value = evaluate_scalar(&parse_expression("2 / 3").unwrap(), &ctx, 4).unwrap();
        assert_eq!(value.to_string(), "0.6667");

        assert!(evaluate_scalar(&parse_expression("1 > 0").unwrap(), &ctx, 4).is_err());
    }
}
