//! Formula Abstract Syntax Tree types

use std::fmt;

use plancalc_core::{AggregateKind, DimId, Dimension};
use rust_decimal::Decimal;

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(Decimal),

    // === References ===
    /// Fact cell reference, optionally aggregated
    CellRef(CellReference),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },

    // === Function call ===
    /// Whitelisted function; `IF` and `CASE` included
    Function { name: String, args: Vec<FormulaExpr> },

    // === Macros, removed before evaluation ===
    /// `$NAME`
    SubFormula(String),
    /// Bare uppercase symbol
    Constant(String),
    /// `REF('name', dim=value, ...)`
    Reference(ReferenceCall),
}

impl FormulaExpr {
    /// Number literal from an integer
    pub fn number(value: i64) -> Self {
        FormulaExpr::Number(Decimal::from(value))
    }

    /// Short description of the node kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FormulaExpr::Number(_) => "number",
            FormulaExpr::CellRef(_) => "cell reference",
            FormulaExpr::BinaryOp { .. } => "binary operation",
            FormulaExpr::UnaryOp { .. } => "unary operation",
            FormulaExpr::Function { .. } => "function call",
            FormulaExpr::SubFormula(_) => "sub-formula",
            FormulaExpr::Constant(_) => "constant",
            FormulaExpr::Reference(_) => "reference data lookup",
        }
    }

    /// Visit this node and all of its descendants, parents first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a FormulaExpr)) {
        visit(self);
        match self {
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.walk(visit),
            FormulaExpr::Function { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaExpr::Number(n) => write!(f, "{}", n),
            FormulaExpr::CellRef(reference) => write!(f, "{}", reference),
            FormulaExpr::BinaryOp { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand,
            } => write!(f, "-{}", operand),
            FormulaExpr::Function { name, args } if name == "CASE" => {
                f.write_str("CASE")?;
                let mut arms = args.chunks_exact(2);
                for arm in arms.by_ref() {
                    write!(f, " WHEN {} THEN {}", arm[0], arm[1])?;
                }
                if let [otherwise] = arms.remainder() {
                    write!(f, " ELSE {}", otherwise)?;
                }
                f.write_str(" END")
            }
            FormulaExpr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            FormulaExpr::SubFormula(name) => write!(f, "${}", name),
            FormulaExpr::Constant(name) => f.write_str(name),
            FormulaExpr::Reference(call) => {
                write!(f, "REF('{}'", call.name)?;
                for filter in &call.filters {
                    write!(f, ", {}", filter)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Value a dimension filter selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimValue {
    /// Literal code (or id text) as written
    Code(String),
    /// Literal resolved against the dimension's master list
    Id(DimId),
    /// `$LOOP`: the current combination's value
    Loop,
}

impl fmt::Display for DimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimValue::Code(code) => f.write_str(code),
            DimValue::Id(id) => write!(f, "{}", id),
            DimValue::Loop => f.write_str("$LOOP"),
        }
    }
}

/// One `Dim=value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimFilter {
    pub dimension: Dimension,
    pub value: DimValue,
}

impl DimFilter {
    pub fn new(dimension: Dimension, value: DimValue) -> Self {
        Self { dimension, value }
    }
}

impl fmt::Display for DimFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            DimValue::Code(code) if code.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                write!(f, "{}={}", self.dimension, code)
            }
            DimValue::Code(code) => write!(f, "{}='{}'", self.dimension, code.replace('\'', "''")),
            value => write!(f, "{}={}", self.dimension, value),
        }
    }
}

/// `[Dim=value,...]?.[KF]`, `[KF]` or an aggregated form of either
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellReference {
    pub aggregate: Option<AggregateKind>,
    pub filters: Vec<DimFilter>,
    /// Key figure; never [`DimValue::Loop`]
    pub key_figure: DimValue,
    /// Written with `?`; evaluates to zero when no fact matches, like every read
    pub optional: bool,
}

impl CellReference {
    /// Plain reference to a key figure
    pub fn key_figure(code: impl Into<String>) -> Self {
        Self {
            aggregate: None,
            filters: Vec::new(),
            key_figure: DimValue::Code(code.into()),
            optional: false,
        }
    }

    /// Builder-style filter
    pub fn with_filter(mut self, dimension: Dimension, value: DimValue) -> Self {
        self.filters.push(DimFilter::new(dimension, value));
        self
    }

    /// Whether any filter uses `$LOOP`
    pub fn uses_loop(&self) -> bool {
        self.filters.iter().any(|f| f.value == DimValue::Loop)
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = self.aggregate {
            write!(f, "{}:", kind)?;
        }
        if self.filters.is_empty() && !self.optional {
            return write!(f, "[{}]", self.key_figure);
        }
        f.write_str("[")?;
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", filter)?;
        }
        f.write_str("]")?;
        if self.optional {
            f.write_str("?")?;
        }
        write!(f, ".[{}]", self.key_figure)
    }
}

/// `REF('name', dim=value, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCall {
    pub name: String,
    pub filters: Vec<DimFilter>,
}

/// A parsed `target = expr` statement
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaStatement {
    pub target: CellReference,
    pub expr: FormulaExpr,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        !matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Power
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expression, parse_statement};

    #[test]
    fn test_display_reparses() {
        for text in [
            "([OrgUnit=$LOOP,Period=P01].[COST] * 1.1)",
            "SUM:[COST]",
            "IF((MAX:[Channel='Web shop']?.[REVENUE] > 0), -$BASE, GROWTH)",
            "CASE WHEN ([COST] > 1) THEN 1 ELSE REF('Budget', OrgUnit=A) END",
        ] {
            let expr = parse_expression(text).unwrap();
            assert_eq!(expr.to_string(), text);
            assert_eq!(parse_expression(&expr.to_string()).unwrap(), expr);
        }
    }

    #[test]
    fn test_walk_visits_every_node() {
        let stmt = parse_statement("[COST] = ABS([COST] - 1) + $BASE").unwrap();
        let mut kinds = Vec::new();
        stmt.expr.walk(&mut |node| kinds.push(node.kind()));
        assert_eq!(
            kinds,
            vec![
                "binary operation",
                "function call",
                "binary operation",
                "cell reference",
                "number",
                "sub-formula",
            ]
        );
    }
}
