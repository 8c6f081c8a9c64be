//! Logical functions
//!
//! Numbers are accepted as conditions: zero is false, anything else true.

use crate::error::FormulaResult;
use crate::evaluator::FormulaValue;

/// AND function
pub fn fn_and(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(args.iter().all(FormulaValue::is_truthy)))
}

/// OR function
pub fn fn_or(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(args.iter().any(FormulaValue::is_truthy)))
}

/// NOT function
pub fn fn_not(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(
        !args.first().map_or(false, FormulaValue::is_truthy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_logical() {
        let t = FormulaValue::Boolean(true);
        let zero = FormulaValue::Number(Decimal::ZERO);

        assert_eq!(fn_and(&[t.clone(), zero.clone()]).unwrap(), FormulaValue::Boolean(false));
        assert_eq!(fn_or(&[t.clone(), zero.clone()]).unwrap(), FormulaValue::Boolean(true));
        assert_eq!(fn_not(&[zero]).unwrap(), FormulaValue::Boolean(true));
        assert_eq!(fn_not(&[t]).unwrap(), FormulaValue::Boolean(false));
    }
}
