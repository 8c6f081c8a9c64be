//! Math functions

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{FormulaError, FormulaResult};
use crate::evaluator::FormulaValue;

/// ABS function
pub fn fn_abs(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Number(number_arg(args, 0, "ABS")?.abs()))
}

/// MIN function
pub fn fn_min(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    fold_numbers(args, "MIN", std::cmp::min)
}

/// MAX function
pub fn fn_max(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    fold_numbers(args, "MAX", std::cmp::max)
}

/// ROUND(value, [digits]) with banker's rounding; negative digits round to tens, hundreds...
pub fn fn_round(args: &[FormulaValue]) -> FormulaResult<FormulaValue> {
    let value = number_arg(args, 0, "ROUND")?;
    let digits = match args.get(1) {
        Some(arg) => {
            let digits = arg.to_number()?;
            if !digits.fract().is_zero() {
                return Err(FormulaError::evaluation("ROUND digits must be a whole number"));
            }
            digits
                .to_i32()
                .filter(|d| (-28..=28).contains(d))
                .ok_or_else(|| FormulaError::evaluation("ROUND digits out of range"))?
        }
        None => 0,
    };

    if digits >= 0 {
        return Ok(FormulaValue::Number(value.round_dp(digits.unsigned_abs())));
    }

    let factor = Decimal::from_i128_with_scale(10i128.pow(digits.unsigned_abs()), 0);
    let rounded = (value / factor).round() * factor;
    Ok(FormulaValue::Number(rounded))
}

fn number_arg(args: &[FormulaValue], index: usize, function: &str) -> FormulaResult<Decimal> {
    args.get(index)
        .ok_or_else(|| FormulaError::evaluation(format!("{} is missing an argument", function)))?
        .to_number()
}

fn fold_numbers(
    args: &[FormulaValue],
    function: &str,
    pick: fn(Decimal, Decimal) -> Decimal,
) -> FormulaResult<FormulaValue> {
    let mut acc: Option<Decimal> = None;
    for arg in args {
        let n = arg.to_number()?;
        acc = Some(acc.map_or(n, |a| pick(a, n)));
    }
    acc.map(FormulaValue::Number)
        .ok_or_else(|| FormulaError::evaluation(format!("{} needs at least one argument", function)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn n(value: Decimal) -> FormulaValue {
        FormulaValue::Number(value)
    }

    #[test]
    fn test_min_max_abs() {
        let args = [n(dec!(3)), n(dec!(-7)), n(dec!(5))];
        assert_eq!(fn_min(&args).unwrap(), n(dec!(-7)));
        assert_eq!(fn_max(&args).unwrap(), n(dec!(5)));
        assert_eq!(fn_abs(&[n(dec!(-7))]).unwrap(), n(dec!(7)));
    }

    #[test]
    fn test_round() {
        assert_eq!(fn_round(&[n(dec!(2.345)), n(dec!(2))]).unwrap(), n(dec!(2.34)));
        assert_eq!(fn_round(&[n(dec!(2.5))]).unwrap(), n(dec!(2)));
        assert_eq!(fn_round(&[n(dec!(1250)), n(dec!(-2))]).unwrap(), n(dec!(1200)));
        assert!(fn_round(&[n(dec!(1)), n(dec!(0.5))]).is_err());
    }

    #[test]
    fn test_boolean_argument_is_type_error() {
        assert!(matches!(
            fn_abs(&[FormulaValue::Boolean(true)]),
            Err(FormulaError::Evaluation(_))
        ));
    }
}
