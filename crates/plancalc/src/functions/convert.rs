//! Convert: restate amounts in another unit

use plancalc_core::{FactFilter, FactStore, RunLedger, Scope};
use plancalc_formula::round_result;
use rust_decimal::Decimal;

use super::FunctionContext;
use crate::error::Result;

/// Multiply every fact whose unit converts to `target_unit` by the factor
///
/// The reference value follows along when it is in the same unit (or has no
/// unit of its own), or when its own unit has a factor. Facts without a unit,
/// already in the target unit, or without a registered factor are skipped.
pub(super) fn convert<S: FactStore, L: RunLedger>(
    ctx: &mut FunctionContext<'_, S, L>,
    target_unit: &str,
) -> Result<usize> {
    let rows = ctx
        .store
        .select_current(&FactFilter::new(), &Scope::session(ctx.session.id))?;

    let mut updated = 0;
    for fact in rows {
        let Some(unit) = fact.unit.as_deref() else {
            continue;
        };
        if unit == target_unit {
            continue;
        }
        let Some(factor) = ctx.catalog.conversions.factor(unit, target_unit) else {
            tracing::debug!(unit, target_unit, "no conversion factor, fact skipped");
            continue;
        };

        let mut values = fact.values();
        let Some(value) = scale(fact.value, factor, ctx.scale) else {
            ctx.row_error(&fact.key.cell, format!("overflow converting {} to {}", unit, target_unit));
            continue;
        };
        values.value = value;
        values.unit = Some(target_unit.to_string());

        let ref_factor = match fact.ref_unit.as_deref() {
            None => Some(factor),
            Some(ref_unit) if ref_unit == unit => Some(factor),
            Some(ref_unit) if ref_unit == target_unit => None,
            Some(ref_unit) => ctx.catalog.conversions.factor(ref_unit, target_unit),
        };
        if let Some(ref_factor) = ref_factor {
            let Some(ref_value) = scale(fact.ref_value, ref_factor, ctx.scale) else {
                ctx.row_error(&fact.key.cell, "overflow converting the reference value");
                continue;
            };
            values.ref_value = ref_value;
            if fact.ref_unit.is_some() {
                values.ref_unit = Some(target_unit.to_string());
            }
        }

        ctx.store.put(fact.key.clone(), values)?;
        ctx.record(fact.key, fact.value, value)?;
        updated += 1;
    }
    Ok(updated)
}

fn scale(value: Decimal, factor: Decimal, digits: u32) -> Option<Decimal> {
    value
        .checked_mul(factor)
        .map(|converted| round_result(converted, digits))
}
