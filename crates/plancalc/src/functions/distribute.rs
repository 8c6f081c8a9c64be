//! Distribute: rescale facts so each group matches a reference total

use std::collections::BTreeMap;

use plancalc_core::{DimId, Dimension, Fact, FactFilter, FactStore, RunLedger, Scope};
use plancalc_formula::{round_result, DimFilter, DimValue, LoopBindings, ReferenceCall, ReferenceResolver};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::FunctionContext;
use crate::error::Result;

/// Rescale the reference key figure's facts group by group
///
/// Facts are grouped by their values on `group_by` (a dimension a fact leaves
/// unset is not part of its group). Each group's total is read from the named
/// reference source restricted to the group's values, and every row becomes
/// `value * total / base`, where base is the group's current sum. Rows are
/// rounded to the run scale and the rounding residue lands on the largest row,
/// so the group sums to the total. A zero total or zero base leaves the group
/// unchanged.
pub(super) fn distribute<S: FactStore, L: RunLedger>(
    ctx: &mut FunctionContext<'_, S, L>,
    group_by: &[String],
    reference: &str,
) -> Result<usize> {
    let data = ctx.catalog.reference(reference)?;
    let key_figure = ctx.resolve(&Dimension::KeyFigure, &data.key_figure)?;
    let dimensions = group_by
        .iter()
        .map(|name| ctx.dimension(name))
        .collect::<Result<Vec<_>>>()?;

    let rows = ctx.store.select_current(
        &FactFilter::new().with(Dimension::KeyFigure, key_figure),
        &Scope::session(ctx.session.id),
    )?;
    let mut groups: BTreeMap<Vec<(Dimension, DimId)>, Vec<Fact>> = BTreeMap::new();
    for fact in rows {
        let group = dimensions
            .iter()
            .filter_map(|d| fact.key.cell.value_of(d).map(|id| (d.clone(), id)))
            .collect();
        groups.entry(group).or_default().push(fact);
    }

    let mut updated = 0;
    for (group, facts) in groups {
        let call = ReferenceCall {
            name: reference.to_string(),
            filters: group
                .iter()
                .map(|(dimension, id)| DimFilter::new(dimension.clone(), DimValue::Id(*id)))
                .collect(),
        };
        let total = ReferenceResolver::new(&*ctx.store, ctx.registry, ctx.catalog)
            .value(&call, &LoopBindings::new())?;

        let base = facts
            .iter()
            .try_fold(Decimal::ZERO, |sum, fact| sum.checked_add(fact.value));
        let base = match base {
            Some(base) => base,
            None => {
                for fact in &facts {
                    ctx.row_error(&fact.key.cell, "group sum overflows");
                }
                continue;
            }
        };
        if total.is_zero() || base.is_zero() {
            warn!(reference, %total, %base, rows = facts.len(), "nothing to distribute for group");
            continue;
        }
        debug!(reference, %total, %base, rows = facts.len(), "distributing group");

        let mut scaled: Vec<(Fact, Decimal)> = Vec::with_capacity(facts.len());
        let mut failed = false;
        for fact in facts {
            let value = fact
                .value
                .checked_mul(total)
                .and_then(|v| v.checked_div(base))
                .map(|v| round_result(v, ctx.scale));
            match value {
                Some(value) => scaled.push((fact, value)),
                None => {
                    ctx.row_error(&fact.key.cell, "overflow while rescaling");
                    failed = true;
                }
            }
        }
        if !failed {
            settle_residue(&mut scaled, round_result(total, ctx.scale));
        }

        for (fact, value) in scaled {
            let (row, _) = ctx.store.upsert(fact.key.clone(), fact.values())?;
            row.value = value;
            ctx.record(fact.key, fact.value, value)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Move the rounding residue onto the largest row (the last one on ties) so
/// the group adds up to `total` exactly
fn settle_residue(rows: &mut [(Fact, Decimal)], total: Decimal) {
    let sum = rows
        .iter()
        .try_fold(Decimal::ZERO, |sum, (_, value)| sum.checked_add(*value));
    let Some(residue) = sum.and_then(|sum| total.checked_sub(sum)) else {
        return;
    };
    if residue.is_zero() {
        return;
    }
    let largest = rows
        .iter_mut()
        .max_by(|(_, a), (_, b)| a.abs().cmp(&b.abs()));
    if let Some((fact, value)) = largest {
        if let Some(adjusted) = value.checked_add(residue) {
            debug!(fact = %fact.id, %residue, "rounding residue settled");
            *value = adjusted;
        }
    }
}
