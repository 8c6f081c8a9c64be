//! ResetSlice: zero every fact in a slice of the session

use std::collections::BTreeMap;

use plancalc_core::{FactStore, RunLedger, Scope};
use rust_decimal::Decimal;

use super::FunctionContext;
use crate::error::Result;

/// Set value and reference value to zero on every matching current fact
///
/// Rows already at zero are left alone and not counted, so a second call with
/// the same filter returns 0.
pub(super) fn reset_slice<S: FactStore, L: RunLedger>(
    ctx: &mut FunctionContext<'_, S, L>,
    literals: &BTreeMap<String, String>,
) -> Result<usize> {
    let filter = ctx.filter(literals)?;
    let rows = ctx
        .store
        .select_current(&filter, &Scope::session(ctx.session.id))?;

    let mut reset = 0;
    for fact in rows {
        if fact.value.is_zero() && fact.ref_value.is_zero() {
            continue;
        }
        let (row, _) = ctx.store.upsert(fact.key.clone(), fact.values())?;
        row.value = Decimal::ZERO;
        row.ref_value = Decimal::ZERO;
        ctx.record(fact.key, fact.value, Decimal::ZERO)?;
        reset += 1;
    }
    Ok(reset)
}
