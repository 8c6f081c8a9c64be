//! Copy: clone a session's facts into another version

use std::collections::BTreeMap;

use plancalc_core::{ActionType, CellKey, Dimension, FactFilter, FactStore, RunLedger, Scope};
use rust_decimal::Decimal;

use super::FunctionContext;
use crate::error::{Error, Result};

/// Clone every current fact of the session (optionally one period) into the
/// `(to_version, year)` session under a new overwrite batch
pub(super) fn copy<S: FactStore, L: RunLedger>(
    ctx: &mut FunctionContext<'_, S, L>,
    to_version: &str,
    year: &str,
    period: Option<&str>,
) -> Result<usize> {
    let version = ctx.resolve(&Dimension::Version, to_version)?;
    let year = ctx.resolve(&Dimension::Year, year)?;

    let mut filter = FactFilter::new();
    if let Some(period) = period {
        filter.insert(Dimension::Period, ctx.resolve(&Dimension::Period, period)?);
    }
    let rows = ctx
        .store
        .select_current(&filter, &Scope::session(ctx.session.id))?;
    if rows.is_empty() {
        tracing::debug!(session = %ctx.session.id, "nothing to copy");
        return Ok(0);
    }

    let target = ctx.store.find_or_create_session(version, year)?;
    if target.id == ctx.session.id {
        return Err(Error::invalid_request(format!(
            "copy target {}/{} is the source session itself",
            to_version,
            ctx.registry.code_or_id(&Dimension::Year, year)
        )));
    }

    // Old values are what readers of the target saw before the copy
    let before: BTreeMap<CellKey, Decimal> = ctx
        .store
        .select_current(&filter, &Scope::session(target.id))?
        .into_iter()
        .map(|fact| (fact.key.cell, fact.value))
        .collect();

    let batch = ctx.store.create_batch(
        target.id,
        ActionType::Overwrite,
        &format!("copy of session {}", ctx.session.id),
    )?;

    let mut copied = 0;
    for fact in rows {
        let mut cell = fact.key.cell.clone();
        cell.session = target.id;
        cell.version = version;
        cell.year = year;

        let old = before.get(&cell).copied().unwrap_or(Decimal::ZERO);
        let key = cell.in_batch(batch.id);
        ctx.store.put(key.clone(), fact.values())?;
        ctx.record(key, old, fact.value)?;
        copied += 1;
    }
    Ok(copied)
}
