//! Repost: clone the latest batch of a session into a new batch

use plancalc_core::{FactStore, RunLedger};

use super::FunctionContext;
use crate::error::Result;

/// Copy the newest batch and its facts verbatim, keeping the action tag
pub(super) fn repost<S: FactStore, L: RunLedger>(
    ctx: &mut FunctionContext<'_, S, L>,
) -> Result<usize> {
    let session = ctx.session.id;
    let Some(latest) = ctx.store.latest_batch(session)? else {
        tracing::debug!(session = %session, "no batch to repost");
        return Ok(0);
    };

    let facts = ctx.store.batch_facts(latest.id)?;
    let batch = ctx.store.create_batch(
        session,
        latest.action,
        &format!("repost of batch {}", latest.id),
    )?;
    for fact in &facts {
        let key = fact.key.cell.clone().in_batch(batch.id);
        ctx.store.put(key.clone(), fact.values())?;
        ctx.record(key, fact.value, fact.value)?;
    }
    Ok(facts.len())
}
