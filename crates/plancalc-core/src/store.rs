//! Fact store contract and unit of work
//!
//! [`FactStore`] is everything the calculation engine needs from storage. A
//! backend implements row access, sessions, batches and the unit-of-work hooks;
//! the single-fact lookup and the aggregates come as provided methods built on
//! [`FactStore::select_current`], which a query-capable backend may override.
//!
//! Every top-level invocation runs inside a [`UnitOfWork`]. Dropping a unit that
//! was not committed rolls the store back, so a failure part-way through leaves
//! no partial writes behind.

use std::ops::{Deref, DerefMut};

use ahash::AHashMap;
use rust_decimal::Decimal;

use crate::dimension::{DimId, Dimension};
use crate::error::Result;
use crate::fact::{
    ActionType, Batch, BatchId, CellKey, Fact, FactId, FactKey, FactValues, Session, SessionId,
};
use crate::filter::{AggregateKind, FactFilter, Scope};

/// Storage collaborator of the planning engine
pub trait FactStore {
    // === Rows ===

    /// Fact stored under exactly this key
    fn find(&self, key: &FactKey) -> Option<&Fact>;

    /// Every stored row (all batches) matching filter and scope, ordered by key
    fn select(&self, filter: &FactFilter, scope: &Scope) -> Result<Vec<Fact>>;

    /// Create the fact if absent, else return the existing row for in-place mutation.
    ///
    /// The boolean is `true` when the row was created from `defaults`.
    fn upsert(&mut self, key: FactKey, defaults: FactValues) -> Result<(&mut Fact, bool)>;

    /// Delete every row matching filter and scope, returning the count
    fn delete_where(&mut self, filter: &FactFilter, scope: &Scope) -> Result<usize>;

    /// Rows belonging to one batch, ordered by key
    fn batch_facts(&self, batch: BatchId) -> Result<Vec<Fact>>;

    // === Sessions and batches ===

    /// Look up a session
    fn session(&self, id: SessionId) -> Result<Session>;

    /// Session for a version/year pair, if one exists
    fn find_session(&self, version: DimId, year: DimId) -> Option<Session>;

    /// Create a new session
    fn create_session(
        &mut self,
        name: &str,
        version: DimId,
        year: DimId,
        org_unit: Option<DimId>,
    ) -> Result<Session>;

    /// Most recently created batch of a session
    fn latest_batch(&self, session: SessionId) -> Result<Option<Batch>>;

    /// Create a new batch in a session
    fn create_batch(
        &mut self,
        session: SessionId,
        action: ActionType,
        description: &str,
    ) -> Result<Batch>;

    // === Unit of work hooks ===

    /// Open a unit of work
    fn begin_unit(&mut self) -> Result<()>;

    /// Make the open unit's writes durable
    fn commit_unit(&mut self) -> Result<()>;

    /// Discard the open unit's writes
    fn rollback_unit(&mut self) -> Result<()>;

    // === Provided ===

    /// Rows matching filter and scope, keeping only the newest batch's row of
    /// each logical cell
    fn select_current(&self, filter: &FactFilter, scope: &Scope) -> Result<Vec<Fact>> {
        let rows = self.select(filter, scope)?;
        let mut newest: AHashMap<CellKey, Fact> = AHashMap::with_capacity(rows.len());
        for fact in rows {
            match newest.get(&fact.key.cell) {
                Some(existing) if existing.key.batch >= fact.key.batch => {}
                _ => {
                    newest.insert(fact.key.cell.clone(), fact);
                }
            }
        }
        let mut current: Vec<Fact> = newest.into_values().collect();
        current.sort_by(|a, b| a.key.cell.cmp(&b.key.cell));
        Ok(current)
    }

    /// Newest row holding exactly this cell, across every batch of its session
    fn current_fact(&self, cell: &CellKey) -> Result<Option<Fact>> {
        let filter = FactFilter::new()
            .with(Dimension::KeyFigure, cell.key_figure)
            .with(Dimension::Period, cell.period)
            .with(Dimension::OrgUnit, cell.org_unit);
        Ok(self
            .select_current(&filter, &Scope::session(cell.session))?
            .into_iter()
            .find(|fact| fact.key.cell == *cell))
    }

    /// Value of the first matching fact for a key figure, zero if absent
    fn get(&self, key_figure: DimId, filter: &FactFilter, scope: &Scope) -> Result<Decimal> {
        let filter = filter.clone().with(Dimension::KeyFigure, key_figure);
        Ok(self
            .select_current(&filter, scope)?
            .first()
            .map(|fact| fact.value)
            .unwrap_or(Decimal::ZERO))
    }

    /// Aggregate the values of matching facts for a key figure
    fn aggregate(
        &self,
        kind: AggregateKind,
        key_figure: DimId,
        filter: &FactFilter,
        scope: &Scope,
    ) -> Result<Decimal> {
        let filter = filter.clone().with(Dimension::KeyFigure, key_figure);
        let rows = self.select_current(&filter, scope)?;
        Ok(aggregate_values(kind, rows.iter().map(|fact| fact.value)))
    }

    /// Session for a version/year pair, created if absent
    fn find_or_create_session(&mut self, version: DimId, year: DimId) -> Result<Session> {
        match self.find_session(version, year) {
            Some(session) => Ok(session),
            None => self.create_session("", version, year, None),
        }
    }

    /// The batch writes to a session go to, created lazily on first write
    fn ensure_batch(&mut self, session: SessionId) -> Result<Batch> {
        match self.latest_batch(session)? {
            Some(batch) => Ok(batch),
            None => self.create_batch(session, ActionType::Delta, ""),
        }
    }

    /// Write values under a key, creating or overwriting the fact
    fn put(&mut self, key: FactKey, values: FactValues) -> Result<FactId> {
        let (fact, _) = self.upsert(key, values.clone())?;
        fact.assign(values);
        Ok(fact.id)
    }
}

/// Aggregate an iterator of values; empty input yields zero for every kind
pub fn aggregate_values(kind: AggregateKind, values: impl Iterator<Item = Decimal>) -> Decimal {
    let mut count: u64 = 0;
    let mut acc: Option<Decimal> = None;

    for value in values {
        count += 1;
        acc = Some(match (kind, acc) {
            (_, None) => value,
            (AggregateKind::Sum | AggregateKind::Avg, Some(a)) => a + value,
            (AggregateKind::Min, Some(a)) => a.min(value),
            (AggregateKind::Max, Some(a)) => a.max(value),
        });
    }

    match (kind, acc) {
        (_, None) => Decimal::ZERO,
        (AggregateKind::Avg, Some(sum)) => sum / Decimal::from(count),
        (_, Some(value)) => value,
    }
}

/// Explicit unit of work over a store
///
/// Derefs to the store so all reads and writes go through the unit. Call
/// [`UnitOfWork::commit`] to keep the writes; dropping the unit otherwise rolls
/// them back.
pub struct UnitOfWork<'a, S: FactStore + ?Sized> {
    store: &'a mut S,
    finished: bool,
}

impl<'a, S: FactStore + ?Sized> UnitOfWork<'a, S> {
    /// Begin a unit of work
    pub fn begin(store: &'a mut S) -> Result<Self> {
        store.begin_unit()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    /// Commit the unit's writes
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.store.commit_unit()
    }

    /// Discard the unit's writes
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.store.rollback_unit()
    }
}

impl<S: FactStore + ?Sized> Deref for UnitOfWork<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.store
    }
}

impl<S: FactStore + ?Sized> DerefMut for UnitOfWork<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.store
    }
}

impl<S: FactStore + ?Sized> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.rollback_unit() {
                tracing::warn!("rollback of abandoned unit of work failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_aggregate_values() {
        let values = [dec!(10), dec!(20), dec!(30)];
        let agg = |kind| aggregate_values(kind, values.iter().copied());

        assert_eq!(agg(AggregateKind::Sum), dec!(60));
        assert_eq!(agg(AggregateKind::Avg), dec!(20));
        assert_eq!(agg(AggregateKind::Min), dec!(10));
        assert_eq!(agg(AggregateKind::Max), dec!(30));
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        for kind in [
            AggregateKind::Sum,
            AggregateKind::Avg,
            AggregateKind::Min,
            AggregateKind::Max,
        ] {
            assert_eq!(aggregate_values(kind, std::iter::empty()), Decimal::ZERO);
        }
    }
}
