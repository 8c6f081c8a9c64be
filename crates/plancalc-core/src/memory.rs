//! In-memory fact store
//!
//! Reference [`FactStore`] backend. Facts live in a `BTreeMap` keyed by the full
//! [`FactKey`], so iteration order (and therefore every result built from it) is
//! deterministic. A unit of work snapshots the whole state on begin and restores
//! it on rollback.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::Utc;

use crate::dimension::DimId;
use crate::error::{Error, Result};
use crate::fact::{
    ActionType, Batch, BatchId, Fact, FactId, FactKey, FactValues, Session, SessionId,
};
use crate::filter::{FactFilter, Scope};
use crate::store::FactStore;

#[derive(Debug, Clone, Default)]
struct State {
    facts: BTreeMap<FactKey, Fact>,
    sessions: BTreeMap<SessionId, Session>,
    batches: BTreeMap<BatchId, Batch>,
    next_fact: u64,
    next_session: u64,
    next_batch: u64,
}

/// Fact store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    state: State,
    /// State at the start of the open unit of work
    snapshot: Option<State>,
}

impl MemoryFactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with a caller-chosen id (used when loading saved data)
    pub fn insert_session(&mut self, session: Session) -> Result<()> {
        if self.state.sessions.contains_key(&session.id) {
            return Err(Error::other(format!(
                "session {} already exists",
                session.id
            )));
        }
        self.state.next_session = self.state.next_session.max(session.id.0);
        self.state.sessions.insert(session.id, session);
        Ok(())
    }

    /// Iterate all facts in key order
    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.state.facts.values()
    }

    /// Number of stored facts
    pub fn len(&self) -> usize {
        self.state.facts.len()
    }

    /// Whether the store holds no facts
    pub fn is_empty(&self) -> bool {
        self.state.facts.is_empty()
    }

    /// Iterate sessions in id order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.state.sessions.values()
    }

    /// Batches of a session in creation order
    pub fn batches(&self, session: SessionId) -> Vec<Batch> {
        self.state
            .batches
            .values()
            .filter(|b| b.session == session)
            .cloned()
            .collect()
    }

    /// Whether a unit of work is open
    pub fn in_unit(&self) -> bool {
        self.snapshot.is_some()
    }

    fn check_key(&self, key: &FactKey) -> Result<()> {
        let batch = self
            .state
            .batches
            .get(&key.batch)
            .ok_or(Error::UnknownBatch(key.batch.0))?;
        if batch.session != key.cell.session {
            return Err(Error::InvalidKey(format!(
                "batch {} belongs to session {}, not {}",
                batch.id, batch.session, key.cell.session
            )));
        }
        Ok(())
    }
}

impl FactStore for MemoryFactStore {
    fn find(&self, key: &FactKey) -> Option<&Fact> {
        self.state.facts.get(key)
    }

    fn select(&self, filter: &FactFilter, scope: &Scope) -> Result<Vec<Fact>> {
        Ok(self
            .state
            .facts
            .values()
            .filter(|f| scope.contains(&f.key.cell, filter) && filter.matches(&f.key.cell))
            .cloned()
            .collect())
    }

    fn upsert(&mut self, key: FactKey, defaults: FactValues) -> Result<(&mut Fact, bool)> {
        self.check_key(&key)?;

        let state = &mut self.state;
        match state.facts.entry(key) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                state.next_fact += 1;
                let fact = Fact::new(FactId(state.next_fact), entry.key().clone(), defaults);
                Ok((entry.insert(fact), true))
            }
        }
    }

    fn delete_where(&mut self, filter: &FactFilter, scope: &Scope) -> Result<usize> {
        let before = self.state.facts.len();
        self.state
            .facts
            .retain(|key, _| !(scope.contains(&key.cell, filter) && filter.matches(&key.cell)));
        Ok(before - self.state.facts.len())
    }

    fn batch_facts(&self, batch: BatchId) -> Result<Vec<Fact>> {
        if !self.state.batches.contains_key(&batch) {
            return Err(Error::UnknownBatch(batch.0));
        }
        Ok(self
            .state
            .facts
            .values()
            .filter(|f| f.key.batch == batch)
            .cloned()
            .collect())
    }

    fn session(&self, id: SessionId) -> Result<Session> {
        self.state
            .sessions
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownSession(id.0))
    }

    fn find_session(&self, version: DimId, year: DimId) -> Option<Session> {
        self.state
            .sessions
            .values()
            .find(|s| s.version == version && s.year == year)
            .cloned()
    }

    fn create_session(
        &mut self,
        name: &str,
        version: DimId,
        year: DimId,
        org_unit: Option<DimId>,
    ) -> Result<Session> {
        self.state.next_session += 1;
        let session = Session {
            id: SessionId(self.state.next_session),
            name: name.to_string(),
            version,
            year,
            org_unit,
        };
        self.state.sessions.insert(session.id, session.clone());
        tracing::debug!(session = %session.id, "created session");
        Ok(session)
    }

    fn latest_batch(&self, session: SessionId) -> Result<Option<Batch>> {
        if !self.state.sessions.contains_key(&session) {
            return Err(Error::UnknownSession(session.0));
        }
        Ok(self
            .state
            .batches
            .values()
            .rev()
            .find(|b| b.session == session)
            .cloned())
    }

    fn create_batch(
        &mut self,
        session: SessionId,
        action: ActionType,
        description: &str,
    ) -> Result<Batch> {
        if !self.state.sessions.contains_key(&session) {
            return Err(Error::UnknownSession(session.0));
        }
        self.state.next_batch += 1;
        let batch = Batch {
            id: BatchId(self.state.next_batch),
            session,
            action,
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.state.batches.insert(batch.id, batch.clone());
        tracing::debug!(batch = %batch.id, session = %session, action = %action, "created batch");
        Ok(batch)
    }

    fn begin_unit(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::TransactionActive);
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit_unit(&mut self) -> Result<()> {
        self.snapshot.take().map(|_| ()).ok_or(Error::NoTransaction)
    }

    fn rollback_unit(&mut self) -> Result<()> {
        let snapshot = self.snapshot.take().ok_or(Error::NoTransaction)?;
        self.state = snapshot;
        Ok(())
    }
}
