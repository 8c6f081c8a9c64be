//! Run ledger: the audit trail of formula runs and planning functions
//!
//! Every execution opens one [`Run`] and records one [`RunEntry`] per cell it
//! touched, in the order the cells were processed. Entries are recorded in
//! preview mode too; only the fact write is skipped there.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::fact::FactKey;

/// Ledger-assigned run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What produced a run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "type", content = "name", rename_all = "snake_case")
)]
pub enum RunSource {
    /// A formula, by name
    Formula(String),
    /// A planning function, by kind
    Function(String),
}

impl fmt::Display for RunSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunSource::Formula(name) => write!(f, "formula {}", name),
            RunSource::Function(kind) => write!(f, "function {}", kind),
        }
    }
}

/// Audit header of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Run {
    pub id: RunId,
    pub source: RunSource,
    pub preview: bool,
    pub started_at: DateTime<Utc>,
}

/// Audit line for one touched cell
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunEntry {
    pub run: RunId,
    /// Position within the run, starting at 0
    pub seq: u32,
    pub key: FactKey,
    /// Logical key name, e.g. `COST[OrgUnit=A,Period=P01]`
    pub key_name: String,
    pub old_value: Decimal,
    pub new_value: Decimal,
}

/// Storage for runs and their entries
pub trait RunLedger {
    /// Open a run
    fn begin_run(&mut self, source: RunSource, preview: bool) -> Result<RunId>;

    /// Append an entry to an open run
    fn record_entry(
        &mut self,
        run: RunId,
        key: FactKey,
        key_name: String,
        old_value: Decimal,
        new_value: Decimal,
    ) -> Result<()>;

    /// Remove a run and all of its entries (used when the run's unit of work fails)
    fn discard_run(&mut self, run: RunId) -> Result<()>;

    /// Look up a run header
    fn run(&self, id: RunId) -> Option<Run>;

    /// Entries of a run in recording order
    fn entries(&self, run: RunId) -> Vec<RunEntry>;
}

/// Ledger held in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    runs: BTreeMap<RunId, Run>,
    entries: BTreeMap<RunId, Vec<RunEntry>>,
    next_run: u64,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// All runs in id order
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    /// Number of recorded runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether no run was recorded
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl RunLedger for MemoryLedger {
    fn begin_run(&mut self, source: RunSource, preview: bool) -> Result<RunId> {
        self.next_run += 1;
        let id = RunId(self.next_run);
        self.runs.insert(
            id,
            Run {
                id,
                source,
                preview,
                started_at: Utc::now(),
            },
        );
        self.entries.insert(id, Vec::new());
        Ok(id)
    }

    fn record_entry(
        &mut self,
        run: RunId,
        key: FactKey,
        key_name: String,
        old_value: Decimal,
        new_value: Decimal,
    ) -> Result<()> {
        let entries = self
            .entries
            .get_mut(&run)
            .ok_or_else(|| Error::other(format!("unknown run {}", run)))?;
        let seq = u32::try_from(entries.len())
            .map_err(|_| Error::other(format!("run {} has too many entries", run)))?;
        entries.push(RunEntry {
            run,
            seq,
            key,
            key_name,
            old_value,
            new_value,
        });
        Ok(())
    }

    fn discard_run(&mut self, run: RunId) -> Result<()> {
        self.entries.remove(&run);
        self.runs
            .remove(&run)
            .map(|_| ())
            .ok_or_else(|| Error::other(format!("unknown run {}", run)))
    }

    fn run(&self, id: RunId) -> Option<Run> {
        self.runs.get(&id).cloned()
    }

    fn entries(&self, run: RunId) -> Vec<RunEntry> {
        self.entries.get(&run).cloned().unwrap_or_default()
    }
}
