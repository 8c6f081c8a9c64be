//! JSON workbooks: master data, sessions, facts, catalog and formulas in one file

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use plancalc::{
    Catalog, Dimension, DimensionRegistry, DimensionValue, Engine, EngineOptions, FactValues,
    Formula, MemoryFactStore, MemoryLedger, SessionId,
};
use serde::Deserialize;

/// A planning model as stored on disk
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Workbook {
    /// Master lists by dimension name; unknown names become extra dimensions
    pub dimensions: BTreeMap<String, Vec<DimensionValue>>,
    pub sessions: Vec<SessionSpec>,
    pub facts: Vec<FactSpec>,
    pub catalog: Catalog,
    pub formulas: Vec<Formula>,
    pub options: EngineOptions,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSpec {
    pub name: String,
    pub version: String,
    pub year: String,
    #[serde(default)]
    pub org_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FactSpec {
    /// Session name
    pub session: String,
    pub key_figure: String,
    /// Dimension name to code; version and year come from the session
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    #[serde(flatten)]
    pub values: FactValues,
}

/// A workbook loaded into an engine
pub struct Loaded {
    pub engine: Engine<MemoryFactStore, MemoryLedger>,
    pub formulas: Vec<Formula>,
    sessions: BTreeMap<String, SessionId>,
}

impl Loaded {
    /// Find a session by name, or by numeric id
    pub fn session(&self, selector: &str) -> Result<SessionId> {
        if let Some(id) = self.sessions.get(selector) {
            return Ok(*id);
        }
        match selector.parse::<u64>() {
            Ok(id) if self.sessions.values().any(|s| s.0 == id) => Ok(SessionId(id)),
            _ => bail!("no session named '{}'", selector),
        }
    }

    pub fn formula(&self, name: &str) -> Result<&Formula> {
        self.formulas
            .iter()
            .find(|f| f.name == name)
            .with_context(|| format!("no formula named '{}'", name))
    }
}

impl Workbook {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse workbook '{}'", path.display()))
    }

    /// Build the registry, sessions and facts
    pub fn into_engine(self) -> Result<Loaded> {
        let mut registry = DimensionRegistry::new();
        for (name, values) in &self.dimensions {
            let dimension = Dimension::parse(name);
            for value in values {
                registry
                    .add_value(&dimension, value.clone())
                    .with_context(|| format!("Invalid {} value '{}'", dimension, value.code))?;
            }
        }

        self.options.validate().context("Invalid options")?;
        let mut engine = Engine::new(MemoryFactStore::new(), MemoryLedger::new(), registry)
            .with_catalog(self.catalog)
            .with_options(self.options);
        engine.check_catalog().context("Invalid catalog")?;

        let mut sessions = BTreeMap::new();
        for spec in &self.sessions {
            if sessions.contains_key(&spec.name) {
                bail!("session '{}' is defined twice", spec.name);
            }
            let session = engine
                .create_session(&spec.name, &spec.version, &spec.year, spec.org_unit.as_deref())
                .with_context(|| format!("Invalid session '{}'", spec.name))?;
            sessions.insert(spec.name.clone(), session.id);
        }

        for (i, fact) in self.facts.into_iter().enumerate() {
            let session = *sessions
                .get(&fact.session)
                .with_context(|| format!("fact #{} names unknown session '{}'", i, fact.session))?;
            let cell = engine
                .cell(
                    session,
                    &fact.key_figure,
                    fact.dimensions.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                )
                .with_context(|| format!("Invalid fact #{}", i))?;
            engine
                .load_fact(cell, fact.values)
                .with_context(|| format!("Failed to load fact #{}", i))?;
        }

        tracing::info!(
            sessions = sessions.len(),
            facts = engine.store().len(),
            formulas = self.formulas.len(),
            "workbook loaded"
        );
        Ok(Loaded {
            engine,
            formulas: self.formulas,
            sessions,
        })
    }
}
