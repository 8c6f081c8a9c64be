//! The planning engine: a fact store, a run ledger and the master data runs read

use plancalc_core::{
    CellKey, DimId, Dimension, DimensionRegistry, ExtraDims, FactId, FactStore, FactValues,
    RunLedger, Session, SessionId,
};
use plancalc_formula::{check_sub_formulas, Catalog, FormulaError};

use crate::error::{Error, Result};
use crate::options::EngineOptions;

/// Runs formulas and planning functions against a store, auditing into a ledger
///
/// Formula runs live in [`crate::calculation`], planning functions in
/// [`crate::functions`].
pub struct Engine<S: FactStore, L: RunLedger> {
    pub(crate) store: S,
    pub(crate) ledger: L,
    pub(crate) registry: DimensionRegistry,
    pub(crate) catalog: Catalog,
    pub(crate) options: EngineOptions,
}

impl<S: FactStore, L: RunLedger> Engine<S, L> {
    /// Create an engine with an empty catalog and default options
    pub fn new(store: S, ledger: L, registry: DimensionRegistry) -> Self {
        Self {
            store,
            ledger,
            registry,
            catalog: Catalog::new(),
            options: EngineOptions::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the catalog used by later runs
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn registry(&self) -> &DimensionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Check every sub-formula in the catalog before any formula uses it
    ///
    /// Reports unparsable bodies, names no body defines and cycles between
    /// sub-formulas.
    pub fn check_catalog(&self) -> Result<()> {
        check_sub_formulas(&self.catalog)?;
        Ok(())
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Take the store and ledger back
    pub fn into_parts(self) -> (S, L) {
        (self.store, self.ledger)
    }

    // === Loading data ===

    /// Resolve a dimension literal (code, or id text)
    pub fn resolve(&self, dimension: &Dimension, literal: &str) -> Result<DimId> {
        Ok(self
            .registry
            .resolve_literal(dimension, literal)
            .map_err(FormulaError::from)?)
    }

    /// Create a session from version and year codes
    pub fn create_session(
        &mut self,
        name: &str,
        version: &str,
        year: &str,
        org_unit: Option<&str>,
    ) -> Result<Session> {
        let version = self.resolve(&Dimension::Version, version)?;
        let year = self.resolve(&Dimension::Year, year)?;
        let org_unit = org_unit
            .map(|code| self.resolve(&Dimension::OrgUnit, code))
            .transpose()?;
        Ok(self.store.create_session(name, version, year, org_unit)?)
    }

    /// Build a cell of a session from dimension codes
    ///
    /// Version and year come from the session. Period is required; the org
    /// unit falls back to the session's default.
    pub fn cell<'a>(
        &self,
        session: SessionId,
        key_figure: &str,
        dimensions: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<CellKey> {
        let session = self.store.session(session)?;

        let mut period = None;
        let mut org_unit = session.org_unit;
        let mut service = None;
        let mut account = None;
        let mut extra = ExtraDims::new();
        for (name, literal) in dimensions {
            let dimension = self
                .registry
                .dimension(name)
                .map_err(FormulaError::from)?;
            let id = self.resolve(&dimension, literal)?;
            match dimension {
                Dimension::Period => period = Some(id),
                Dimension::OrgUnit => org_unit = Some(id),
                Dimension::Service => service = Some(id),
                Dimension::Account => account = Some(id),
                Dimension::Extra(name) => {
                    extra.insert(name, id);
                }
                Dimension::Version | Dimension::Year | Dimension::KeyFigure => {
                    return Err(Error::invalid_request(format!(
                        "{} is fixed by the session and key figure",
                        dimension
                    )))
                }
            }
        }

        Ok(CellKey {
            session: session.id,
            version: session.version,
            year: session.year,
            period: period.ok_or_else(|| Error::invalid_request("a cell needs a Period"))?,
            org_unit: org_unit.ok_or_else(|| Error::invalid_request("a cell needs an OrgUnit"))?,
            service,
            account,
            key_figure: self.resolve(&Dimension::KeyFigure, key_figure)?,
            extra,
        })
    }

    /// Write a fact into the session's current batch, outside any run
    pub fn load_fact(&mut self, cell: CellKey, values: FactValues) -> Result<FactId> {
        let batch = self.store.ensure_batch(cell.session)?;
        Ok(self.store.put(cell.in_batch(batch.id), values)?)
    }
}
