//! Read-only master data a formula run works against
//!
//! A [`Catalog`] is assembled before a run and handed to it by value, so a run
//! depends only on the formula, the catalog and the fact store's state when the
//! run starts.

use std::collections::BTreeMap;

use plancalc_core::AggregateKind;
use rust_decimal::Decimal;

use crate::error::{FormulaError, FormulaResult};

/// Constants, sub-formulas, reference data sources and unit conversions
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Catalog {
    /// Bare uppercase symbols and their values
    pub constants: BTreeMap<String, Decimal>,
    /// `$NAME` bodies, as formula text
    pub sub_formulas: BTreeMap<String, String>,
    /// `REF('name', ...)` sources
    pub references: BTreeMap<String, ReferenceData>,
    pub conversions: UnitConversions,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn with_sub_formula(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.sub_formulas.insert(name.into(), body.into());
        self
    }

    pub fn with_reference(mut self, data: ReferenceData) -> Self {
        self.references.insert(data.name.clone(), data);
        self
    }

    pub fn with_conversion(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        factor: Decimal,
    ) -> Self {
        self.conversions.insert(from, to, factor);
        self
    }

    /// Value of a constant
    pub fn constant(&self, name: &str) -> FormulaResult<Decimal> {
        self.constants
            .get(name)
            .copied()
            .ok_or_else(|| FormulaError::UnknownConstant(name.to_string()))
    }

    /// Body of a sub-formula
    pub fn sub_formula(&self, name: &str) -> FormulaResult<&str> {
        self.sub_formulas
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FormulaError::UnknownSubFormula(name.to_string()))
    }

    /// Reference data source by name
    pub fn reference(&self, name: &str) -> FormulaResult<&ReferenceData> {
        self.references
            .get(name)
            .ok_or_else(|| FormulaError::UnknownReference(name.to_string()))
    }
}

/// A named reference data source: an aggregate over facts of one key figure
///
/// Dimension values are codes (or id text), resolved against the registry when
/// a `REF` is substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReferenceData {
    pub name: String,
    pub key_figure: String,
    #[cfg_attr(feature = "serde", serde(default = "default_kind"))]
    pub kind: AggregateKind,
    /// Version to read; a formula's reference version takes precedence
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: Option<String>,
    /// Year to read; a formula's reference year takes precedence
    #[cfg_attr(feature = "serde", serde(default))]
    pub year: Option<String>,
    /// Fixed dimension filter, dimension name to value
    #[cfg_attr(feature = "serde", serde(default))]
    pub filter: BTreeMap<String, String>,
}

#[cfg(feature = "serde")]
fn default_kind() -> AggregateKind {
    AggregateKind::Sum
}

impl ReferenceData {
    /// Sum of a key figure over the whole store
    pub fn new(name: impl Into<String>, key_figure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_figure: key_figure.into(),
            kind: AggregateKind::Sum,
            version: None,
            year: None,
            filter: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: AggregateKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_filter(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(dimension.into(), value.into());
        self
    }
}

/// Conversion factors between units, `from -> to -> factor`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct UnitConversions(BTreeMap<String, BTreeMap<String, Decimal>>);

impl UnitConversions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a factor
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>, factor: Decimal) {
        self.0.entry(from.into()).or_default().insert(to.into(), factor);
    }

    /// Factor converting `from` into `to`; `None` when not registered
    pub fn factor(&self, from: &str, to: &str) -> Option<Decimal> {
        self.0.get(from).and_then(|targets| targets.get(to)).copied()
    }

    /// All factors as `(from, to, factor)`, ordered by unit names
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, Decimal)> {
        self.0.iter().flat_map(|(from, targets)| {
            targets
                .iter()
                .map(move |(to, factor)| (from.as_str(), to.as_str(), *factor))
        })
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_catalog_lookups() {
        let catalog = Catalog::new()
            .with_constant("GROWTH", dec!(1.1))
            .with_sub_formula("BASE", "[COST] * GROWTH")
            .with_reference(ReferenceData::new("Budget", "COST").with_version("BUD"));

        assert_eq!(catalog.constant("GROWTH").unwrap(), dec!(1.1));
        assert_eq!(catalog.sub_formula("BASE").unwrap(), "[COST] * GROWTH");
        assert_eq!(
            catalog.reference("Budget").unwrap().version.as_deref(),
            Some("BUD")
        );

        assert!(matches!(
            catalog.constant("MISSING"),
            Err(FormulaError::UnknownConstant(name)) if name == "MISSING"
        ));
        assert!(matches!(
            catalog.sub_formula("MISSING"),
            Err(FormulaError::UnknownSubFormula(_))
        ));
        assert!(matches!(
            catalog.reference("Missing"),
            Err(FormulaError::UnknownReference(_))
        ));
    }

    #[test]
    fn test_unit_conversions() {
        let mut conversions = UnitConversions::new();
        conversions.insert("USD", "EUR", dec!(0.92));
        conversions.insert("GBP", "EUR", dec!(1.17));

        assert_eq!(conversions.factor("USD", "EUR"), Some(dec!(0.92)));
        assert_eq!(conversions.factor("EUR", "USD"), None);
        assert_eq!(conversions.len(), 2);
        assert_eq!(
            conversions.iter().map(|(from, _, _)| from).collect::<Vec<_>>(),
            vec!["GBP", "USD"]
        );
    }
}
