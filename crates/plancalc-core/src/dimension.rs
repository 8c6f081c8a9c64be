//! Dimensions and their master lists
//!
//! A [`Dimension`] is one axis of classification for facts. The set of kinds is
//! closed: the built-in planning axes plus [`Dimension::Extra`] for user-defined
//! dimensions that live in a fact's extra-dimension map. Each registered dimension
//! owns a [`DimensionRepository`] holding its master list of [`DimensionValue`]s.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Numeric identifier of a dimension value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct DimId(pub u32);

impl fmt::Display for DimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DimId {
    fn from(id: u32) -> Self {
        DimId(id)
    }
}

/// A dimension kind
///
/// Ordering follows declaration order, so maps keyed by `Dimension` list the
/// built-in axes first and extra dimensions alphabetically after them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "String", from = "String")
)]
pub enum Dimension {
    OrgUnit,
    Service,
    Period,
    Year,
    Version,
    Account,
    KeyFigure,
    /// User-defined dimension stored in the fact's extra-dimension map
    Extra(String),
}

impl Dimension {
    /// All built-in dimension kinds
    pub const BUILTIN: [Dimension; 7] = [
        Dimension::OrgUnit,
        Dimension::Service,
        Dimension::Period,
        Dimension::Year,
        Dimension::Version,
        Dimension::Account,
        Dimension::KeyFigure,
    ];

    /// Parse a dimension name.
    ///
    /// Built-in names match case-insensitively and ignore `_`/`-`
    /// (`OrgUnit`, `org_unit`, `ORGUNIT`). Anything else is an extra dimension.
    pub fn parse(name: &str) -> Self {
        let folded: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "orgunit" | "org" | "organization" => Dimension::OrgUnit,
            "service" => Dimension::Service,
            "period" => Dimension::Period,
            "year" => Dimension::Year,
            "version" => Dimension::Version,
            "account" => Dimension::Account,
            "keyfigure" | "kf" => Dimension::KeyFigure,
            _ => Dimension::Extra(name.to_string()),
        }
    }

    /// Canonical display name
    pub fn name(&self) -> &str {
        match self {
            Dimension::OrgUnit => "OrgUnit",
            Dimension::Service => "Service",
            Dimension::Period => "Period",
            Dimension::Year => "Year",
            Dimension::Version => "Version",
            Dimension::Account => "Account",
            Dimension::KeyFigure => "KeyFigure",
            Dimension::Extra(name) => name,
        }
    }

    /// Whether this is a user-defined dimension
    pub fn is_extra(&self) -> bool {
        matches!(self, Dimension::Extra(_))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Self {
        Dimension::parse(&name)
    }
}

impl From<Dimension> for String {
    fn from(dimension: Dimension) -> Self {
        dimension.name().to_string()
    }
}

/// One entry of a dimension's master list
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DimensionValue {
    pub id: DimId,
    /// Short code used in formula text (e.g. `A`, `P01`, `COST`)
    pub code: String,
    /// Human readable label
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
}

impl DimensionValue {
    /// Create a new dimension value
    pub fn new(id: impl Into<DimId>, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            name: name.into(),
        }
    }
}

/// Master list of one dimension
#[derive(Debug, Clone)]
pub struct DimensionRepository {
    dimension: Dimension,
    values: BTreeMap<DimId, DimensionValue>,
    by_code: BTreeMap<String, DimId>,
}

impl DimensionRepository {
    /// Create an empty repository
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            values: BTreeMap::new(),
            by_code: BTreeMap::new(),
        }
    }

    /// The dimension this repository serves
    pub fn dimension(&self) -> &Dimension {
        &self.dimension
    }

    /// Add a value to the master list
    pub fn insert(&mut self, value: DimensionValue) -> Result<DimId> {
        if self.by_code.contains_key(&value.code) {
            return Err(Error::DuplicateDimensionValue {
                dimension: self.dimension.to_string(),
                code: value.code,
            });
        }
        let id = value.id;
        self.by_code.insert(value.code.clone(), id);
        self.values.insert(id, value);
        Ok(id)
    }

    /// Look up a value id by its code
    pub fn resolve_by_code(&self, code: &str) -> Result<DimId> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| Error::unknown_value(&self.dimension, code))
    }

    /// Look up a value by its id
    pub fn resolve_by_id(&self, id: DimId) -> Result<&DimensionValue> {
        self.values
            .get(&id)
            .ok_or_else(|| Error::unknown_value(&self.dimension, id.to_string()))
    }

    /// Resolve formula literal text: all-digit text is an id, anything else a code.
    ///
    /// Codes that happen to be numeric (e.g. year `2025`) win over ids.
    pub fn resolve_literal(&self, text: &str) -> Result<DimId> {
        if let Some(id) = self.by_code.get(text) {
            return Ok(*id);
        }
        match text.parse::<u32>() {
            Ok(n) => self.resolve_by_id(DimId(n)).map(|v| v.id),
            Err(_) => Err(Error::unknown_value(&self.dimension, text)),
        }
    }

    /// All value ids, ordered by code
    pub fn list_all(&self) -> Vec<DimId> {
        self.by_code.values().copied().collect()
    }

    /// Code for an id, if known
    pub fn code(&self, id: DimId) -> Option<&str> {
        self.values.get(&id).map(|v| v.code.as_str())
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the master list is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate values ordered by code
    pub fn values(&self) -> impl Iterator<Item = &DimensionValue> {
        self.by_code.values().filter_map(|id| self.values.get(id))
    }
}

/// Registry of all dimension repositories
///
/// Built once at startup and treated as read-only afterwards.
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    repositories: BTreeMap<Dimension, DimensionRepository>,
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionRegistry {
    /// Create a registry with an empty repository for every built-in dimension
    pub fn new() -> Self {
        let repositories = Dimension::BUILTIN
            .iter()
            .map(|d| (d.clone(), DimensionRepository::new(d.clone())))
            .collect();
        Self { repositories }
    }

    /// Register a user-defined dimension (no-op if already present)
    pub fn register_extra(&mut self, name: &str) -> &mut DimensionRepository {
        let dimension = Dimension::Extra(name.to_string());
        self.repositories
            .entry(dimension.clone())
            .or_insert_with(|| DimensionRepository::new(dimension))
    }

    /// Add a value to a dimension's master list
    ///
    /// Extra dimensions are registered on first use.
    pub fn add_value(&mut self, dimension: &Dimension, value: DimensionValue) -> Result<DimId> {
        match dimension {
            Dimension::Extra(name) => self.register_extra(name).insert(value),
            builtin => self
                .repositories
                .get_mut(builtin)
                .ok_or_else(|| Error::UnknownDimension(builtin.to_string()))?
                .insert(value),
        }
    }

    /// Resolve a dimension name against the registered dimensions
    pub fn dimension(&self, name: &str) -> Result<Dimension> {
        let dimension = Dimension::parse(name);
        if self.repositories.contains_key(&dimension) {
            Ok(dimension)
        } else {
            Err(Error::UnknownDimension(name.to_string()))
        }
    }

    /// Repository for a dimension
    pub fn repository(&self, dimension: &Dimension) -> Result<&DimensionRepository> {
        self.repositories
            .get(dimension)
            .ok_or_else(|| Error::UnknownDimension(dimension.to_string()))
    }

    /// Look up a value id by code
    pub fn resolve_by_code(&self, dimension: &Dimension, code: &str) -> Result<DimId> {
        self.repository(dimension)?.resolve_by_code(code)
    }

    /// Resolve a formula literal (code or numeric id)
    pub fn resolve_literal(&self, dimension: &Dimension, text: &str) -> Result<DimId> {
        self.repository(dimension)?.resolve_literal(text)
    }

    /// All value ids of a dimension, ordered by code
    pub fn list_all(&self, dimension: &Dimension) -> Result<Vec<DimId>> {
        Ok(self.repository(dimension)?.list_all())
    }

    /// Code of a value, falling back to the numeric id for unknown values
    pub fn code_or_id(&self, dimension: &Dimension, id: DimId) -> String {
        self.repositories
            .get(dimension)
            .and_then(|r| r.code(id))
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    /// Iterate registered dimensions
    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.repositories.keys()
    }
}
