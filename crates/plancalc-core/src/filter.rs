//! Fact selection: dimension filters, read scope and aggregate kinds

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::dimension::{DimId, Dimension};
use crate::fact::{CellKey, SessionId};

/// Dimension filter: every listed dimension must carry exactly the given value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct FactFilter(BTreeMap<Dimension, DimId>);

impl FactFilter {
    /// Filter matching everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style constraint
    pub fn with(mut self, dimension: Dimension, value: DimId) -> Self {
        self.insert(dimension, value);
        self
    }

    /// Add or replace a constraint
    pub fn insert(&mut self, dimension: Dimension, value: DimId) -> Option<DimId> {
        self.0.insert(dimension, value)
    }

    /// Constraint on a dimension
    pub fn get(&self, dimension: &Dimension) -> Option<DimId> {
        self.0.get(dimension).copied()
    }

    /// Whether a dimension is constrained
    pub fn constrains(&self, dimension: &Dimension) -> bool {
        self.0.contains_key(dimension)
    }

    /// Iterate constraints in dimension order
    pub fn iter(&self) -> impl Iterator<Item = (&Dimension, DimId)> {
        self.0.iter().map(|(d, v)| (d, *v))
    }

    /// Number of constraints
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no dimension is constrained
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay another filter; its constraints win
    pub fn merged(&self, overlay: &FactFilter) -> FactFilter {
        let mut merged = self.clone();
        for (dimension, value) in overlay.iter() {
            merged.insert(dimension.clone(), value);
        }
        merged
    }

    /// Whether a cell satisfies every constraint
    pub fn matches(&self, cell: &CellKey) -> bool {
        self.0
            .iter()
            .all(|(dimension, value)| cell.value_of(dimension) == Some(*value))
    }
}

impl FromIterator<(Dimension, DimId)> for FactFilter {
    fn from_iter<T: IntoIterator<Item = (Dimension, DimId)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read scope of a query
///
/// `period` applies only when the filter does not constrain `Period` itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scope {
    pub session: Option<SessionId>,
    pub period: Option<DimId>,
}

impl Scope {
    /// Scope covering the whole store
    pub fn unscoped() -> Self {
        Self::default()
    }

    /// Scope limited to one session
    pub fn session(session: SessionId) -> Self {
        Self {
            session: Some(session),
            period: None,
        }
    }

    /// Narrow the scope to a period
    pub fn with_period(mut self, period: Option<DimId>) -> Self {
        self.period = period;
        self
    }

    /// Whether a cell is inside the scope, given the filter it is read with
    pub fn contains(&self, cell: &CellKey, filter: &FactFilter) -> bool {
        if let Some(session) = self.session {
            if cell.session != session {
                return false;
            }
        }
        match self.period {
            Some(period) if !filter.constrains(&Dimension::Period) => cell.period == period,
            _ => true,
        }
    }
}

/// Aggregation applied to a set of fact values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "UPPERCASE")
)]
pub enum AggregateKind {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    /// Formula tag of this aggregation
    pub fn tag(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }

    /// Parse a tag case-insensitively
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "SUM" => Some(AggregateKind::Sum),
            "AVG" => Some(AggregateKind::Avg),
            "MIN" => Some(AggregateKind::Min),
            "MAX" => Some(AggregateKind::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AggregateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("unknown aggregate '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::ExtraDims;

    fn cell(org_unit: u32, period: u32) -> CellKey {
        CellKey {
            session: SessionId(1),
            version: DimId(1),
            year: DimId(1),
            period: DimId(period),
            org_unit: DimId(org_unit),
            service: None,
            account: None,
            key_figure: DimId(1),
            extra: ExtraDims::new(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let filter = FactFilter::new().with(Dimension::OrgUnit, DimId(2));
        assert!(filter.matches(&cell(2, 1)));
        assert!(!filter.matches(&cell(3, 1)));
        assert!(FactFilter::new().matches(&cell(3, 1)));
    }

    #[test]
    fn test_unset_optional_dimension_never_matches() {
        let filter = FactFilter::new().with(Dimension::Service, DimId(1));
        assert!(!filter.matches(&cell(1, 1)));
    }

    #[test]
    fn test_scope_period_yields_to_filter() {
        let scope = Scope::session(SessionId(1)).with_period(Some(DimId(1)));
        let empty = FactFilter::new();
        let by_period = FactFilter::new().with(Dimension::Period, DimId(2));

        assert!(scope.contains(&cell(1, 1), &empty));
        assert!(!scope.contains(&cell(1, 2), &empty));
        assert!(scope.contains(&cell(1, 2), &by_period));
    }

    #[test]
    fn test_aggregate_tags() {
        assert_eq!(AggregateKind::from_tag("sum"), Some(AggregateKind::Sum));
        assert_eq!("MAX".parse::<AggregateKind>(), Ok(AggregateKind::Max));
        assert!(AggregateKind::from_tag("COUNT").is_none());
    }
}
