//! Facts, sessions and batches
//!
//! A [`Fact`] is one numeric cell. Its [`FactKey`] is the batch plus the
//! [`CellKey`], the logical coordinate made of every dimension value. The store
//! keeps at most one fact per full key.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::dimension::{DimId, Dimension};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(
            feature = "serde",
            derive(serde::Serialize, serde::Deserialize),
            serde(transparent)
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Store-assigned fact identifier
    FactId
);
id_type!(
    /// Planning session identifier
    SessionId
);
id_type!(
    /// Batch ("data request") identifier
    BatchId
);

/// Extra-dimension map of a fact
///
/// An ordered map, so equality, ordering and hashing depend only on content and
/// never on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct ExtraDims(BTreeMap<String, DimId>);

impl ExtraDims {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, name: impl Into<String>, value: DimId) -> Option<DimId> {
        self.0.insert(name.into(), value)
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: DimId) -> Self {
        self.insert(name, value);
        self
    }

    /// Value of an extra dimension
    pub fn get(&self, name: &str) -> Option<DimId> {
        self.0.get(name).copied()
    }

    /// Iterate entries ordered by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, DimId)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, DimId)> for ExtraDims {
    fn from_iter<T: IntoIterator<Item = (S, DimId)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Logical coordinate of a fact: every dimension value, without the batch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    pub session: SessionId,
    pub version: DimId,
    pub year: DimId,
    pub period: DimId,
    pub org_unit: DimId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub service: Option<DimId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub account: Option<DimId>,
    pub key_figure: DimId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub extra: ExtraDims,
}

impl CellKey {
    /// Value of a dimension on this cell (`None` when the optional slot is empty)
    pub fn value_of(&self, dimension: &Dimension) -> Option<DimId> {
        match dimension {
            Dimension::OrgUnit => Some(self.org_unit),
            Dimension::Service => self.service,
            Dimension::Period => Some(self.period),
            Dimension::Year => Some(self.year),
            Dimension::Version => Some(self.version),
            Dimension::Account => self.account,
            Dimension::KeyFigure => Some(self.key_figure),
            Dimension::Extra(name) => self.extra.get(name),
        }
    }

    /// Set a dimension value on this cell
    pub fn set(&mut self, dimension: &Dimension, value: DimId) {
        match dimension {
            Dimension::OrgUnit => self.org_unit = value,
            Dimension::Service => self.service = Some(value),
            Dimension::Period => self.period = value,
            Dimension::Year => self.year = value,
            Dimension::Version => self.version = value,
            Dimension::Account => self.account = Some(value),
            Dimension::KeyFigure => self.key_figure = value,
            Dimension::Extra(name) => {
                self.extra.insert(name.clone(), value);
            }
        }
    }

    /// Attach the cell to a batch
    pub fn in_batch(self, batch: BatchId) -> FactKey {
        FactKey { batch, cell: self }
    }
}

/// Full composite key of a fact
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactKey {
    pub batch: BatchId,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub cell: CellKey,
}

impl FactKey {
    /// Session the fact belongs to
    pub fn session(&self) -> SessionId {
        self.cell.session
    }
}

/// Values written alongside a key when a fact is created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactValues {
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Decimal,
    #[cfg_attr(feature = "serde", serde(default))]
    pub ref_value: Decimal,
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub ref_unit: Option<String>,
}

impl FactValues {
    /// Values with a primary amount only
    pub fn amount(value: Decimal) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Set the unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the reference value
    pub fn with_ref_value(mut self, ref_value: Decimal) -> Self {
        self.ref_value = ref_value;
        self
    }
}

/// One numeric cell
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fact {
    pub id: FactId,
    pub key: FactKey,
    pub value: Decimal,
    /// Secondary value for comparison/variance use cases
    pub ref_value: Decimal,
    pub unit: Option<String>,
    pub ref_unit: Option<String>,
}

impl Fact {
    /// Create a fact from a key and initial values
    pub fn new(id: FactId, key: FactKey, values: FactValues) -> Self {
        Self {
            id,
            key,
            value: values.value,
            ref_value: values.ref_value,
            unit: values.unit,
            ref_unit: values.ref_unit,
        }
    }

    /// Current values, detached from the key
    pub fn values(&self) -> FactValues {
        FactValues {
            value: self.value,
            ref_value: self.ref_value,
            unit: self.unit.clone(),
            ref_unit: self.ref_unit.clone(),
        }
    }

    /// Overwrite all values
    pub fn assign(&mut self, values: FactValues) {
        self.value = values.value;
        self.ref_value = values.ref_value;
        self.unit = values.unit;
        self.ref_unit = values.ref_unit;
    }
}

/// A planning session: the version/year context writes land in
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Session {
    pub id: SessionId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    pub version: DimId,
    pub year: DimId,
    /// Default org unit for targets that do not name one
    #[cfg_attr(feature = "serde", serde(default))]
    pub org_unit: Option<DimId>,
}

/// Write-semantics tag of a batch
///
/// Documents how the batch's writes relate to prior data; the store does not
/// enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ActionType {
    Delta,
    Overwrite,
    ResetToZero,
    FinalSummary,
}

impl Default for ActionType {
    fn default() -> Self {
        ActionType::Delta
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Delta => "delta",
            ActionType::Overwrite => "overwrite",
            ActionType::ResetToZero => "reset_to_zero",
            ActionType::FinalSummary => "final_summary",
        };
        f.write_str(s)
    }
}

/// A named grouping of fact writes within a session
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Batch {
    pub id: BatchId,
    pub session: SessionId,
    pub action: ActionType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn cell(extra: ExtraDims) -> CellKey {
        CellKey {
            session: SessionId(1),
            version: DimId(1),
            year: DimId(1),
            period: DimId(1),
            org_unit: DimId(1),
            service: None,
            account: None,
            key_figure: DimId(1),
            extra,
        }
    }

    #[test]
    fn test_value_of_and_set() {
        let mut key = cell(ExtraDims::new());
        assert_eq!(key.value_of(&Dimension::Service), None);
        key.set(&Dimension::Service, DimId(7));
        key.set(&Dimension::Extra("Channel".into()), DimId(3));
        assert_eq!(key.value_of(&Dimension::Service), Some(DimId(7)));
        assert_eq!(
            key.value_of(&Dimension::Extra("Channel".into())),
            Some(DimId(3))
        );
        assert_eq!(key.value_of(&Dimension::Extra("Other".into())), None);
    }

    proptest! {
        #[test]
        fn extra_dims_ignore_insertion_order(
            entries in prop::collection::btree_map("[a-z]{1,6}", 0u32..50, 0..8)
        ) {
            let forward: ExtraDims = entries.iter().map(|(k, v)| (k.clone(), DimId(*v))).collect();
            let backward: ExtraDims = entries.iter().rev().map(|(k, v)| (k.clone(), DimId(*v))).collect();

            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(hash_of(&forward), hash_of(&backward));
            prop_assert_eq!(cell(forward), cell(backward));
        }
    }
}
