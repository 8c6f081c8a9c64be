//! Planning functions: parameterized bulk operations on raw fact rows
//!
//! Unlike formulas these never go through the evaluator. Each call runs in one
//! unit of work and one ledger run. Rows that fail individually (arithmetic
//! overflow) are reported in [`FunctionOutcome::errors`] while the rows that
//! succeeded commit together.

mod convert;
mod copy;
mod distribute;
mod repost;
mod reset;

use std::collections::BTreeMap;
use std::fmt;

use plancalc_core::{
    CellKey, DimId, Dimension, DimensionRegistry, FactFilter, FactKey, FactStore, RunId,
    RunLedger, RunSource, Session, SessionId, UnitOfWork,
};
use plancalc_formula::{Catalog, FormulaError};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::naming::cell_name;

/// A planning function request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum PlanningFunction {
    /// Clone the session's facts into another version
    Copy {
        to_version: String,
        year: String,
        #[cfg_attr(feature = "serde", serde(default))]
        period: Option<String>,
    },
    /// Rescale facts so each group sums to a reference total
    Distribute {
        #[cfg_attr(feature = "serde", serde(default))]
        group_by: Vec<String>,
        reference: String,
    },
    /// Convert amounts into another unit
    Convert { target_unit: String },
    /// Clone the latest batch into a new one
    Repost,
    /// Zero every fact matching a filter (dimension name to code)
    ResetSlice {
        #[cfg_attr(feature = "serde", serde(default))]
        filter: BTreeMap<String, String>,
    },
}

impl PlanningFunction {
    /// Build a function from its kind and a parameter map
    ///
    /// `reset_slice` takes every parameter as a dimension filter; the other
    /// kinds reject parameters they do not know.
    pub fn from_request(kind: &str, params: &BTreeMap<String, String>) -> Result<Self> {
        let kind = kind.to_ascii_lowercase();
        let allowed: &[&str] = match kind.as_str() {
            "copy" => &["to_version", "year", "period"],
            "distribute" => &["group_by", "reference"],
            "convert" => &["target_unit"],
            "repost" => &[],
            "reset_slice" | "resetslice" => {
                return Ok(PlanningFunction::ResetSlice {
                    filter: params.clone(),
                })
            }
            other => {
                return Err(Error::invalid_request(format!(
                    "unknown planning function '{}'",
                    other
                )))
            }
        };
        if let Some(unknown) = params.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(Error::invalid_request(format!(
                "{} does not take a '{}' parameter",
                kind, unknown
            )));
        }

        let required = |name: &str| -> Result<String> {
            params
                .get(name)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| Error::invalid_request(format!("{} needs '{}'", kind, name)))
        };

        Ok(match kind.as_str() {
            "copy" => PlanningFunction::Copy {
                to_version: required("to_version")?,
                year: required("year")?,
                period: params.get("period").cloned(),
            },
            "distribute" => PlanningFunction::Distribute {
                group_by: params
                    .get("group_by")
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|name| !name.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
                reference: required("reference")?,
            },
            "convert" => PlanningFunction::Convert {
                target_unit: required("target_unit")?,
            },
            _ => PlanningFunction::Repost,
        })
    }

    /// Name the ledger records runs under
    pub fn kind(&self) -> &'static str {
        match self {
            PlanningFunction::Copy { .. } => "copy",
            PlanningFunction::Distribute { .. } => "distribute",
            PlanningFunction::Convert { .. } => "convert",
            PlanningFunction::Repost => "repost",
            PlanningFunction::ResetSlice { .. } => "reset_slice",
        }
    }
}

impl fmt::Display for PlanningFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// One row a planning function could not process
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RowError {
    pub key_name: String,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key_name, self.message)
    }
}

/// Result of a planning function call
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionOutcome {
    /// Rows written
    pub affected: usize,
    /// Rows skipped because of a per-row failure
    pub errors: Vec<RowError>,
    /// Ledger run holding one entry per written row
    pub run: RunId,
}

/// State shared by the planning functions during one call
pub(crate) struct FunctionContext<'a, S: FactStore, L: RunLedger> {
    pub store: &'a mut S,
    pub ledger: &'a mut L,
    pub registry: &'a DimensionRegistry,
    pub catalog: &'a Catalog,
    pub scale: u32,
    pub session: Session,
    pub run: RunId,
    pub errors: Vec<RowError>,
}

impl<S: FactStore, L: RunLedger> FunctionContext<'_, S, L> {
    pub fn resolve(&self, dimension: &Dimension, literal: &str) -> Result<DimId> {
        Ok(self
            .registry
            .resolve_literal(dimension, literal)
            .map_err(FormulaError::from)?)
    }

    pub fn dimension(&self, name: &str) -> Result<Dimension> {
        Ok(self.registry.dimension(name).map_err(FormulaError::from)?)
    }

    /// Resolve a name-to-code map into a fact filter
    pub fn filter(&self, literals: &BTreeMap<String, String>) -> Result<FactFilter> {
        let mut filter = FactFilter::new();
        for (name, literal) in literals {
            let dimension = self.dimension(name)?;
            let id = self.resolve(&dimension, literal)?;
            filter.insert(dimension, id);
        }
        Ok(filter)
    }

    /// Ledger entry for a written row
    pub fn record(&mut self, key: FactKey, old: Decimal, new: Decimal) -> Result<()> {
        let name = cell_name(self.registry, &key.cell);
        tracing::debug!(key = %name, %old, %new, "row written");
        self.ledger.record_entry(self.run, key, name, old, new)?;
        Ok(())
    }

    /// Note a row that could not be processed
    pub fn row_error(&mut self, cell: &CellKey, message: impl Into<String>) {
        let error = RowError {
            key_name: cell_name(self.registry, cell),
            message: message.into(),
        };
        warn!(function_row = %error, "row skipped");
        self.errors.push(error);
    }
}

impl<S: FactStore, L: RunLedger> Engine<S, L> {
    /// Run a planning function on a session inside one unit of work
    pub fn run_function(
        &mut self,
        function: &PlanningFunction,
        session: SessionId,
    ) -> Result<FunctionOutcome> {
        self.options.validate()?;
        let session = self.store.session(session)?;
        info!(function = %function, session = %session.id, "running planning function");

        let run = self
            .ledger
            .begin_run(RunSource::Function(function.kind().to_string()), false)?;
        match self.execute_function(function, session, run) {
            Ok((affected, errors)) => {
                info!(
                    function = %function,
                    run = %run,
                    affected,
                    errors = errors.len(),
                    "planning function complete"
                );
                Ok(FunctionOutcome {
                    affected,
                    errors,
                    run,
                })
            }
            Err(e) => {
                warn!(function = %function, error = %e, "planning function failed");
                if let Err(discard) = self.ledger.discard_run(run) {
                    warn!(run = %run, error = %discard, "could not discard failed run");
                }
                Err(e)
            }
        }
    }

    fn execute_function(
        &mut self,
        function: &PlanningFunction,
        session: Session,
        run: RunId,
    ) -> Result<(usize, Vec<RowError>)> {
        let catalog = self.catalog.clone();
        let mut unit = UnitOfWork::begin(&mut self.store)?;
        let mut ctx = FunctionContext {
            store: &mut *unit,
            ledger: &mut self.ledger,
            registry: &self.registry,
            catalog: &catalog,
            scale: self.options.scale,
            session,
            run,
            errors: Vec::new(),
        };

        let affected = match function {
            PlanningFunction::Copy {
                to_version,
                year,
                period,
            } => copy::copy(&mut ctx, to_version, year, period.as_deref())?,
            PlanningFunction::Distribute {
                group_by,
                reference,
            } => distribute::distribute(&mut ctx, group_by, reference)?,
            PlanningFunction::Convert { target_unit } => convert::convert(&mut ctx, target_unit)?,
            PlanningFunction::Repost => repost::repost(&mut ctx)?,
            PlanningFunction::ResetSlice { filter } => reset::reset_slice(&mut ctx, filter)?,
        };

        let errors = ctx.errors;
        unit.commit()?;
        Ok((affected, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_request() {
        assert_eq!(
            PlanningFunction::from_request(
                "Copy",
                &params(&[("to_version", "FCST"), ("year", "2025")])
            )
            .unwrap(),
            PlanningFunction::Copy {
                to_version: "FCST".into(),
                year: "2025".into(),
                period: None,
            }
        );
        assert_eq!(
            PlanningFunction::from_request(
                "distribute",
                &params(&[("group_by", "OrgUnit, Period"), ("reference", "Budget")])
            )
            .unwrap(),
            PlanningFunction::Distribute {
                group_by: vec!["OrgUnit".into(), "Period".into()],
                reference: "Budget".into(),
            }
        );
        assert_eq!(
            PlanningFunction::from_request("reset_slice", &params(&[("OrgUnit", "A")]))
                .unwrap()
                .kind(),
            "reset_slice"
        );
    }

    #[test]
    fn test_from_request_rejects_bad_input() {
        assert!(matches!(
            PlanningFunction::from_request("delete_all", &BTreeMap::new()),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            PlanningFunction::from_request("convert", &BTreeMap::new()),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            PlanningFunction::from_request("repost", &params(&[("force", "yes")])),
            Err(Error::InvalidRequest(_))
        ));
    }
}
