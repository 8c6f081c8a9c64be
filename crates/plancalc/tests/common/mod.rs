//! Shared fixture: a small planning model in memory

#![allow(dead_code)]

use plancalc::prelude::*;
use plancalc::Fact;
use rust_decimal::Decimal;

pub struct Model {
    pub engine: Engine<MemoryFactStore, MemoryLedger>,
    pub plan: SessionId,
    pub actual: SessionId,
}

/// Versions ACT/PLAN/FCST, year 2025, periods P01/P02, the given org units
/// (ids in list order) and key figures REVENUE/COST/BUDGET
pub fn model(org_units: &[&str]) -> Model {
    let mut registry = DimensionRegistry::new();
    let mut add = |dimension: Dimension, id: u32, code: &str| {
        registry
            .add_value(&dimension, DimensionValue::new(id, code, code))
            .unwrap();
    };
    add(Dimension::Version, 1, "ACT");
    add(Dimension::Version, 2, "PLAN");
    add(Dimension::Version, 3, "FCST");
    add(Dimension::Year, 2025, "2025");
    add(Dimension::Period, 1, "P01");
    add(Dimension::Period, 2, "P02");
    for (i, code) in org_units.iter().enumerate() {
        add(Dimension::OrgUnit, i as u32 + 1, code);
    }
    add(Dimension::KeyFigure, 1, "REVENUE");
    add(Dimension::KeyFigure, 2, "COST");
    add(Dimension::KeyFigure, 3, "BUDGET");

    let mut engine = Engine::new(MemoryFactStore::new(), MemoryLedger::new(), registry);
    let plan = engine.create_session("plan", "PLAN", "2025", None).unwrap().id;
    let actual = engine.create_session("actuals", "ACT", "2025", None).unwrap().id;
    Model {
        engine,
        plan,
        actual,
    }
}

impl Model {
    pub fn load(
        &mut self,
        session: SessionId,
        key_figure: &str,
        period: &str,
        org_unit: &str,
        values: FactValues,
    ) {
        let cell = self
            .engine
            .cell(session, key_figure, [("Period", period), ("OrgUnit", org_unit)])
            .unwrap();
        self.engine.load_fact(cell, values).unwrap();
    }

    /// Current fact of a cell, if any
    pub fn fact(
        &self,
        session: SessionId,
        key_figure: &str,
        period: &str,
        org_unit: &str,
    ) -> Option<Fact> {
        let cell = self
            .engine
            .cell(session, key_figure, [("Period", period), ("OrgUnit", org_unit)])
            .unwrap();
        self.engine
            .store()
            .select_current(&Default::default(), &Scope::session(session))
            .unwrap()
            .into_iter()
            .find(|fact| fact.key.cell == cell)
    }

    pub fn value(&self, session: SessionId, key_figure: &str, period: &str, org_unit: &str) -> Decimal {
        self.fact(session, key_figure, period, org_unit)
            .map(|fact| fact.value)
            .unwrap_or(Decimal::ZERO)
    }
}
