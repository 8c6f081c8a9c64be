//! End-to-end formula runs against the in-memory store and ledger

mod common;

use common::model;
use plancalc::prelude::*;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

const GROWTH: &str =
    "[OrgUnit=$LOOP]?.[COST] = [OrgUnit=$LOOP]?.[REVENUE] * (1 + GROWTH_RATE)";

fn growth_model() -> common::Model {
    let mut m = model(&["A"]);
    m.engine
        .set_catalog(Catalog::new().with_constant("GROWTH_RATE", dec!(0.10)));
    let plan = m.plan;
    m.load(plan, "REVENUE", "P01", "A", FactValues::amount(dec!(1000.00)));
    m
}

fn growth_formula() -> Formula {
    Formula::new("cost_from_revenue", GROWTH).looping(["OrgUnit"])
}

#[test]
fn test_growth_writes_cost() {
    let mut m = growth_model();
    let request = RunRequest::new(m.plan).with_period("P01");
    let report = m.engine.run_formula(&growth_formula(), &request).unwrap();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.key_name, "COST[OrgUnit=A]");
    assert_eq!(entry.old_value, dec!(0));
    assert_eq!(entry.new_value.to_string(), "1100.0000");
    assert!(!report.run.preview);

    assert_eq!(m.value(m.plan, "COST", "P01", "A").to_string(), "1100.0000");
}

#[test]
fn test_preview_records_without_writing() {
    let mut committed = growth_model();
    let request = RunRequest::new(committed.plan).with_period("P01");
    let expected = committed
        .engine
        .run_formula(&growth_formula(), &request)
        .unwrap();

    let mut m = growth_model();
    let facts_before = m.engine.store().len();
    let report = m
        .engine
        .run_formula(&growth_formula(), &request.clone().preview(true))
        .unwrap();

    assert!(report.run.preview);
    assert_eq!(report.entries, expected.entries);
    assert_eq!(m.engine.store().len(), facts_before);
    assert!(m.fact(m.plan, "COST", "P01", "A").is_none());
}

#[test]
fn test_sum_without_org_unit_filter() {
    let mut m = model(&["A", "B", "C"]);
    let plan = m.plan;
    for (org_unit, value) in [("A", dec!(10)), ("B", dec!(20)), ("C", dec!(30))] {
        m.load(plan, "COST", "P01", org_unit, FactValues::amount(value));
    }

    let formula = Formula::new("total", "[OrgUnit=A].[BUDGET] = SUM:COST");
    let report = m
        .engine
        .run_formula(&formula, &RunRequest::new(plan).with_period("P01"))
        .unwrap();
    assert_eq!(report.entries[0].new_value, dec!(60));
}

#[test]
fn test_cyclic_sub_formulas_fail_before_writing() {
    let mut m = model(&["A"]);
    m.engine.set_catalog(
        Catalog::new()
            .with_sub_formula("A", "$B")
            .with_sub_formula("B", "$A"),
    );
    let plan = m.plan;
    m.load(plan, "COST", "P01", "A", FactValues::amount(dec!(5)));

    let formula = Formula::new("loop", "[OrgUnit=A].[COST] = $A + 1");
    let err = m
        .engine
        .run_formula(&formula, &RunRequest::new(plan).with_period("P01"))
        .unwrap_err();

    match err {
        Error::Formula(FormulaError::CyclicExpansion { chain }) => {
            assert_eq!(chain, vec!["A", "B", "A"]);
        }
        other => panic!("expected a cyclic expansion error, got {other}"),
    }
    assert!(m.engine.ledger().is_empty());
    assert_eq!(m.value(plan, "COST", "P01", "A"), dec!(5));
}

#[test]
fn test_catalog_check_finds_cycles_no_formula_uses() {
    let mut m = model(&["A"]);
    m.engine.set_catalog(
        Catalog::new()
            .with_sub_formula("BASE", "[REVENUE] * 2")
            .with_sub_formula("X", "$Y")
            .with_sub_formula("Y", "$X"),
    );

    match m.engine.check_catalog() {
        Err(Error::Formula(FormulaError::CyclicExpansion { chain })) => {
            assert_eq!(chain, vec!["X", "Y", "X"]);
        }
        other => panic!("expected a cyclic expansion error, got {other:?}"),
    }
    // Formulas that stay clear of the cycle still compile
    let formula = Formula::new("base", "[OrgUnit=A].[COST] = $BASE");
    assert!(m.engine.compile(&formula).is_ok());

    m.engine
        .set_catalog(Catalog::new().with_sub_formula("BASE", "[REVENUE] * 2"));
    assert!(m.engine.check_catalog().is_ok());
}

#[test]
fn test_runs_are_deterministic() {
    let run = || {
        let mut m = model(&["C", "A", "B"]);
        let plan = m.plan;
        for (org_unit, value) in [("A", dec!(1)), ("B", dec!(2)), ("C", dec!(3))] {
            m.load(plan, "REVENUE", "P01", org_unit, FactValues::amount(value));
            m.load(plan, "REVENUE", "P02", org_unit, FactValues::amount(value * dec!(10)));
        }
        let formula = Formula::new(
            "half",
            "[OrgUnit=$LOOP,Period=$LOOP].[COST] = [OrgUnit=$LOOP,Period=$LOOP].[REVENUE] / 2",
        )
        .looping(["Period", "OrgUnit"]);
        m.engine
            .run_formula(&formula, &RunRequest::new(plan))
            .unwrap()
            .entries
    };

    let first = run();
    assert_eq!(first, run());

    let names: Vec<&str> = first.iter().map(|e| e.key_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "COST[OrgUnit=A,Period=P01]",
            "COST[OrgUnit=B,Period=P01]",
            "COST[OrgUnit=C,Period=P01]",
            "COST[OrgUnit=A,Period=P02]",
            "COST[OrgUnit=B,Period=P02]",
            "COST[OrgUnit=C,Period=P02]",
        ]
    );
    assert_eq!(first[5].new_value, dec!(15));
}

#[test]
fn test_failed_combination_rolls_back_the_run() {
    let mut m = model(&["A", "B"]);
    let plan = m.plan;
    m.load(plan, "REVENUE", "P01", "A", FactValues::amount(dec!(4)));

    let formula = Formula::new("ratio", "[OrgUnit=$LOOP].[COST] = 100 / [OrgUnit=$LOOP].[REVENUE]")
        .looping(["OrgUnit"]);
    let err = m
        .engine
        .run_formula(&formula, &RunRequest::new(plan).with_period("P01"))
        .unwrap_err();

    assert!(matches!(err, Error::Formula(FormulaError::Evaluation(_))));
    assert!(m.fact(plan, "COST", "P01", "A").is_none());
    assert!(m.engine.ledger().is_empty());
    assert!(!m.engine.store().in_unit());
}

#[test]
fn test_reference_data_from_actuals() {
    let mut m = model(&["A", "B"]);
    let (plan, actual) = (m.plan, m.actual);
    m.load(actual, "COST", "P01", "A", FactValues::amount(dec!(300)));
    m.load(actual, "COST", "P02", "A", FactValues::amount(dec!(500)));
    m.engine.set_catalog(
        Catalog::new()
            .with_constant("UPLIFT", dec!(1.5))
            .with_reference(ReferenceData::new("ActualCost", "COST").with_version("ACT"))
            .with_sub_formula("BASE", "REF('ActualCost', OrgUnit=$LOOP)"),
    );

    let formula = Formula::new("uplift", "[OrgUnit=$LOOP].[COST] = $BASE * UPLIFT")
        .looping(["OrgUnit"]);
    let report = m
        .engine
        .run_formula(&formula, &RunRequest::new(plan).with_period("P01"))
        .unwrap();

    assert_eq!(report.entries[0].new_value, dec!(1200));
    assert_eq!(report.entries[1].new_value, dec!(0));
}

#[test]
fn test_if_and_case() {
    let mut m = model(&["A", "B"]);
    let plan = m.plan;
    m.load(plan, "REVENUE", "P01", "A", FactValues::amount(dec!(50)));
    m.load(plan, "REVENUE", "P01", "B", FactValues::amount(dec!(500)));

    let formula = Formula::new(
        "tiered",
        "[OrgUnit=$LOOP].[COST] = CASE WHEN [OrgUnit=$LOOP].[REVENUE] > 100 THEN 2 \
         ELSE IF([OrgUnit=$LOOP].[REVENUE] = 50, 1, 0) END",
    )
    .looping(["OrgUnit"]);
    let report = m
        .engine
        .run_formula(&formula, &RunRequest::new(plan).with_period("P01"))
        .unwrap();

    let values: Vec<_> = report.entries.iter().map(|e| e.new_value).collect();
    assert_eq!(values, vec![dec!(1), dec!(2)]);
}

#[test]
fn test_disallowed_function_is_a_parse_error() {
    let mut m = model(&["A"]);
    let formula = Formula::new("evil", "[OrgUnit=A].[COST] = SYSTEM(1)");
    let err = m
        .engine
        .run_formula(&formula, &RunRequest::new(m.plan).with_period("P01"))
        .unwrap_err();
    assert!(matches!(err, Error::Formula(FormulaError::Parse { .. })));
}

#[test]
fn test_combinations_read_the_state_at_run_start() {
    let setup = || {
        let mut m = model(&["A", "B", "C"]);
        let plan = m.plan;
        for (org_unit, value) in [("A", dec!(10)), ("B", dec!(20)), ("C", dec!(30))] {
            m.load(plan, "COST", "P01", org_unit, FactValues::amount(value));
        }
        m
    };
    let formula = Formula::new("flatten", "[OrgUnit=$LOOP].[COST] = SUM:COST").looping(["OrgUnit"]);

    let mut m = setup();
    let request = RunRequest::new(m.plan).with_period("P01");
    let committed = m.engine.run_formula(&formula, &request).unwrap();
    let values: Vec<_> = committed.entries.iter().map(|e| e.new_value).collect();
    assert_eq!(values, vec![dec!(60), dec!(60), dec!(60)]);
    let olds: Vec<_> = committed.entries.iter().map(|e| e.old_value).collect();
    assert_eq!(olds, vec![dec!(10), dec!(20), dec!(30)]);
    assert_eq!(m.value(m.plan, "COST", "P01", "C"), dec!(60));

    let mut fresh = setup();
    let preview = fresh
        .engine
        .run_formula(&formula, &RunRequest::new(fresh.plan).with_period("P01").preview(true))
        .unwrap();
    assert_eq!(preview.entries, committed.entries);
}

#[test]
fn test_old_value_comes_from_the_newest_batch_holding_the_cell() {
    let mut m = model(&["A", "B"]);
    let plan = m.plan;
    let forecast = m
        .engine
        .create_session("forecast", "FCST", "2025", None)
        .unwrap()
        .id;
    m.load(forecast, "COST", "P01", "A", FactValues::amount(dec!(70)));
    m.load(plan, "COST", "P01", "B", FactValues::amount(dec!(1)));

    // Copy opens a second forecast batch that only holds B
    let copy = PlanningFunction::Copy {
        to_version: "FCST".into(),
        year: "2025".into(),
        period: None,
    };
    m.engine.run_function(&copy, plan).unwrap();
    assert_eq!(m.engine.store().batches(forecast).len(), 2);

    let formula = Formula::new("set", "[OrgUnit=A].[COST] = 5");
    let report = m
        .engine
        .run_formula(&formula, &RunRequest::new(forecast).with_period("P01"))
        .unwrap();
    assert_eq!(report.entries[0].old_value, dec!(70));
    assert_eq!(report.entries[0].new_value, dec!(5));
    assert_eq!(m.value(forecast, "COST", "P01", "A"), dec!(5));
}
