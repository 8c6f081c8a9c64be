//! Plancalc CLI - run planning formulas and functions over a JSON workbook

mod workbook;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use plancalc::{
    cell_name, FactFilter, FactStore, PlanningFunction, RunEntry, RunLedger, RunRequest, Scope,
    DISPLAY_SCALE,
};
use rust_decimal::Decimal;
use tracing::Level;

use crate::workbook::{Loaded, Workbook};

#[derive(Parser)]
#[command(name = "plancalc")]
#[command(author, version, about = "Planning formula and planning function runner")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a formula from the workbook
    Run {
        /// Workbook file (JSON)
        workbook: PathBuf,

        /// Formula name
        #[arg(short, long)]
        formula: String,

        /// Session name or id
        #[arg(short, long)]
        session: String,

        /// Period code reads and writes default to
        #[arg(short, long)]
        period: Option<String>,

        /// Record entries without writing facts
        #[arg(long)]
        preview: bool,
    },

    /// Run a planning function
    Function {
        /// Workbook file (JSON)
        workbook: PathBuf,

        /// Function kind (copy, distribute, convert, repost, reset_slice)
        #[arg(short, long)]
        kind: String,

        /// Session name or id
        #[arg(short, long)]
        session: String,

        /// Function parameter as key=value (repeatable)
        #[arg(short = 'P', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Parse and expand a formula without running it
    Check {
        /// Workbook file (JSON)
        workbook: PathBuf,

        /// Formula name
        #[arg(short, long)]
        formula: String,
    },

    /// List the current facts of a session
    Facts {
        /// Workbook file (JSON)
        workbook: PathBuf,

        /// Session name or id
        #[arg(short, long)]
        session: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            workbook,
            formula,
            session,
            period,
            preview,
        } => run_formula(&workbook, &formula, &session, period, preview, cli.json),
        Commands::Function {
            workbook,
            kind,
            session,
            params,
        } => run_function(&workbook, &kind, &session, params, cli.json),
        Commands::Check { workbook, formula } => check(&workbook, &formula),
        Commands::Facts { workbook, session } => list_facts(&workbook, &session, cli.json),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_key_value(text: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", text))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn open(path: &PathBuf) -> Result<Loaded> {
    Workbook::load(path)?
        .into_engine()
        .with_context(|| format!("Failed to load workbook '{}'", path.display()))
}

fn run_formula(
    path: &PathBuf,
    name: &str,
    session: &str,
    period: Option<String>,
    preview: bool,
    json: bool,
) -> Result<()> {
    let mut loaded = open(path)?;
    let session = loaded.session(session)?;
    let formula = loaded.formula(name)?.clone();

    let mut request = RunRequest::new(session).preview(preview);
    request.period = period;
    let report = loaded
        .engine
        .run_formula(&formula, &request)
        .with_context(|| format!("Formula '{}' failed", name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_entries(&report.entries);
    eprintln!(
        "Run {}: {} cells{}",
        report.run.id,
        report.len(),
        if report.run.preview { " (preview, nothing written)" } else { "" }
    );
    Ok(())
}

fn run_function(
    path: &PathBuf,
    kind: &str,
    session: &str,
    params: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let mut loaded = open(path)?;
    let session = loaded.session(session)?;
    let params: BTreeMap<String, String> = params.into_iter().collect();
    let function = PlanningFunction::from_request(kind, &params)?;

    let outcome = loaded
        .engine
        .run_function(&function, session)
        .with_context(|| format!("Planning function '{}' failed", function))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    print_entries(&loaded.engine.ledger().entries(outcome.run));
    for error in &outcome.errors {
        eprintln!("Skipped {}", error);
    }
    eprintln!(
        "{}: {} rows affected, {} skipped",
        function,
        outcome.affected,
        outcome.errors.len()
    );
    Ok(())
}

fn check(path: &PathBuf, name: &str) -> Result<()> {
    let loaded = open(path)?;
    let formula = loaded.formula(name)?;
    let compiled = loaded
        .engine
        .compile(formula)
        .with_context(|| format!("Formula '{}' does not compile", name))?;

    println!("{} = {}", compiled.statement.target, compiled.statement.expr);
    let loops: Vec<String> = compiled
        .loop_dimensions
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("Loop dimensions: {}", if loops.is_empty() { "-".to_string() } else { loops.join(", ") });
    println!(
        "Combinations: {}",
        plancalc::combinations(loaded.engine.registry(), &compiled.loop_dimensions)?.len()
    );
    println!("Reads reference data: {}", compiled.has_references());
    Ok(())
}

fn list_facts(path: &PathBuf, session: &str, json: bool) -> Result<()> {
    let loaded = open(path)?;
    let session = loaded.session(session)?;
    let facts = loaded
        .engine
        .store()
        .select_current(&FactFilter::new(), &Scope::session(session))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }
    let registry = loaded.engine.registry();
    for fact in &facts {
        println!(
            "{:<48} {:>16} {}",
            cell_name(registry, &fact.key.cell),
            display(fact.value),
            fact.unit.as_deref().unwrap_or("")
        );
    }
    eprintln!("{} facts", facts.len());
    Ok(())
}

fn print_entries(entries: &[RunEntry]) {
    for entry in entries {
        println!(
            "{:>4} {:<48} {:>16} -> {:>16}",
            entry.seq,
            entry.key_name,
            display(entry.old_value),
            display(entry.new_value)
        );
    }
}

fn display(value: Decimal) -> Decimal {
    let mut value = value.round_dp(DISPLAY_SCALE);
    value.rescale(DISPLAY_SCALE);
    value
}
