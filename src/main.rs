use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;

use equity_tax::config::Config;
use equity_tax::errors::ReconciliationError;
use equity_tax::estimator;
use equity_tax::ingest;
use equity_tax::models::{FilingStatus, ItemizedDeductions};
use equity_tax::reconcile;
use equity_tax::report;
use equity_tax::store::{JsonStore, RecordStore};
use equity_tax::strategy::{self, StrategyInputs};

#[derive(Parser)]
#[command(name = "equity-tax")]
#[command(about = "Reconcile equity compensation cost basis and estimate federal and California tax")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import records from a source document
    Import {
        /// Source type (w2, 1099b, 1099div, 1099int, 3921, 3922, benefits)
        source: String,
        /// Path to the CSV file
        file: PathBuf,
        /// Tax year the document covers
        #[arg(long)]
        year: i32,
    },
    /// Match sales to lots and correct broker-reported basis
    Reconcile {
        year: i32,
        /// Redo a year that was already reconciled
        #[arg(long)]
        force: bool,
    },
    /// Compute the federal and California liability for a year
    Estimate {
        year: i32,
        #[arg(long, value_enum, default_value = "single")]
        filing_status: FilingStatus,
        /// Net capital loss carried in from the prior year
        #[arg(long, default_value = "0")]
        capital_loss_carryover: Decimal,
        /// Minimum-tax credit carried in from prior years
        #[arg(long, default_value = "0")]
        amt_credit: Decimal,
        #[arg(long, default_value = "0")]
        estimated_payments: Decimal,
        #[arg(long, default_value = "0")]
        ca_estimated_payments: Decimal,
        /// JSON file of Schedule A inputs
        #[arg(long)]
        deductions_file: Option<PathBuf>,
        /// HSA contributions (California adds these back)
        #[arg(long, default_value = "0")]
        hsa_contributions: Decimal,
    },
    /// Rank tax-saving moves against the baseline estimate
    Strategy {
        year: i32,
        #[arg(long, value_enum, default_value = "single")]
        filing_status: FilingStatus,
        /// JSON file of analyzer inputs (prices, contribution room,
        /// prior-year tax, planned sales)
        #[arg(long)]
        inputs_file: Option<PathBuf>,
    },
    /// Write reconciliation, estimate, and strategy reports to a directory
    Report {
        year: i32,
        #[arg(long)]
        output: PathBuf,
        /// Which report to write (dispositions, estimate, strategy, all)
        #[arg(long, default_value = "all")]
        r#type: String,
        #[arg(long, value_enum, default_value = "single")]
        filing_status: FilingStatus,
    },
    /// List lots on file
    Lots {
        /// Filter to one ticker
        #[arg(long)]
        security: Option<String>,
    },
    /// List corrected sale results for a year
    Results { year: i32 },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{} {}", "Error:".red().bold(), error);
            let internal = error
                .downcast_ref::<ReconciliationError>()
                .map(|e| e.is_fatal())
                .unwrap_or(false);
            if internal {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn open_store() -> Result<JsonStore> {
    JsonStore::open_default()
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import { source, file, year } => cmd_import(&source, &file, year),
        Commands::Reconcile { year, force } => cmd_reconcile(year, force),
        Commands::Estimate {
            year,
            filing_status,
            capital_loss_carryover,
            amt_credit,
            estimated_payments,
            ca_estimated_payments,
            deductions_file,
            hsa_contributions,
        } => cmd_estimate(
            year,
            filing_status,
            capital_loss_carryover,
            amt_credit,
            estimated_payments,
            ca_estimated_payments,
            deductions_file,
            hsa_contributions,
        ),
        Commands::Strategy {
            year,
            filing_status,
            inputs_file,
        } => cmd_strategy(year, filing_status, inputs_file),
        Commands::Report {
            year,
            output,
            r#type,
            filing_status,
        } => cmd_report(year, &output, &r#type, filing_status),
        Commands::Lots { security } => cmd_lots(security.as_deref()),
        Commands::Results { year } => cmd_results(year),
    }
}

fn cmd_import(source: &str, file: &std::path::Path, year: i32) -> Result<()> {
    let adapter = ingest::adapter_for(source).ok_or_else(|| {
        anyhow!(
            "Unknown source {:?}; expected one of: {}",
            source,
            ingest::KNOWN_SOURCES.join(", ")
        )
    })?;

    println!(
        "{} {} from {}...",
        "Importing".green().bold(),
        source,
        file.display()
    );
    let result = adapter.parse(file, year)?;
    let problems = adapter.validate(&result);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {} {}", "!".red(), problem);
        }
        bail!("{} validation problem(s); nothing was imported", problems.len());
    }

    let mut store = open_store()?;
    let count = ingest::persist(&mut store, result)?;
    println!(
        "{} {} record(s) imported for {}",
        "Done:".green().bold(),
        count,
        year
    );
    Ok(())
}

fn cmd_reconcile(year: i32, force: bool) -> Result<()> {
    let mut store = open_store()?;
    println!("{} {}...", "Reconciling".green().bold(), year);
    let outcome = reconcile::reconcile_year(&mut store, year, force)?;

    println!(
        "Processed {} sale(s) into {} corrected disposition(s); net reportable gain {}",
        outcome.sales_processed,
        outcome.results.len(),
        report::money(outcome.net_reportable_gain())
    );
    if !outcome.unmatched_sales.is_empty() {
        println!(
            "{} sale(s) had no matching lot: {}",
            outcome.unmatched_sales.len(),
            outcome.unmatched_sales.join(", ")
        );
    }
    print!("{}", report::render_dispositions(&outcome.results));

    if !outcome.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &outcome.warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
    if !outcome.errors.is_empty() {
        println!("\n{}", "Errors:".red().bold());
        for error in &outcome.errors {
            println!("  {} {}", "x".red(), error);
        }
        bail!("{} sale(s) could not be reconciled", outcome.errors.len());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_estimate(
    year: i32,
    filing_status: FilingStatus,
    capital_loss_carryover: Decimal,
    amt_credit: Decimal,
    estimated_payments: Decimal,
    ca_estimated_payments: Decimal,
    deductions_file: Option<PathBuf>,
    hsa_contributions: Decimal,
) -> Result<()> {
    let store = open_store()?;
    let (mut input, warnings) = estimator::assemble_input(&store, year, filing_status)?;
    input.capital_loss_carryover = capital_loss_carryover;
    input.amt_credit_carryover = amt_credit;
    input.estimated_payments = estimated_payments;
    input.ca_estimated_payments = ca_estimated_payments;
    input.hsa_contributions = hsa_contributions;
    if let Some(path) = deductions_file {
        let contents = std::fs::read_to_string(&path)?;
        let itemized: ItemizedDeductions = serde_json::from_str(&contents)?;
        input.itemized = Some(itemized);
    }

    let estimate = estimator::estimate(&input)?;
    println!("{}", report::render_estimate(&estimate));

    let all_warnings: Vec<&String> = warnings.iter().chain(estimate.warnings.iter()).collect();
    if !all_warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in all_warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
    Ok(())
}

fn cmd_strategy(year: i32, filing_status: FilingStatus, inputs_file: Option<PathBuf>) -> Result<()> {
    let store = open_store()?;
    let user: StrategyInputs = match inputs_file {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        }
        None => StrategyInputs::default(),
    };
    let thresholds = Config::load()?.thresholds;
    let report_data = strategy::run_for_year(&store, year, filing_status, &user, &thresholds)?;
    print!("{}", report::render_strategy(&report_data));
    Ok(())
}

fn cmd_report(
    year: i32,
    output: &std::path::Path,
    report_type: &str,
    filing_status: FilingStatus,
) -> Result<()> {
    std::fs::create_dir_all(output)?;
    let store = open_store()?;

    let write_dispositions = matches!(report_type, "dispositions" | "all");
    let write_estimate = matches!(report_type, "estimate" | "all");
    let write_strategy = matches!(report_type, "strategy" | "all");
    if !write_dispositions && !write_estimate && !write_strategy {
        bail!(
            "Unknown report type {:?}; expected dispositions, estimate, strategy, or all",
            report_type
        );
    }

    if write_dispositions {
        let results = store.get_sale_results(year)?;
        let path = output.join(format!("dispositions-{}.csv", year));
        report::write_dispositions_csv(&results, &path)?;
        println!("{} {}", "Wrote".green(), path.display());
    }
    if write_estimate {
        let (input, _) = estimator::assemble_input(&store, year, filing_status)?;
        let estimate = estimator::estimate(&input)?;
        let path = output.join(format!("estimate-{}.csv", year));
        report::write_estimate_csv(&estimate, &path)?;
        println!("{} {}", "Wrote".green(), path.display());
    }
    if write_strategy {
        let thresholds = Config::load()?.thresholds;
        let report_data = strategy::run_for_year(
            &store,
            year,
            filing_status,
            &StrategyInputs::default(),
            &thresholds,
        )?;
        let path = output.join(format!("strategy-{}.csv", year));
        report::write_strategy_csv(&report_data, &path)?;
        println!("{} {}", "Wrote".green(), path.display());
    }
    Ok(())
}

fn cmd_lots(security: Option<&str>) -> Result<()> {
    let store = open_store()?;
    let mut lots = store.get_lots()?;
    if let Some(ticker) = security {
        let ticker = ticker.trim().to_uppercase();
        lots.retain(|lot| lot.security.ticker == ticker);
    }
    lots.sort_by(|a, b| a.acquisition_date.cmp(&b.acquisition_date));
    println!("{}", report::render_lots(&lots));
    Ok(())
}

fn cmd_results(year: i32) -> Result<()> {
    let store = open_store()?;
    let results = store.get_sale_results(year)?;
    if results.is_empty() {
        println!(
            "{}",
            format!("No reconciled results for {}; run `equity-tax reconcile {}` first", year, year)
                .yellow()
        );
        return Ok(());
    }
    print!("{}", report::render_dispositions(&results));
    Ok(())
}
