use anyhow::{Context, Result};
use colored::*;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tabled::{Table, Tabled};

use crate::estimator::TaxEstimate;
use crate::models::{Form8949Box, Lot, SaleResult};
use crate::strategy::StrategyReport;

// Report generation. Everything upstream computes with full precision;
// this is the display boundary where amounts get quantized to cents.

/// Two-decimal display form of a monetary amount
pub fn money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// One Form 8949 row
#[derive(Tabled)]
struct DispositionRow {
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Sold")]
    sold: String,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Basis")]
    basis: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Adjustment")]
    adjustment: String,
    #[tabled(rename = "Gain/Loss")]
    gain_loss: String,
}

impl DispositionRow {
    fn from_result(result: &SaleResult) -> Self {
        DispositionRow {
            description: format!("{} sh {}", result.shares, result.security.ticker),
            acquired: result.acquisition_date.to_string(),
            sold: result.sale_date.to_string(),
            proceeds: money(result.proceeds),
            basis: money(result.broker_reported_basis),
            code: result.adjustment_code.to_string(),
            adjustment: money(result.adjustment_amount + result.wash_sale_disallowed),
            gain_loss: money(result.gain_loss),
        }
    }
}

/// Render the reconciled dispositions grouped by Form 8949 box
pub fn render_dispositions(results: &[SaleResult]) -> String {
    let mut output = String::new();
    for category in [
        Form8949Box::A,
        Form8949Box::B,
        Form8949Box::C,
        Form8949Box::D,
        Form8949Box::E,
        Form8949Box::F,
    ] {
        let rows: Vec<DispositionRow> = results
            .iter()
            .filter(|r| r.category == category)
            .map(DispositionRow::from_result)
            .collect();
        if rows.is_empty() {
            continue;
        }
        let subtotal: Decimal = results
            .iter()
            .filter(|r| r.category == category)
            .map(|r| r.gain_loss)
            .sum();
        output.push_str(&format!("\nBox {} dispositions:\n", category));
        output.push_str(&Table::new(rows).to_string());
        output.push_str(&format!("\nBox {} net gain/loss: {}\n", category, money(subtotal)));
    }
    output
}

/// Write the corrected dispositions as a Form 8949-style CSV
pub fn write_dispositions_csv(results: &[SaleResult], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    writer.write_record([
        "box",
        "description",
        "date_acquired",
        "date_sold",
        "proceeds",
        "broker_basis",
        "corrected_basis",
        "adjustment_code",
        "adjustment_amount",
        "wash_sale_disallowed",
        "gain_loss",
        "ordinary_income",
        "amt_adjustment",
        "notes",
    ])?;
    for result in results {
        writer.write_record([
            result.category.to_string(),
            format!("{} sh {}", result.shares, result.security.ticker),
            result.acquisition_date.to_string(),
            result.sale_date.to_string(),
            money(result.proceeds),
            money(result.broker_reported_basis),
            money(result.corrected_basis),
            result.adjustment_code.to_string(),
            money(result.adjustment_amount),
            money(result.wash_sale_disallowed),
            money(result.gain_loss),
            money(result.ordinary_income),
            money(result.amt_adjustment),
            result.notes.join("; "),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row of the lot inventory listing
#[derive(Tabled)]
struct LotRow {
    #[tabled(rename = "Lot")]
    id: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Cost/sh")]
    cost: String,
    #[tabled(rename = "AMT cost/sh")]
    amt_cost: String,
    #[tabled(rename = "Remaining")]
    remaining: String,
}

/// Render the open-lot inventory
pub fn render_lots(lots: &[Lot]) -> String {
    let rows: Vec<LotRow> = lots
        .iter()
        .map(|lot| LotRow {
            id: lot.id.clone(),
            class: lot.equity_class.to_string(),
            ticker: lot.security.ticker.clone(),
            acquired: lot.acquisition_date.to_string(),
            cost: money(lot.cost_per_share()),
            amt_cost: money(lot.amt_cost_per_share()),
            remaining: lot.shares_remaining.to_string(),
        })
        .collect();
    if rows.is_empty() {
        return "No lots on file.".to_string();
    }
    Table::new(rows).to_string()
}

/// Render the complete estimate as a line-by-line text report
pub fn render_estimate(estimate: &TaxEstimate) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Tax estimate for {} ({})",
        estimate.year, estimate.filing_status
    ));
    lines.push(String::new());
    lines.push("Income".to_string());
    lines.push(format!("  Wages:                      {:>14}", money(estimate.wages)));
    lines.push(format!("  Interest:                   {:>14}", money(estimate.interest_income)));
    lines.push(format!("  Ordinary dividends:         {:>14}", money(estimate.ordinary_dividends)));
    lines.push(format!("    of which qualified:       {:>14}", money(estimate.qualified_dividends)));
    lines.push(format!("  Short-term gain:            {:>14}", money(estimate.short_term_gain)));
    lines.push(format!("  Long-term gain:             {:>14}", money(estimate.long_term_gain)));
    if estimate.capital_loss_deduction > Decimal::ZERO {
        lines.push(format!(
            "  Capital-loss deduction:     {:>14}",
            money(-estimate.capital_loss_deduction)
        ));
    }
    if estimate.capital_loss_carryforward > Decimal::ZERO {
        lines.push(format!(
            "  Loss carried forward:       {:>14}",
            money(estimate.capital_loss_carryforward)
        ));
    }
    if estimate.sale_ordinary_income > Decimal::ZERO {
        lines.push(format!(
            "  Disposition ordinary income:{:>14}",
            money(estimate.sale_ordinary_income)
        ));
    }
    lines.push(format!("  AGI:                        {:>14}", money(estimate.agi)));
    lines.push(String::new());

    lines.push("Federal".to_string());
    let deduction_kind = if estimate.used_itemized {
        "itemized"
    } else {
        "standard"
    };
    lines.push(format!(
        "  Deduction ({}):      {:>14}",
        deduction_kind,
        money(estimate.deduction_used)
    ));
    if estimate.section_199a_deduction > Decimal::ZERO {
        lines.push(format!(
            "  Section 199A deduction:     {:>14}",
            money(estimate.section_199a_deduction)
        ));
    }
    lines.push(format!("  Taxable income:             {:>14}", money(estimate.taxable_income)));
    lines.push(format!("  Ordinary tax:               {:>14}", money(estimate.ordinary_tax)));
    lines.push(format!("  Preferential-rate tax:      {:>14}", money(estimate.preferential_tax)));
    lines.push(format!(
        "  Net investment income tax:  {:>14}",
        money(estimate.net_investment_income_tax)
    ));
    lines.push(format!("  Alternative minimum tax:    {:>14}", money(estimate.amt)));
    lines.push(format!(
        "  Additional Medicare tax:    {:>14}",
        money(estimate.additional_medicare_tax)
    ));
    if estimate.amt_credit_used > Decimal::ZERO {
        lines.push(format!(
            "  Minimum-tax credit used:    {:>14}",
            money(-estimate.amt_credit_used)
        ));
    }
    if estimate.foreign_tax_credit > Decimal::ZERO {
        lines.push(format!(
            "  Foreign tax credit:         {:>14}",
            money(-estimate.foreign_tax_credit)
        ));
    }
    lines.push(format!("  Total federal tax:          {:>14}", money(estimate.federal_total_tax)));
    lines.push(format!("  Withheld + payments:        {:>14}", money(
        estimate.federal_withheld
            + estimate.federal_estimated_payments
            + estimate.additional_medicare_withholding_credit
    )));
    lines.push(format!("  Federal balance due:        {:>14}", money(estimate.federal_balance_due)));
    lines.push(String::new());

    lines.push("California".to_string());
    lines.push(format!("  California AGI:             {:>14}", money(estimate.ca_agi)));
    let ca_kind = if estimate.ca_used_itemized {
        "itemized"
    } else {
        "standard"
    };
    lines.push(format!(
        "  Deduction ({}):      {:>14}",
        ca_kind,
        money(estimate.ca_deduction_used)
    ));
    lines.push(format!("  Taxable income:             {:>14}", money(estimate.ca_taxable_income)));
    lines.push(format!("  Tax:                        {:>14}", money(estimate.ca_base_tax)));
    if estimate.ca_mental_health_tax > Decimal::ZERO {
        lines.push(format!(
            "  Mental health surcharge:    {:>14}",
            money(estimate.ca_mental_health_tax)
        ));
    }
    lines.push(format!("  Total California tax:       {:>14}", money(estimate.ca_total_tax)));
    lines.push(format!("  California balance due:     {:>14}", money(estimate.ca_balance_due)));
    lines.push(String::new());
    lines.push(format!(
        "Combined federal + California tax: {}",
        money(estimate.combined_total_tax)
    ));
    lines.join("\n")
}

/// Write the estimate as a two-column CSV
pub fn write_estimate_csv(estimate: &TaxEstimate, path: &Path) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    writeln!(file, "Line,Amount")?;
    let rows = [
        ("Wages", estimate.wages),
        ("Interest income", estimate.interest_income),
        ("Ordinary dividends", estimate.ordinary_dividends),
        ("Qualified dividends", estimate.qualified_dividends),
        ("Short-term gain", estimate.short_term_gain),
        ("Long-term gain", estimate.long_term_gain),
        ("Capital loss deduction", -estimate.capital_loss_deduction),
        ("Capital loss carryforward", estimate.capital_loss_carryforward),
        ("Disposition ordinary income", estimate.sale_ordinary_income),
        ("AGI", estimate.agi),
        ("Deduction used", estimate.deduction_used),
        ("Section 199A deduction", estimate.section_199a_deduction),
        ("Taxable income", estimate.taxable_income),
        ("Ordinary tax", estimate.ordinary_tax),
        ("Preferential-rate tax", estimate.preferential_tax),
        ("Net investment income tax", estimate.net_investment_income_tax),
        ("AMT preference", estimate.amt_preference),
        ("AMTI", estimate.amti),
        ("Tentative minimum tax", estimate.tentative_minimum_tax),
        ("Alternative minimum tax", estimate.amt),
        ("Minimum-tax credit used", -estimate.amt_credit_used),
        ("Minimum-tax credit carryforward", estimate.amt_credit_carryforward),
        ("Additional Medicare tax", estimate.additional_medicare_tax),
        ("Foreign tax credit", -estimate.foreign_tax_credit),
        ("Total federal tax", estimate.federal_total_tax),
        ("Federal withheld", estimate.federal_withheld),
        ("Federal estimated payments", estimate.federal_estimated_payments),
        ("Federal balance due", estimate.federal_balance_due),
        ("California AGI", estimate.ca_agi),
        ("California deduction used", estimate.ca_deduction_used),
        ("California taxable income", estimate.ca_taxable_income),
        ("California tax", estimate.ca_base_tax),
        ("Mental health surcharge", estimate.ca_mental_health_tax),
        ("Total California tax", estimate.ca_total_tax),
        ("California withheld", estimate.ca_withheld),
        ("California balance due", estimate.ca_balance_due),
        ("Combined total tax", estimate.combined_total_tax),
    ];
    for (label, amount) in rows {
        writeln!(file, "{},{}", label, money(amount))?;
    }
    Ok(())
}

/// Render the strategy report for the terminal
pub fn render_strategy(report: &StrategyReport) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{}\n",
        format!("Strategy analysis for {}", report.year).bold()
    ));

    if report.recommendations.is_empty() {
        output.push_str("No actionable recommendations found.\n");
        return output;
    }

    for recommendation in &report.recommendations {
        let priority = match recommendation.priority {
            crate::models::Priority::Critical => recommendation.priority.to_string().red().bold(),
            crate::models::Priority::High => recommendation.priority.to_string().yellow().bold(),
            crate::models::Priority::Medium => recommendation.priority.to_string().cyan(),
            crate::models::Priority::Low => recommendation.priority.to_string().normal(),
        };
        output.push_str(&format!(
            "\n[{}] {} ({})\n",
            priority,
            recommendation.name.bold(),
            recommendation.category
        ));
        output.push_str(&format!("  Situation: {}\n", recommendation.situation));
        output.push_str(&format!("  Mechanism: {}\n", recommendation.mechanism));
        if recommendation.estimated_savings > Decimal::ZERO {
            output.push_str(&format!(
                "  Estimated savings: {}\n",
                money(recommendation.estimated_savings).green()
            ));
        }
        for step in &recommendation.action_steps {
            output.push_str(&format!("  - {}\n", step));
        }
        if let Some(deadline) = recommendation.deadline {
            output.push_str(&format!("  Deadline: {}\n", deadline));
        }
        output.push_str(&format!("  Risk: {}\n", recommendation.risk));
        if let Some(note) = &recommendation.california_note {
            output.push_str(&format!("  California: {}\n", note));
        }
        output.push_str(&format!("  Authority: {}\n", recommendation.citation));
        for interaction in &recommendation.interactions {
            output.push_str(&format!("  Interacts with {}\n", interaction));
        }
    }

    if !report.warnings.is_empty() {
        output.push_str(&format!("\n{}\n", "Warnings:".yellow().bold()));
        for warning in &report.warnings {
            output.push_str(&format!("  ! {}\n", warning));
        }
    }
    output
}

/// Write the strategy report as CSV for spreadsheet triage
pub fn write_strategy_csv(report: &StrategyReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    writer.write_record([
        "priority",
        "name",
        "category",
        "estimated_savings",
        "deadline",
        "risk",
        "situation",
        "citation",
    ])?;
    for recommendation in &report.recommendations {
        writer.write_record([
            recommendation.priority.to_string(),
            recommendation.name.clone(),
            recommendation.category.to_string(),
            money(recommendation.estimated_savings),
            recommendation
                .deadline
                .map(|d| d.to_string())
                .unwrap_or_default(),
            recommendation.risk.to_string(),
            recommendation.situation.clone(),
            recommendation.citation.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdjustmentCode, HoldingPeriod, Security};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample_result() -> SaleResult {
        SaleResult {
            sale_id: "sale-1".to_string(),
            lot_id: "lot-1".to_string(),
            security: Security::new("ACME", "Acme Corp"),
            acquisition_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            sale_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            shares: dec!(100),
            proceeds: dec!(17500),
            broker_reported_basis: Decimal::ZERO,
            corrected_basis: dec!(15000),
            adjustment_amount: dec!(15000),
            adjustment_code: AdjustmentCode::E,
            holding_period: HoldingPeriod::Long,
            category: Form8949Box::D,
            gain_loss: dec!(2500),
            ordinary_income: Decimal::ZERO,
            amt_adjustment: Decimal::ZERO,
            wash_sale_disallowed: Decimal::ZERO,
            wash_replacement_lot: None,
            notes: vec!["Broker reported zero basis".to_string()],
        }
    }

    #[test]
    fn test_money_quantizes_to_cents() {
        assert_eq!(money(dec!(25538.505)), "25538.50");
        assert_eq!(money(dec!(2500)), "2500.00");
        assert_eq!(money(dec!(-750.1)), "-750.10");
    }

    #[test]
    fn test_dispositions_grouped_by_box() {
        let rendered = render_dispositions(&[sample_result()]);
        assert!(rendered.contains("Box D dispositions"));
        assert!(rendered.contains("ACME"));
        assert!(rendered.contains("2500.00"));
    }

    #[test]
    fn test_dispositions_csv_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("form8949.csv");
        write_dispositions_csv(&[sample_result()], &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("box,description"));
        assert!(content.contains("100 sh ACME"));
        assert!(content.contains("15000.00"));
    }
}
