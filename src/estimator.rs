use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::brackets::{
    self, LtcgBreakpoints, ADDITIONAL_MEDICARE_RATE, AMT_EXEMPTION_PHASEOUT_RATE, AMT_HIGH_RATE,
    AMT_LOW_RATE, MENTAL_HEALTH_RATE, MENTAL_HEALTH_THRESHOLD, NIIT_RATE, REGULAR_MEDICARE_RATE,
    SECTION_199A_RATE,
};
use crate::deductions::{self, CaliforniaItemized, FederalItemized};
use crate::models::{
    DividendStatement, FilingStatus, HoldingPeriod, InterestStatement, ItemizedDeductions,
    SaleResult, WageStatement,
};
use crate::store::RecordStore;

// The tax estimator. A pure function of its input: the strategy engine
// re-invokes it with perturbed inputs, so nothing in here may read the
// store or carry state between calls.

/// Everything the estimator needs for one computation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateInput {
    pub year: i32,
    pub filing_status: FilingStatus,
    pub wages: Vec<WageStatement>,
    pub dividends: Vec<DividendStatement>,
    pub interest: Vec<InterestStatement>,
    pub sale_results: Vec<SaleResult>,
    /// Prior-year net capital loss available this year (a positive
    /// number)
    pub capital_loss_carryover: Decimal,
    /// Minimum-tax credit carried in from prior years
    pub amt_credit_carryover: Decimal,
    pub estimated_payments: Decimal,
    pub ca_estimated_payments: Decimal,
    pub itemized: Option<ItemizedDeductions>,
    /// HSA contributions; a California add-back
    pub hsa_contributions: Decimal,
}

/// Complete computed liability, every line federal and state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxEstimate {
    pub year: i32,
    pub filing_status: FilingStatus,

    // Income assembly
    pub wages: Decimal,
    pub interest_income: Decimal,
    pub ordinary_dividends: Decimal,
    pub qualified_dividends: Decimal,
    pub capital_gain_distributions: Decimal,
    /// Net short-term gain after carryover and netting
    pub short_term_gain: Decimal,
    /// Net long-term gain after carryover and netting (includes
    /// capital-gain distributions)
    pub long_term_gain: Decimal,
    pub capital_loss_deduction: Decimal,
    pub capital_loss_carryforward: Decimal,
    /// Ordinary income recognized by dispositions (ESPP, disqualifying
    /// ISO) that never reached a W-2
    pub sale_ordinary_income: Decimal,
    pub total_income: Decimal,
    pub agi: Decimal,

    // Deductions
    pub standard_deduction: Decimal,
    pub federal_itemized: Option<FederalItemized>,
    pub deduction_used: Decimal,
    pub used_itemized: bool,
    pub section_199a_deduction: Decimal,
    pub taxable_income: Decimal,

    // Federal tax
    pub preferential_income: Decimal,
    pub ordinary_taxable: Decimal,
    pub ordinary_tax: Decimal,
    pub preferential_tax: Decimal,
    pub net_investment_income_tax: Decimal,
    pub amt_preference: Decimal,
    pub amti: Decimal,
    pub tentative_minimum_tax: Decimal,
    pub amt: Decimal,
    pub amt_credit_used: Decimal,
    pub amt_credit_carryforward: Decimal,
    pub additional_medicare_tax: Decimal,
    pub additional_medicare_withholding_credit: Decimal,
    pub foreign_tax_credit: Decimal,
    pub federal_total_tax: Decimal,
    pub federal_withheld: Decimal,
    pub federal_estimated_payments: Decimal,
    pub federal_balance_due: Decimal,

    // California
    pub ca_agi: Decimal,
    pub ca_itemized: Option<CaliforniaItemized>,
    pub ca_deduction_used: Decimal,
    pub ca_used_itemized: bool,
    pub ca_taxable_income: Decimal,
    pub ca_base_tax: Decimal,
    pub ca_mental_health_tax: Decimal,
    pub ca_total_tax: Decimal,
    pub ca_withheld: Decimal,
    pub ca_estimated_payments: Decimal,
    pub ca_balance_due: Decimal,

    pub combined_total_tax: Decimal,
    pub warnings: Vec<String>,
}

/// Pull the estimator's input out of the record store, warning (not
/// failing) on gaps
pub fn assemble_input(
    store: &dyn RecordStore,
    year: i32,
    filing_status: FilingStatus,
) -> Result<(EstimateInput, Vec<String>)> {
    let mut warnings = Vec::new();

    let wages = store.get_wages(year)?;
    if wages.is_empty() {
        warnings.push(format!(
            "No wage statements on file for {}; proceeding with zero wages",
            year
        ));
    }
    let sale_results = store.get_sale_results(year)?;
    if sale_results.is_empty() && store.get_reconciliation_runs(year)?.is_empty() {
        warnings.push(format!(
            "Year {} has not been reconciled; proceeding with zero capital gain or loss",
            year
        ));
    }

    let input = EstimateInput {
        year,
        filing_status,
        wages,
        dividends: store.get_dividends(year)?,
        interest: store.get_interest(year)?,
        sale_results,
        ..EstimateInput::default()
    };
    Ok((input, warnings))
}

/// The loss a sale result actually gets to claim: the economic gain/loss
/// with any wash-disallowed portion added back
fn reportable_gain(result: &SaleResult) -> Decimal {
    if result.gain_loss < Decimal::ZERO {
        result.gain_loss + result.wash_sale_disallowed.min(-result.gain_loss)
    } else {
        result.gain_loss
    }
}

/// Tax on preferential-rate income stacked above ordinary income.
///
/// Ordinary income fills the brackets first; each preferential tranche is
/// taxed at the rate of the bracket it lands in.
pub fn preferential_stack_tax(
    preferential: Decimal,
    ordinary_top: Decimal,
    breakpoints: &LtcgBreakpoints,
) -> Decimal {
    let schedule = [
        (Some(breakpoints.zero_top), Decimal::ZERO),
        (Some(breakpoints.fifteen_top), Decimal::new(15, 2)),
        (None, Decimal::new(20, 2)),
    ];

    let mut tax = Decimal::ZERO;
    let mut remaining = preferential.max(Decimal::ZERO);
    let mut stack_top = ordinary_top.max(Decimal::ZERO);
    let mut previous_bound = Decimal::ZERO;

    for (bound, rate) in schedule {
        if remaining <= Decimal::ZERO {
            break;
        }
        match bound {
            Some(upper) => {
                let bracket_start = stack_top.max(previous_bound);
                previous_bound = upper;
                if bracket_start >= upper {
                    continue;
                }
                let taxed_here = remaining.min(upper - bracket_start);
                tax += taxed_here * rate;
                remaining -= taxed_here;
                stack_top = bracket_start + taxed_here;
            }
            None => {
                tax += remaining * rate;
                remaining = Decimal::ZERO;
            }
        }
    }
    tax
}

/// Outcome of capital-loss netting
#[derive(Debug, Clone, Copy, PartialEq)]
struct CapitalNetting {
    short_term: Decimal,
    long_term: Decimal,
    deduction: Decimal,
    carryforward: Decimal,
}

/// Apply the prior-year carryover, net short against long, and cap any
/// remaining net loss
fn net_capital(
    mut short_term: Decimal,
    mut long_term: Decimal,
    carryover: Decimal,
    status: FilingStatus,
) -> CapitalNetting {
    // Carryover absorbs short-term gains first, then long-term
    let mut remaining_carryover = carryover.max(Decimal::ZERO);
    if short_term > Decimal::ZERO {
        let used = short_term.min(remaining_carryover);
        short_term -= used;
        remaining_carryover -= used;
    }
    if long_term > Decimal::ZERO {
        let used = long_term.min(remaining_carryover);
        long_term -= used;
        remaining_carryover -= used;
    }
    // Whatever survives is still a loss in this year's netting
    long_term -= remaining_carryover;

    // Net opposite signs against each other
    if short_term < Decimal::ZERO && long_term > Decimal::ZERO {
        let offset = (-short_term).min(long_term);
        short_term += offset;
        long_term -= offset;
    } else if long_term < Decimal::ZERO && short_term > Decimal::ZERO {
        let offset = (-long_term).min(short_term);
        long_term += offset;
        short_term -= offset;
    }

    let net = short_term + long_term;
    if net < Decimal::ZERO {
        let deduction = (-net).min(brackets::capital_loss_cap(status));
        CapitalNetting {
            short_term,
            long_term,
            deduction,
            carryforward: -net - deduction,
        }
    } else {
        CapitalNetting {
            short_term,
            long_term,
            deduction: Decimal::ZERO,
            carryforward: Decimal::ZERO,
        }
    }
}

/// Compute the complete federal and California liability
pub fn estimate(input: &EstimateInput) -> Result<TaxEstimate> {
    let year = input.year;
    let status = input.filing_status;
    let mut warnings = Vec::new();

    // ---- Income assembly ----
    let wages: Decimal = input.wages.iter().map(|w| w.wages).sum();
    let medicare_wages: Decimal = input.wages.iter().map(|w| w.medicare_wages).sum();
    let medicare_withheld: Decimal = input.wages.iter().map(|w| w.medicare_withheld).sum();
    let wage_federal_withheld: Decimal = input.wages.iter().map(|w| w.federal_withheld).sum();
    let state_withheld: Decimal = input.wages.iter().map(|w| w.state_withheld).sum();

    let mut disability_paid = Decimal::ZERO;
    for wage in &input.wages {
        let (amount, label_warnings) = deductions::disability_from_box14(&wage.box14);
        disability_paid += amount;
        warnings.extend(label_warnings);
    }

    let ordinary_dividends: Decimal = input.dividends.iter().map(|d| d.ordinary_dividends).sum();
    let qualified_dividends: Decimal = input.dividends.iter().map(|d| d.qualified_dividends).sum();
    let capital_gain_distributions: Decimal = input
        .dividends
        .iter()
        .map(|d| d.capital_gain_distributions)
        .sum();
    let foreign_tax: Decimal = input.dividends.iter().map(|d| d.foreign_tax_paid).sum();
    let section_199a_dividends: Decimal = input
        .dividends
        .iter()
        .map(|d| d.section_199a_dividends)
        .sum();
    let dividend_withheld: Decimal = input.dividends.iter().map(|d| d.federal_withheld).sum();

    let interest_income: Decimal = input.interest.iter().map(|i| i.interest_income).sum();
    let early_withdrawal_penalty: Decimal = input
        .interest
        .iter()
        .map(|i| i.early_withdrawal_penalty)
        .sum();
    let treasury_interest: Decimal = input.interest.iter().map(|i| i.treasury_interest).sum();
    let interest_withheld: Decimal = input.interest.iter().map(|i| i.federal_withheld).sum();

    let raw_short: Decimal = input
        .sale_results
        .iter()
        .filter(|r| r.holding_period == HoldingPeriod::Short)
        .map(reportable_gain)
        .sum();
    let raw_long: Decimal = input
        .sale_results
        .iter()
        .filter(|r| r.holding_period == HoldingPeriod::Long)
        .map(reportable_gain)
        .sum::<Decimal>()
        + capital_gain_distributions;
    let sale_ordinary_income: Decimal =
        input.sale_results.iter().map(|r| r.ordinary_income).sum();
    let iso_amt_adjustments: Decimal =
        input.sale_results.iter().map(|r| r.amt_adjustment).sum();

    let netting = net_capital(raw_short, raw_long, input.capital_loss_carryover, status);
    let capital_in_income = if netting.deduction > Decimal::ZERO {
        -netting.deduction
    } else {
        netting.short_term + netting.long_term
    };

    let total_income = wages
        + interest_income
        + ordinary_dividends
        + capital_in_income
        + sale_ordinary_income;
    let agi = total_income - early_withdrawal_penalty;

    // ---- Deductions ----
    let standard_deduction = brackets::standard_deduction(year, status)?;
    let federal_itemized = input
        .itemized
        .as_ref()
        .map(|items| deductions::assemble_federal(items, agi, status, disability_paid));
    let itemized_total = federal_itemized
        .as_ref()
        .map(|f| f.total)
        .unwrap_or(Decimal::ZERO);
    let used_itemized = itemized_total > standard_deduction;
    let deduction_used = itemized_total.max(standard_deduction);

    let section_199a_deduction = section_199a_dividends * SECTION_199A_RATE;
    let taxable_income = (agi - deduction_used - section_199a_deduction).max(Decimal::ZERO);

    // ---- Federal ordinary and preferential tax ----
    let preferential_income =
        (qualified_dividends + netting.long_term.max(Decimal::ZERO)).min(taxable_income);
    let ordinary_taxable = taxable_income - preferential_income;

    let federal_table = brackets::federal_brackets(year, status)?;
    let ordinary_tax = federal_table.tax(ordinary_taxable);

    let ltcg = brackets::ltcg_breakpoints(year, status)?;
    let preferential_tax = preferential_stack_tax(preferential_income, ordinary_taxable, &ltcg);
    let regular_tax = ordinary_tax + preferential_tax;

    // ---- Net investment income tax ----
    let investment_income = interest_income
        + ordinary_dividends
        + netting.short_term.max(Decimal::ZERO)
        + netting.long_term.max(Decimal::ZERO);
    let excess_agi = (agi - brackets::niit_threshold(status)).max(Decimal::ZERO);
    let net_investment_income_tax = investment_income.min(excess_agi) * NIIT_RATE;

    // ---- Alternative minimum tax ----
    let salt_addback = if used_itemized {
        federal_itemized
            .as_ref()
            .map(|f| f.salt_deducted)
            .unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    let amt_preference = iso_amt_adjustments + salt_addback;
    let amt_params = brackets::amt_params(year, status)?;

    let amti = taxable_income + amt_preference;
    let phase_out_excess = (amti - amt_params.phaseout_start).max(Decimal::ZERO);
    let exemption =
        (amt_params.exemption - AMT_EXEMPTION_PHASEOUT_RATE * phase_out_excess).max(Decimal::ZERO);
    let amt_base = (amti - exemption).max(Decimal::ZERO);
    let amt_preferential = preferential_income.min(amt_base);
    let ordinary_amt_base = (amt_base - amt_preferential).max(Decimal::ZERO);
    let tax_on_amt_ordinary = if ordinary_amt_base <= amt_params.rate_breakpoint {
        ordinary_amt_base * AMT_LOW_RATE
    } else {
        amt_params.rate_breakpoint * AMT_LOW_RATE
            + (ordinary_amt_base - amt_params.rate_breakpoint) * AMT_HIGH_RATE
    };
    let tax_on_amt_preferential = preferential_stack_tax(amt_preferential, ordinary_amt_base, &ltcg);
    let tentative_minimum_tax = tax_on_amt_ordinary + tax_on_amt_preferential;
    let amt = if amt_preference == Decimal::ZERO {
        Decimal::ZERO
    } else {
        (tentative_minimum_tax - regular_tax).max(Decimal::ZERO)
    };

    // ---- Minimum-tax credit ----
    let amt_credit_used = input
        .amt_credit_carryover
        .min((regular_tax - tentative_minimum_tax).max(Decimal::ZERO));
    let amt_credit_carryforward = input.amt_credit_carryover - amt_credit_used;

    // ---- Additional Medicare tax ----
    let medicare_threshold = brackets::additional_medicare_threshold(status);
    let additional_medicare_tax =
        (medicare_wages - medicare_threshold).max(Decimal::ZERO) * ADDITIONAL_MEDICARE_RATE;
    let regular_medicare = medicare_wages * REGULAR_MEDICARE_RATE;
    let additional_medicare_withholding_credit =
        (medicare_withheld - regular_medicare).max(Decimal::ZERO);

    // ---- Foreign tax credit ----
    let foreign_tax_credit = if foreign_tax <= brackets::ftc_de_minimis(status) {
        foreign_tax
    } else {
        foreign_tax.min(regular_tax + amt)
    };

    // ---- Federal totals ----
    let federal_total_tax = regular_tax + net_investment_income_tax + amt + additional_medicare_tax
        - amt_credit_used
        - foreign_tax_credit;
    let federal_withheld = wage_federal_withheld + dividend_withheld + interest_withheld;
    let federal_credits =
        federal_withheld + input.estimated_payments + additional_medicare_withholding_credit;
    let federal_balance_due = federal_total_tax - federal_credits;

    // ---- California ----
    // Start from federal AGI; add back HSA contributions (California
    // does not conform; W-2 code W amounts never reached box 1) and
    // subtract Treasury interest (exempt)
    let w2_hsa: Decimal = input
        .wages
        .iter()
        .map(|w| w.box12.get("W").copied().unwrap_or(Decimal::ZERO))
        .sum();
    let ca_agi = agi + input.hsa_contributions + w2_hsa - treasury_interest;
    let ca_standard = brackets::ca_standard_deduction(year, status)?;
    let ca_itemized = input
        .itemized
        .as_ref()
        .map(|items| deductions::assemble_california(items, ca_agi));
    let ca_itemized_total = ca_itemized
        .as_ref()
        .map(|c| c.total)
        .unwrap_or(Decimal::ZERO);
    let ca_used_itemized = ca_itemized_total > ca_standard;
    let ca_deduction_used = ca_itemized_total.max(ca_standard);
    let ca_taxable_income = (ca_agi - ca_deduction_used).max(Decimal::ZERO);

    let ca_table = brackets::california_brackets(year, status)?;
    let ca_base_tax = ca_table.tax(ca_taxable_income);
    let ca_mental_health_tax =
        (ca_taxable_income - MENTAL_HEALTH_THRESHOLD).max(Decimal::ZERO) * MENTAL_HEALTH_RATE;
    let ca_total_tax = ca_base_tax + ca_mental_health_tax;
    let ca_balance_due = ca_total_tax - state_withheld - input.ca_estimated_payments;

    Ok(TaxEstimate {
        year,
        filing_status: status,
        wages,
        interest_income,
        ordinary_dividends,
        qualified_dividends,
        capital_gain_distributions,
        short_term_gain: netting.short_term,
        long_term_gain: netting.long_term,
        capital_loss_deduction: netting.deduction,
        capital_loss_carryforward: netting.carryforward,
        sale_ordinary_income,
        total_income,
        agi,
        standard_deduction,
        federal_itemized,
        deduction_used,
        used_itemized,
        section_199a_deduction,
        taxable_income,
        preferential_income,
        ordinary_taxable,
        ordinary_tax,
        preferential_tax,
        net_investment_income_tax,
        amt_preference,
        amti,
        tentative_minimum_tax,
        amt,
        amt_credit_used,
        amt_credit_carryforward,
        additional_medicare_tax,
        additional_medicare_withholding_credit,
        foreign_tax_credit,
        federal_total_tax,
        federal_withheld,
        federal_estimated_payments: input.estimated_payments,
        federal_balance_due,
        ca_agi,
        ca_itemized,
        ca_deduction_used,
        ca_used_itemized,
        ca_taxable_income,
        ca_base_tax,
        ca_mental_health_tax,
        ca_total_tax,
        ca_withheld: state_withheld,
        ca_estimated_payments: input.ca_estimated_payments,
        ca_balance_due,
        combined_total_tax: federal_total_tax + ca_total_tax,
        warnings,
    })
}
