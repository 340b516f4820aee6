use anyhow::Result;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::PriorityThresholds;
use crate::estimator::{self, EstimateInput, TaxEstimate};
use crate::models::{
    holding_period, AdjustmentCode, EquityClass, EquityEvent, FilingStatus, Form8949Box,
    HoldingPeriod, Lot, Priority, PurchaseStatement, RiskLevel, SaleResult, StrategyCategory,
    StrategyRecommendation,
};
use crate::store::RecordStore;

// The strategy engine. Every analyzer perturbs a clone of the estimator
// input and re-runs the estimator; the delta against the baseline is the
// estimated savings. No analyzer reimplements a tax rule, so NIIT
// thresholds, AMT headroom, stacking, and California non-conformity are
// priced exactly once, in the estimator.

/// Employee-deferral limit for workplace retirement plans
fn retirement_limit(year: i32, age: Option<u32>) -> Decimal {
    let base = match year {
        2023 => dec!(22500),
        2024 => dec!(23000),
        _ => dec!(23500),
    };
    let catch_up = match year {
        2023 => dec!(7500),
        _ => dec!(7500),
    };
    if age.map(|a| a >= 50).unwrap_or(false) {
        base + catch_up
    } else {
        base
    }
}

/// Self-only HSA contribution limit
fn hsa_limit(year: i32) -> Decimal {
    match year {
        2023 => dec!(3850),
        2024 => dec!(4150),
        _ => dec!(4300),
    }
}

/// Approximate federal underpayment-penalty rate
const UNDERPAYMENT_RATE: Decimal = dec!(0.08);

/// User-supplied facts the record store cannot know
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyInputs {
    /// Current share prices by ticker (no market feed; supplied offline)
    pub current_prices: HashMap<String, Decimal>,
    pub retirement_contributed: Decimal,
    pub hsa_contributed: Decimal,
    pub age: Option<u32>,
    /// Last year's total tax, for the safe-harbor test
    pub prior_year_total_tax: Option<Decimal>,
    /// Expected ordinary income next year, for shifting analyses
    pub projected_next_year_income: Option<Decimal>,
    /// Typical annual charitable giving, for the bunching comparison
    pub charitable_annual_giving: Decimal,
    /// A sale the taxpayer is planning, for lot-selection comparison
    pub planned_sale: Option<PlannedSale>,
    /// The date the analysis runs "as of"
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSale {
    pub ticker: String,
    pub shares: Decimal,
}

/// Everything the analyzers see
pub struct StrategyContext<'a> {
    pub baseline: &'a TaxEstimate,
    pub input: &'a EstimateInput,
    pub lots: &'a [Lot],
    pub events: &'a [EquityEvent],
    pub purchases: &'a [PurchaseStatement],
    pub user: &'a StrategyInputs,
    pub thresholds: &'a PriorityThresholds,
}

impl<'a> StrategyContext<'a> {
    fn as_of(&self) -> NaiveDate {
        self.user
            .as_of
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.input.year, 12, 1).unwrap())
    }

    fn year_end(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.input.year, 12, 31).unwrap()
    }

    fn price_of(&self, ticker: &str) -> Option<Decimal> {
        self.user.current_prices.get(ticker).copied()
    }

    /// Re-run the estimator on a perturbed copy of the input; positive
    /// means the perturbation saves tax
    fn savings_from(&self, mutate: impl FnOnce(&mut EstimateInput)) -> Result<Decimal> {
        let mut perturbed = self.input.clone();
        mutate(&mut perturbed);
        let alternative = estimator::estimate(&perturbed)?;
        Ok(self.baseline.combined_total_tax - alternative.combined_total_tax)
    }

    fn priority_for_savings(&self, savings: Decimal) -> Priority {
        if savings >= self.thresholds.high_savings {
            Priority::High
        } else if savings >= self.thresholds.medium_savings {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// The ordered output of one strategy run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub year: i32,
    pub recommendations: Vec<StrategyRecommendation>,
    pub warnings: Vec<String>,
}

/// A synthetic disposition used to model a what-if sale. Basis identity
/// holds by construction so the estimator treats it like a real result.
fn synthetic_result(
    ticker: &str,
    holding: HoldingPeriod,
    gain: Decimal,
    sale_date: NaiveDate,
) -> SaleResult {
    let proceeds = gain.abs() + dec!(10000);
    let basis = proceeds - gain;
    SaleResult {
        sale_id: format!("what-if-{}", ticker),
        lot_id: format!("what-if-{}", ticker),
        security: crate::models::Security::new(ticker, ticker),
        acquisition_date: sale_date - Duration::days(400),
        sale_date,
        shares: dec!(1),
        proceeds,
        broker_reported_basis: basis,
        corrected_basis: basis,
        adjustment_amount: Decimal::ZERO,
        adjustment_code: AdjustmentCode::None,
        holding_period: holding,
        category: Form8949Box::A,
        gain_loss: gain,
        ordinary_income: Decimal::ZERO,
        amt_adjustment: Decimal::ZERO,
        wash_sale_disallowed: Decimal::ZERO,
        wash_replacement_lot: None,
        notes: Vec::new(),
    }
}

/// Next VEST / EXERCISE / PURCHASE of `ticker` on or after `from`
fn next_acquisition(
    events: &[EquityEvent],
    ticker: &str,
    from: NaiveDate,
) -> Option<NaiveDate> {
    events
        .iter()
        .filter(|e| e.event_type.is_acquisition() && e.security.ticker == ticker && e.date >= from)
        .map(|e| e.date)
        .min()
}

/// Unrealized loss candidates: open lots priced below basis
struct LossCandidate<'a> {
    lot: &'a Lot,
    price: Decimal,
    loss: Decimal,
    holding: HoldingPeriod,
}

fn loss_candidates<'a>(ctx: &'a StrategyContext) -> Vec<LossCandidate<'a>> {
    let as_of = ctx.as_of();
    ctx.lots
        .iter()
        .filter(|lot| !lot.is_exhausted())
        .filter_map(|lot| {
            let price = ctx.price_of(&lot.security.ticker)?;
            let loss = (lot.cost_per_share() - price) * lot.shares_remaining;
            if loss <= Decimal::ZERO {
                return None;
            }
            Some(LossCandidate {
                lot,
                price,
                loss,
                holding: holding_period(lot.acquisition_date, as_of),
            })
        })
        .collect()
}

// ---- Current-year analyzers ----

fn analyze_tax_loss_harvesting(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let candidates = loss_candidates(ctx);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let as_of = ctx.as_of();
    let short_loss: Decimal = candidates
        .iter()
        .filter(|c| c.holding == HoldingPeriod::Short)
        .map(|c| c.loss)
        .sum();
    let long_loss: Decimal = candidates
        .iter()
        .filter(|c| c.holding == HoldingPeriod::Long)
        .map(|c| c.loss)
        .sum();

    let savings = ctx.savings_from(|input| {
        if short_loss > Decimal::ZERO {
            input.sale_results.push(synthetic_result(
                "HARVEST-ST",
                HoldingPeriod::Short,
                -short_loss,
                as_of,
            ));
        }
        if long_loss > Decimal::ZERO {
            input.sale_results.push(synthetic_result(
                "HARVEST-LT",
                HoldingPeriod::Long,
                -long_loss,
                as_of,
            ));
        }
    })?;
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    // A vest or purchase landing inside the 61-day window would disallow
    // the harvested loss
    let mut wash_conflicts = Vec::new();
    let mut deadline = ctx.year_end();
    for candidate in &candidates {
        if let Some(vest) = next_acquisition(ctx.events, &candidate.lot.security.ticker, as_of) {
            let last_safe_sale = vest - Duration::days(31);
            if last_safe_sale < deadline {
                deadline = last_safe_sale;
            }
            if vest - as_of <= Duration::days(30) {
                wash_conflicts.push(format!(
                    "{} has an acquisition scheduled {}; selling now would be a wash sale",
                    candidate.lot.security.ticker, vest
                ));
            }
        }
    }

    let mut action_steps = vec![format!(
        "Sell the {} loss lot(s) before {} to realize {} of losses",
        candidates.len(),
        deadline,
        short_loss + long_loss
    )];
    action_steps.push("Do not repurchase the same security within 30 days".to_string());
    action_steps.extend(wash_conflicts.iter().cloned());

    let largest = candidates
        .iter()
        .max_by_key(|c| c.loss)
        .expect("candidates nonempty");

    Ok(vec![StrategyRecommendation {
        name: "Tax-loss harvesting".to_string(),
        category: StrategyCategory::CurrentYear,
        priority: ctx.priority_for_savings(savings),
        situation: format!(
            "{} open lot(s) trade below basis, led by {} at {} against basis {}; {} short-term and {} long-term losses are available",
            candidates.len(),
            largest.lot.security.ticker,
            largest.price,
            largest.lot.cost_per_share(),
            short_loss,
            long_loss
        ),
        mechanism: "Realized losses first absorb gains of the same character, then offset up to 3,000 of ordinary income; the rest carries forward".to_string(),
        estimated_savings: savings,
        action_steps,
        deadline: Some(deadline),
        risk: if wash_conflicts.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::Moderate
        },
        california_note: Some(
            "California allows the same loss but taxes all gains at ordinary rates, so the state-side benefit can exceed the federal one".to_string(),
        ),
        citation: "IRC §1211; IRC §1091".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_retirement_max(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let limit = retirement_limit(ctx.input.year, ctx.user.age);
    let room = limit - ctx.user.retirement_contributed;
    if room <= Decimal::ZERO || ctx.baseline.wages < room {
        return Ok(Vec::new());
    }

    let savings = ctx.savings_from(|input| {
        if let Some(wage) = input.wages.first_mut() {
            wage.wages -= room;
            wage.state_wages -= room;
        }
    })?;
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    Ok(vec![StrategyRecommendation {
        name: "Retirement-account maximization".to_string(),
        category: StrategyCategory::CurrentYear,
        priority: ctx.priority_for_savings(savings),
        situation: format!(
            "{} of unused deferral room remains against the {} limit",
            room, limit
        ),
        mechanism: "Pre-tax deferrals come out of both federal and California wages at your top marginal rates".to_string(),
        estimated_savings: savings,
        action_steps: vec![format!(
            "Raise payroll deferrals to contribute the remaining {} before the final pay period",
            room
        )],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Low,
        california_note: None,
        citation: "IRC §402(g)".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_hsa_max(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let limit = hsa_limit(ctx.input.year);
    let room = limit - ctx.user.hsa_contributed;
    if room <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    let savings = ctx.savings_from(|input| {
        if let Some(wage) = input.wages.first_mut() {
            wage.wages -= room;
        }
        // California does not recognize HSA deductions; the add-back
        // cancels the state-side benefit
        input.hsa_contributions += room;
    })?;
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    Ok(vec![StrategyRecommendation {
        name: "Health-savings-account maximization".to_string(),
        category: StrategyCategory::CurrentYear,
        priority: ctx.priority_for_savings(savings),
        situation: format!("{} of HSA room remains against the {} limit", room, limit),
        mechanism: "HSA contributions reduce federal taxable income; growth and qualified withdrawals stay untaxed".to_string(),
        estimated_savings: savings,
        action_steps: vec![format!("Contribute the remaining {} to the HSA", room)],
        deadline: NaiveDate::from_ymd_opt(ctx.input.year + 1, 4, 15),
        risk: RiskLevel::Low,
        california_note: Some(
            "California adds HSA contributions back to income, so the savings shown are federal-only".to_string(),
        ),
        citation: "IRC §223".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_charitable_bunching(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let annual = ctx.user.charitable_annual_giving;
    if annual <= Decimal::ZERO || ctx.baseline.used_itemized {
        return Ok(Vec::new());
    }

    // Pull next year's planned gift into this year and itemize
    let savings = ctx.savings_from(|input| {
        let mut items = input.itemized.clone().unwrap_or_default();
        items.charitable_cash += annual * dec!(2);
        input.itemized = Some(items);
    })?;
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    Ok(vec![StrategyRecommendation {
        name: "Charitable bunching".to_string(),
        category: StrategyCategory::CurrentYear,
        priority: ctx.priority_for_savings(savings),
        situation: format!(
            "Annual giving of {} is absorbed by the standard deduction ({})",
            annual, ctx.baseline.standard_deduction
        ),
        mechanism: "Grouping two years of gifts into one year lifts itemized deductions past the standard deduction; the off year still takes the full standard deduction".to_string(),
        estimated_savings: savings,
        action_steps: vec![
            format!("Give {} (two years of gifts) before December 31", annual * dec!(2)),
            "Consider a donor-advised fund to keep grant timing flexible".to_string(),
        ],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Low,
        california_note: None,
        citation: "IRC §170".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_salt_cap(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let Some(itemized) = ctx.baseline.federal_itemized.as_ref() else {
        return Ok(Vec::new());
    };
    let unusable = itemized.salt_uncapped - itemized.salt_deducted;
    if unusable <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    Ok(vec![StrategyRecommendation {
        name: "State-and-local-tax cap".to_string(),
        category: StrategyCategory::CurrentYear,
        priority: Priority::Low,
        situation: format!(
            "{} of state and local tax exceeds the {} federal cap and deducts nothing",
            unusable, itemized.salt_deducted
        ),
        mechanism: "Amounts above the cap are permanently lost to the federal schedule; prepaying property tax has no federal effect".to_string(),
        estimated_savings: Decimal::ZERO,
        action_steps: vec![
            "Do not accelerate state tax payments expecting a federal deduction".to_string(),
        ],
        deadline: None,
        risk: RiskLevel::Low,
        california_note: Some(
            "California itemizes property taxes without a cap, but never its own income tax".to_string(),
        ),
        citation: "IRC §164(b)(6)".to_string(),
        interactions: Vec::new(),
    }])
}

// ---- Equity-compensation analyzers ----

fn analyze_espp_holding(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let as_of = ctx.as_of();
    let mut recommendations = Vec::new();

    for lot in ctx.lots.iter().filter(|l| {
        l.equity_class == EquityClass::Espp && !l.is_exhausted()
    }) {
        let Some(purchase) = ctx
            .purchases
            .iter()
            .find(|p| p.purchase_date == lot.acquisition_date)
        else {
            continue;
        };
        let qualify_date = crate::models::add_years(purchase.offering_date, 2)
            .max(crate::models::add_years(purchase.purchase_date, 1))
            .succ_opt()
            .unwrap_or(as_of);
        if qualify_date <= as_of {
            continue;
        }
        let Some(price) = ctx.price_of(&lot.security.ticker) else {
            continue;
        };

        let shares = lot.shares_remaining;
        let purchase_price = purchase.purchase_price_per_share;

        // Selling today: compensation income is the full purchase-date
        // discount and the gain is short-term
        let now_oi = (purchase.fmv_at_purchase - purchase_price) * shares;
        let now_gain = (price - purchase.fmv_at_purchase) * shares;
        // Holding to qualify: income capped at the offering discount,
        // gain long-term (assuming the price holds)
        let later_oi = (price - purchase_price)
            .min(purchase.offering_discount_per_share())
            .max(Decimal::ZERO)
            * shares;
        let later_gain = (price - purchase_price) * shares - later_oi;

        let tax_now = ctx.savings_from(|input| {
            let mut result =
                synthetic_result(&lot.security.ticker, HoldingPeriod::Short, now_gain, as_of);
            result.ordinary_income = now_oi;
            input.sale_results.push(result);
        })?;
        let tax_later = ctx.savings_from(|input| {
            let mut result = synthetic_result(
                &lot.security.ticker,
                HoldingPeriod::Long,
                later_gain,
                qualify_date,
            );
            result.ordinary_income = later_oi;
            input.sale_results.push(result);
        })?;
        // savings_from returns baseline - alternative, so the cheaper
        // scenario has the larger value
        let savings = tax_later - tax_now;
        if savings <= Decimal::ZERO {
            continue;
        }

        recommendations.push(StrategyRecommendation {
            name: format!("ESPP holding period ({})", lot.security.ticker),
            category: StrategyCategory::EquityCompensation,
            priority: ctx.priority_for_savings(savings),
            situation: format!(
                "{} ESPP shares purchased {} become qualifying on {}",
                shares, purchase.purchase_date, qualify_date
            ),
            mechanism: "A qualifying disposition caps ordinary income at the offering discount and converts the rest to long-term gain".to_string(),
            estimated_savings: savings,
            action_steps: vec![format!(
                "Hold until {} before selling, unless concentration risk dominates",
                qualify_date
            )],
            deadline: Some(qualify_date),
            risk: RiskLevel::Moderate,
            california_note: Some(
                "California taxes the capital-gain portion at ordinary rates either way; the savings come from the federal side".to_string(),
            ),
            citation: "IRC §423".to_string(),
            interactions: Vec::new(),
        });
    }
    Ok(recommendations)
}

/// Binary-search the largest ISO exercise spread that leaves AMT at zero
fn amt_free_headroom(ctx: &StrategyContext) -> Result<Decimal> {
    let amt_with = |spread: Decimal| -> Result<Decimal> {
        let mut perturbed = ctx.input.clone();
        let mut result = synthetic_result("ISO-EXERCISE", HoldingPeriod::Short, Decimal::ZERO, ctx.as_of());
        result.amt_adjustment = spread;
        perturbed.sale_results.push(result);
        Ok(estimator::estimate(&perturbed)?.amt)
    };

    if amt_with(dec!(1))? > Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let cap = dec!(4000000);
    if amt_with(cap)? == Decimal::ZERO {
        return Ok(cap);
    }

    let mut low = dec!(1);
    let mut high = cap;
    while high - low > dec!(1) {
        let mid = ((low + high) / dec!(2)).floor();
        if mid <= low {
            break;
        }
        if amt_with(mid)? == Decimal::ZERO {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok(low)
}

fn analyze_iso_exercise(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let holds_isos = ctx
        .lots
        .iter()
        .any(|l| l.equity_class == EquityClass::Iso)
        || ctx
            .events
            .iter()
            .any(|e| e.equity_class == EquityClass::Iso);
    if !holds_isos {
        return Ok(Vec::new());
    }

    let headroom = amt_free_headroom(ctx)?;
    let above_cost = ctx.savings_from(|input| {
        let mut result = synthetic_result(
            "ISO-EXERCISE",
            HoldingPeriod::Short,
            Decimal::ZERO,
            ctx.as_of(),
        );
        result.amt_adjustment = headroom + dec!(10000);
        input.sale_results.push(result);
    })?;
    // The delta is negative: exercising beyond headroom costs AMT now,
    // which returns later as a credit
    let cost_per_10k = (-above_cost).max(Decimal::ZERO);

    Ok(vec![StrategyRecommendation {
        name: "ISO exercise within AMT headroom".to_string(),
        category: StrategyCategory::EquityCompensation,
        priority: if headroom > Decimal::ZERO {
            Priority::Medium
        } else {
            Priority::Low
        },
        situation: format!(
            "Up to {} of ISO exercise spread fits under this year's AMT exemption with zero additional tax",
            headroom
        ),
        mechanism: "The exercise spread is an AMT preference; below the exemption headroom the tentative minimum tax stays under regular tax".to_string(),
        estimated_savings: Decimal::ZERO,
        action_steps: vec![
            format!("Exercise ISOs worth up to {} of spread before December 31", headroom),
            format!(
                "Each 10,000 of spread beyond that costs roughly {} of AMT now, recoverable later as a minimum-tax credit",
                cost_per_10k
            ),
        ],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Moderate,
        california_note: Some(
            "California repealed its AMT preference for ISOs; the headroom shown is federal".to_string(),
        ),
        citation: "IRC §55; IRC §422".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_rsu_loss_harvest(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let as_of = ctx.as_of();
    let candidates: Vec<_> = loss_candidates(ctx)
        .into_iter()
        .filter(|c| c.lot.equity_class == EquityClass::Rsu)
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let total_loss: Decimal = candidates.iter().map(|c| c.loss).sum();
    let savings = ctx.savings_from(|input| {
        for candidate in &candidates {
            input.sale_results.push(synthetic_result(
                &candidate.lot.security.ticker,
                candidate.holding,
                -candidate.loss,
                as_of,
            ));
        }
    })?;
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    let mut risk = RiskLevel::Low;
    let mut deadline = ctx.year_end();
    let mut steps = vec![format!(
        "Sell the underwater RSU shares to realize {} of losses",
        total_loss
    )];
    for candidate in &candidates {
        if let Some(vest) = next_acquisition(ctx.events, &candidate.lot.security.ticker, as_of) {
            let last_safe_sale = vest - Duration::days(31);
            deadline = deadline.min(last_safe_sale);
            risk = RiskLevel::Moderate;
            steps.push(format!(
                "A vest on {} counts as a replacement purchase; sell before {} or the loss is disallowed",
                vest, last_safe_sale
            ));
        }
    }

    Ok(vec![StrategyRecommendation {
        name: "RSU loss harvest".to_string(),
        category: StrategyCategory::EquityCompensation,
        priority: ctx.priority_for_savings(savings),
        situation: format!(
            "Vested RSU shares trade below their vest-date basis; {} of losses are available",
            total_loss
        ),
        mechanism: "RSU shares carry the vest-date FMV as basis, so a decline since vest is a deductible capital loss; scheduled vests are replacement shares for the wash-sale rule".to_string(),
        estimated_savings: savings,
        action_steps: steps,
        deadline: Some(deadline),
        risk,
        california_note: None,
        citation: "IRC §1091".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_nso_timing(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let Some(projected) = ctx.user.projected_next_year_income else {
        return Ok(Vec::new());
    };
    let holds_nsos = ctx
        .lots
        .iter()
        .any(|l| l.equity_class == EquityClass::Nso)
        || ctx
            .events
            .iter()
            .any(|e| e.equity_class == EquityClass::Nso);
    if !holds_nsos {
        return Ok(Vec::new());
    }

    let table = crate::brackets::federal_brackets(ctx.input.year, ctx.input.filing_status)?;
    let current_rate = table.marginal_rate(ctx.baseline.ordinary_taxable);
    let projected_rate = table.marginal_rate(projected);
    if current_rate == projected_rate {
        return Ok(Vec::new());
    }

    let (cheaper_year, diff) = if projected_rate < current_rate {
        ("next year", current_rate - projected_rate)
    } else {
        ("this year", projected_rate - current_rate)
    };

    Ok(vec![StrategyRecommendation {
        name: "NSO exercise timing".to_string(),
        category: StrategyCategory::EquityCompensation,
        priority: Priority::Medium,
        situation: format!(
            "Marginal rate is {} this year against {} on projected income next year",
            current_rate, projected_rate
        ),
        mechanism: "NSO spread is ordinary income in the exercise year; exercising in the lower-rate year keeps the spread out of the higher bracket".to_string(),
        estimated_savings: Decimal::ZERO,
        action_steps: vec![format!(
            "Prefer exercising NSOs {}; each 10,000 of spread saves roughly {}",
            cheaper_year,
            (diff * dec!(10000)).round_dp(0)
        )],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Moderate,
        california_note: None,
        citation: "IRC §83".to_string(),
        interactions: Vec::new(),
    }])
}

// ---- Capital-gains analyzers ----

fn analyze_holding_period_ripening(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let as_of = ctx.as_of();
    let mut recommendations = Vec::new();

    for lot in ctx.lots.iter().filter(|l| !l.is_exhausted()) {
        let ripens = lot.long_term_date();
        if ripens <= as_of || ripens - as_of > Duration::days(90) {
            continue;
        }
        let Some(price) = ctx.price_of(&lot.security.ticker) else {
            continue;
        };
        let gain = (price - lot.cost_per_share()) * lot.shares_remaining;
        if gain <= Decimal::ZERO {
            continue;
        }

        let sell_now = ctx.savings_from(|input| {
            input.sale_results.push(synthetic_result(
                &lot.security.ticker,
                HoldingPeriod::Short,
                gain,
                as_of,
            ));
        })?;
        let sell_ripe = ctx.savings_from(|input| {
            input.sale_results.push(synthetic_result(
                &lot.security.ticker,
                HoldingPeriod::Long,
                gain,
                ripens,
            ));
        })?;
        let savings = sell_ripe - sell_now;
        if savings <= Decimal::ZERO {
            continue;
        }

        recommendations.push(StrategyRecommendation {
            name: format!("Holding period ripening ({})", lot.security.ticker),
            category: StrategyCategory::CapitalGains,
            priority: ctx.priority_for_savings(savings),
            situation: format!(
                "Lot {} turns long-term on {} ({} days) with {} of unrealized gain",
                lot.id,
                ripens,
                (ripens - as_of).num_days(),
                gain
            ),
            mechanism: "Waiting past the one-year mark moves the gain from ordinary rates to the preferential schedule".to_string(),
            estimated_savings: savings,
            action_steps: vec![format!("Defer any sale of lot {} until {}", lot.id, ripens)],
            deadline: Some(ripens),
            risk: RiskLevel::Moderate,
            california_note: Some(
                "California taxes the gain at ordinary rates regardless of holding period".to_string(),
            ),
            citation: "IRC §1(h)".to_string(),
            interactions: Vec::new(),
        });
    }
    Ok(recommendations)
}

fn analyze_specific_identification(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let Some(planned) = ctx.user.planned_sale.as_ref() else {
        return Ok(Vec::new());
    };
    let Some(price) = ctx.price_of(&planned.ticker) else {
        return Ok(Vec::new());
    };
    let as_of = ctx.as_of();

    let mut open: Vec<&Lot> = ctx
        .lots
        .iter()
        .filter(|l| l.security.ticker == planned.ticker && !l.is_exhausted())
        .collect();
    if open.is_empty() {
        return Ok(Vec::new());
    }

    let simulate = |ordering: &[&Lot]| -> Result<Decimal> {
        let mut remaining = planned.shares;
        let mut results = Vec::new();
        for lot in ordering {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(lot.shares_remaining);
            remaining -= take;
            let gain = (price - lot.cost_per_share()) * take;
            results.push(synthetic_result(
                &lot.security.ticker,
                holding_period(lot.acquisition_date, as_of),
                gain,
                as_of,
            ));
        }
        ctx.savings_from(|input| input.sale_results.extend(results))
    };

    open.sort_by_key(|l| l.acquisition_date);
    let fifo = simulate(&open)?;

    let mut by_basis = open.clone();
    by_basis.sort_by(|a, b| b.cost_per_share().cmp(&a.cost_per_share()));
    let highest_basis = simulate(&by_basis)?;

    let mut loss_first = open.clone();
    loss_first.sort_by(|a, b| {
        let loss_a = price - a.cost_per_share();
        let loss_b = price - b.cost_per_share();
        loss_a.cmp(&loss_b)
    });
    let loss_first_outcome = simulate(&loss_first)?;

    // savings_from is baseline-minus-alternative, so the largest value
    // is the cheapest lot selection
    let best = fifo.max(highest_basis).max(loss_first_outcome);
    let savings = best - fifo;
    let best_name = if best == loss_first_outcome && best != fifo {
        "loss-first"
    } else if best == highest_basis && best != fifo {
        "highest-basis-first"
    } else {
        "FIFO"
    };
    if savings <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    Ok(vec![StrategyRecommendation {
        name: format!("Specific identification ({})", planned.ticker),
        category: StrategyCategory::CapitalGains,
        priority: ctx.priority_for_savings(savings),
        situation: format!(
            "Selling {} shares of {} by {} instead of FIFO changes the realized gain mix",
            planned.shares, planned.ticker, best_name
        ),
        mechanism: "Naming the specific lots sold controls which basis and holding period the sale consumes".to_string(),
        estimated_savings: savings,
        action_steps: vec![
            format!("Instruct the broker to sell by {} lot selection", best_name),
            "Get written confirmation of the identified lots at or before settlement".to_string(),
        ],
        deadline: None,
        risk: RiskLevel::Low,
        california_note: None,
        citation: "Treas. Reg. §1.1012-1(c)".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_wash_sale_avoidance(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let mut recommendations = Vec::new();

    let committed: Vec<_> = ctx
        .input
        .sale_results
        .iter()
        .filter(|r| r.wash_sale_disallowed > Decimal::ZERO)
        .collect();
    if !committed.is_empty() {
        let disallowed: Decimal = committed.iter().map(|r| r.wash_sale_disallowed).sum();
        recommendations.push(StrategyRecommendation {
            name: "Wash sales already triggered".to_string(),
            category: StrategyCategory::CapitalGains,
            priority: Priority::Critical,
            situation: format!(
                "{} sale(s) this year had {} of losses disallowed by replacement purchases",
                committed.len(),
                disallowed
            ),
            mechanism: "The disallowed loss moved into the replacement lot's basis; it returns only when that lot is sold".to_string(),
            estimated_savings: Decimal::ZERO,
            action_steps: vec![
                "Pause automatic reinvestment and vest-adjacent sales of the affected tickers".to_string(),
                "Review the replacement lots before selling them so the deferred loss is not missed".to_string(),
            ],
            deadline: None,
            risk: RiskLevel::High,
            california_note: None,
            citation: "IRC §1091".to_string(),
            interactions: Vec::new(),
        });
    }

    // Forward-looking: a loss sale inside the last 30 days makes any
    // repurchase before day 31 a wash
    let as_of = ctx.as_of();
    for result in ctx.input.sale_results.iter() {
        if result.gain_loss >= Decimal::ZERO || result.wash_sale_disallowed > Decimal::ZERO {
            continue;
        }
        let window_closes = result.sale_date + Duration::days(31);
        if result.sale_date <= as_of && as_of < window_closes {
            recommendations.push(StrategyRecommendation {
                name: format!("Open wash-sale window ({})", result.security.ticker),
                category: StrategyCategory::CapitalGains,
                priority: Priority::High,
                situation: format!(
                    "A {} loss on {} was realized {}; buying it back before {} disallows the loss",
                    -result.gain_loss, result.security.ticker, result.sale_date, window_closes
                ),
                mechanism: "Replacement shares within 30 days of a loss sale trigger the wash-sale rule across all accounts, including vests and plan purchases".to_string(),
                estimated_savings: Decimal::ZERO,
                action_steps: vec![format!(
                    "Do not acquire {} in any account before {}",
                    result.security.ticker, window_closes
                )],
                deadline: Some(window_closes),
                risk: RiskLevel::High,
                california_note: None,
                citation: "IRC §1091".to_string(),
                interactions: Vec::new(),
            });
        }
    }
    Ok(recommendations)
}

fn analyze_niit_threshold(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let niit = ctx.baseline.net_investment_income_tax;
    if niit <= Decimal::ZERO {
        return Ok(Vec::new());
    }
    let threshold = crate::brackets::niit_threshold(ctx.input.filing_status);
    let excess = ctx.baseline.agi - threshold;

    Ok(vec![StrategyRecommendation {
        name: "Net-investment-income surtax exposure".to_string(),
        category: StrategyCategory::CapitalGains,
        priority: ctx.priority_for_savings(niit),
        situation: format!(
            "AGI exceeds the {} threshold by {}; {} of surtax applies",
            threshold, excess, niit
        ),
        mechanism: "Every investment dollar above the threshold bears an extra 3.8%; deferring gains or accelerating deductions below the threshold removes it".to_string(),
        estimated_savings: niit,
        action_steps: vec![
            "Weigh deferring further gain realization into a lower-AGI year".to_string(),
            "Pre-tax deferrals reduce the AGI side of the comparison".to_string(),
        ],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Low,
        california_note: Some("California has no equivalent surtax".to_string()),
        citation: "IRC §1411".to_string(),
        interactions: Vec::new(),
    }])
}

// ---- Multi-year analyzers ----

fn analyze_income_shifting(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let Some(projected) = ctx.user.projected_next_year_income else {
        return Ok(Vec::new());
    };
    let table = crate::brackets::federal_brackets(ctx.input.year, ctx.input.filing_status)?;
    let current_rate = table.marginal_rate(ctx.baseline.ordinary_taxable);
    let projected_rate = table.marginal_rate(projected);
    let diff = (current_rate - projected_rate).abs();
    if diff < dec!(0.02) {
        return Ok(Vec::new());
    }

    let direction = if projected_rate < current_rate {
        "defer income into next year and accelerate deductions into this year"
    } else {
        "accelerate income into this year and defer deductions"
    };

    Ok(vec![StrategyRecommendation {
        name: "Cross-year income shifting".to_string(),
        category: StrategyCategory::MultiYear,
        priority: Priority::Medium,
        situation: format!(
            "Marginal rate {} this year against {} projected next year",
            current_rate, projected_rate
        ),
        mechanism: "Shifting flexible income (bonuses, option exercises, gain realization) toward the lower-rate year captures the bracket difference".to_string(),
        estimated_savings: (diff * dec!(10000)).round_dp(0),
        action_steps: vec![format!(
            "Where timing is controllable, {} (savings shown per 10,000 shifted)",
            direction
        )],
        deadline: Some(ctx.year_end()),
        risk: RiskLevel::Moderate,
        california_note: None,
        citation: "IRC §451".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_amt_credit_use(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    if ctx.input.amt_credit_carryover <= Decimal::ZERO {
        return Ok(Vec::new());
    }
    let used = ctx.baseline.amt_credit_used;
    let remaining = ctx.baseline.amt_credit_carryforward;

    Ok(vec![StrategyRecommendation {
        name: "Minimum-tax credit recovery".to_string(),
        category: StrategyCategory::MultiYear,
        priority: if used > Decimal::ZERO {
            ctx.priority_for_savings(used)
        } else {
            Priority::Low
        },
        situation: format!(
            "{} of minimum-tax credit is carried in; {} is usable this year, {} carries forward",
            ctx.input.amt_credit_carryover, used, remaining
        ),
        mechanism: "The credit offsets regular tax down to the tentative minimum tax; years with little or no AMT preference recover the most".to_string(),
        estimated_savings: used,
        action_steps: vec![
            "File Form 8801 to claim the credit".to_string(),
            "Avoid stacking new ISO exercises in a planned recovery year".to_string(),
        ],
        deadline: None,
        risk: RiskLevel::Low,
        california_note: None,
        citation: "IRC §53".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_loss_carryforward(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let carryforward = ctx.baseline.capital_loss_carryforward;
    if carryforward <= Decimal::ZERO {
        return Ok(Vec::new());
    }
    let cap = crate::brackets::capital_loss_cap(ctx.input.filing_status);
    let years_to_absorb = (carryforward / cap).ceil();

    Ok(vec![StrategyRecommendation {
        name: "Capital-loss carryforward plan".to_string(),
        category: StrategyCategory::MultiYear,
        priority: Priority::Medium,
        situation: format!(
            "{} of net loss carries forward; against ordinary income alone it takes about {} year(s) to absorb",
            carryforward, years_to_absorb
        ),
        mechanism: "Carryforward losses offset future gains dollar-for-dollar without the annual cap, so realizing appreciated positions against them is tax-free rebalancing".to_string(),
        estimated_savings: Decimal::ZERO,
        action_steps: vec![format!(
            "Consider realizing up to {} of gains next year to use the shield immediately",
            carryforward
        )],
        deadline: None,
        risk: RiskLevel::Low,
        california_note: Some(
            "California tracks its own carryforward; keep both schedules".to_string(),
        ),
        citation: "IRC §1212".to_string(),
        interactions: Vec::new(),
    }])
}

fn analyze_safe_harbor(ctx: &StrategyContext) -> Result<Vec<StrategyRecommendation>> {
    let total_paid = ctx.baseline.federal_withheld + ctx.baseline.federal_estimated_payments;
    let current_floor = ctx.baseline.federal_total_tax * dec!(0.9);
    let required = match ctx.user.prior_year_total_tax {
        Some(prior) => current_floor.min(prior * dec!(1.1)),
        None => current_floor,
    };
    let shortfall = required - total_paid;
    if shortfall <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    let priority = if shortfall > ctx.thresholds.critical_underpayment {
        Priority::Critical
    } else {
        Priority::High
    };

    Ok(vec![StrategyRecommendation {
        name: "Estimated-payment safe harbor".to_string(),
        category: StrategyCategory::MultiYear,
        priority,
        situation: format!(
            "Payments of {} fall {} short of the {} safe-harbor floor",
            total_paid, shortfall, required
        ),
        mechanism: "Paying the lesser of 90% of this year's tax or 110% of last year's stops the underpayment penalty from accruing".to_string(),
        estimated_savings: (shortfall * UNDERPAYMENT_RATE).round_dp(0),
        action_steps: vec![
            format!("Make an estimated payment of {} by January 15", shortfall),
            "A W-4 withholding increase counts as paid evenly through the year".to_string(),
        ],
        deadline: NaiveDate::from_ymd_opt(ctx.input.year + 1, 1, 15),
        risk: RiskLevel::Low,
        california_note: Some(
            "California requires 90%/110% too, with weighted quarterly installments".to_string(),
        ),
        citation: "IRC §6654".to_string(),
        interactions: Vec::new(),
    }])
}

/// Pairs of recommendations that move the same levers; each side learns
/// about the other before the user acts on both at once
const INTERACTIONS: [(&str, &str, &str); 4] = [
    (
        "Retirement-account maximization",
        "ISO exercise within AMT headroom",
        "lowering wages changes the AMT exemption phase-out and headroom",
    ),
    (
        "Retirement-account maximization",
        "Net-investment-income surtax exposure",
        "deferrals reduce the AGI side of the surtax threshold",
    ),
    (
        "Tax-loss harvesting",
        "Net-investment-income surtax exposure",
        "harvested losses shrink net investment income directly",
    ),
    (
        "Tax-loss harvesting",
        "Capital-loss carryforward plan",
        "fresh losses extend the carryforward the plan is absorbing",
    ),
];

fn flag_interactions(recommendations: &mut [StrategyRecommendation]) {
    for (first, second, why) in INTERACTIONS {
        let has_first = recommendations
            .iter()
            .any(|r| r.name.starts_with(first));
        let has_second = recommendations
            .iter()
            .any(|r| r.name.starts_with(second));
        if !has_first || !has_second {
            continue;
        }
        for recommendation in recommendations.iter_mut() {
            if recommendation.name.starts_with(first) {
                recommendation
                    .interactions
                    .push(format!("{}: {}", second, why));
            } else if recommendation.name.starts_with(second) {
                recommendation
                    .interactions
                    .push(format!("{}: {}", first, why));
            }
        }
    }
}

/// Run every analyzer and rank the findings
pub fn run_all(ctx: &StrategyContext) -> Result<StrategyReport> {
    let analyzers: [fn(&StrategyContext) -> Result<Vec<StrategyRecommendation>>; 17] = [
        analyze_tax_loss_harvesting,
        analyze_retirement_max,
        analyze_hsa_max,
        analyze_charitable_bunching,
        analyze_salt_cap,
        analyze_espp_holding,
        analyze_iso_exercise,
        analyze_rsu_loss_harvest,
        analyze_nso_timing,
        analyze_holding_period_ripening,
        analyze_specific_identification,
        analyze_wash_sale_avoidance,
        analyze_niit_threshold,
        analyze_income_shifting,
        analyze_amt_credit_use,
        analyze_loss_carryforward,
        analyze_safe_harbor,
    ];

    let mut recommendations = Vec::new();
    for analyzer in analyzers {
        recommendations.extend(analyzer(ctx)?);
    }

    flag_interactions(&mut recommendations);
    recommendations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.estimated_savings.cmp(&a.estimated_savings))
    });

    Ok(StrategyReport {
        year: ctx.input.year,
        recommendations,
        warnings: ctx.baseline.warnings.clone(),
    })
}

/// Load records, build the baseline, and run the full analysis
pub fn run_for_year(
    store: &dyn RecordStore,
    year: i32,
    filing_status: FilingStatus,
    user: &StrategyInputs,
    thresholds: &PriorityThresholds,
) -> Result<StrategyReport> {
    let (input, mut warnings) = estimator::assemble_input(store, year, filing_status)?;
    let baseline = estimator::estimate(&input)?;
    let lots = store.get_lots()?;
    let events = store.get_events()?;
    let purchases = store.get_purchases()?;

    let ctx = StrategyContext {
        baseline: &baseline,
        input: &input,
        lots: &lots,
        events: &events,
        purchases: &purchases,
        user,
        thresholds,
    };
    let mut report = run_all(&ctx)?;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;
    Ok(report)
}
