use anyhow::{bail, Result};
use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Core data structures shared by the reconciliation, estimation, and
// strategy engines. These are pure values: constructors validate, derived
// properties compute, nothing here touches the store.

/// Tax filing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

impl Default for FilingStatus {
    fn default() -> Self {
        FilingStatus::Single
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilingStatus::Single => "Single",
            FilingStatus::MarriedFilingJointly => "Married Filing Jointly",
            FilingStatus::MarriedFilingSeparately => "Married Filing Separately",
            FilingStatus::HeadOfHousehold => "Head of Household",
        };
        write!(f, "{}", name)
    }
}

/// The four classes of employer equity compensation handled by the
/// basis-correction engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquityClass {
    /// Restricted stock units (income recognized at vest)
    Rsu,
    /// Nonqualified stock options (income recognized at exercise)
    Nso,
    /// Section 423 employee stock purchase plan shares
    Espp,
    /// Incentive stock options (dual regular/AMT basis)
    Iso,
}

impl fmt::Display for EquityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquityClass::Rsu => "RSU",
            EquityClass::Nso => "NSO",
            EquityClass::Espp => "ESPP",
            EquityClass::Iso => "ISO",
        };
        write!(f, "{}", name)
    }
}

/// Taxable or basis-establishing event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Vest,
    Exercise,
    Purchase,
    Sale,
    Dividend,
    Interest,
}

impl EventType {
    /// Whether events of this type acquire shares (and can therefore
    /// trigger wash-sale replacement treatment)
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            EventType::Vest | EventType::Exercise | EventType::Purchase
        )
    }
}

/// Stock identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    /// Ticker symbol (e.g. AAPL); `UNKNOWN` when the source document
    /// carried only a company name
    pub ticker: String,
    /// Company long name
    pub name: String,
    /// CUSIP when the broker reported one
    pub cusip: Option<String>,
}

impl Security {
    pub fn new(ticker: &str, name: &str) -> Self {
        Security {
            ticker: ticker.trim().to_uppercase(),
            name: name.trim().to_string(),
            cusip: None,
        }
    }

    /// Whether the ticker is usable for exact matching
    pub fn has_known_ticker(&self) -> bool {
        !self.ticker.is_empty() && self.ticker != "UNKNOWN"
    }

    /// Company name with common corporate suffixes and punctuation
    /// stripped, for fuzzy matching
    pub fn normalized_name(&self) -> String {
        let mut cleaned = self
            .name
            .to_uppercase()
            .replace([',', '.'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        for suffix in ["INCORPORATED", "CORPORATION", "INC", "CORP", "LTD", "CO"] {
            if let Some(stripped) = cleaned.strip_suffix(&format!(" {}", suffix)) {
                cleaned = stripped.trim_end().to_string();
            }
        }
        cleaned
    }
}

/// Cost basis carried by a lot. ISO lots carry a second, generally higher,
/// AMT basis established by the exercise-date spread; every other equity
/// class has a single basis figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LotBasis {
    Regular {
        cost_per_share: Decimal,
    },
    Dual {
        cost_per_share: Decimal,
        amt_cost_per_share: Decimal,
    },
}

impl LotBasis {
    pub fn cost_per_share(&self) -> Decimal {
        match self {
            LotBasis::Regular { cost_per_share } => *cost_per_share,
            LotBasis::Dual { cost_per_share, .. } => *cost_per_share,
        }
    }

    /// AMT cost per share; identical to the regular figure for
    /// single-basis lots
    pub fn amt_cost_per_share(&self) -> Decimal {
        match self {
            LotBasis::Regular { cost_per_share } => *cost_per_share,
            LotBasis::Dual {
                amt_cost_per_share, ..
            } => *amt_cost_per_share,
        }
    }
}

/// A cohort of shares acquired at one time with one basis per share
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: String,
    pub equity_class: EquityClass,
    pub security: Security,
    pub acquisition_date: NaiveDate,
    pub shares_acquired: Decimal,
    pub basis: LotBasis,
    /// Decremented by the reconciliation orchestrator as sales consume
    /// the lot; never goes negative
    pub shares_remaining: Decimal,
    /// Id of the VEST / EXERCISE / PURCHASE event that created this lot
    pub source_event_id: String,
    /// Import source that produced this record
    pub origin: String,
}

impl Lot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        equity_class: EquityClass,
        security: Security,
        acquisition_date: NaiveDate,
        shares_acquired: Decimal,
        basis: LotBasis,
        source_event_id: String,
        origin: String,
    ) -> Result<Self> {
        if shares_acquired <= Decimal::ZERO {
            bail!("Lot shares acquired must be positive");
        }
        if basis.cost_per_share() < Decimal::ZERO {
            bail!("Lot cost per share cannot be negative");
        }
        if matches!(equity_class, EquityClass::Iso) != matches!(basis, LotBasis::Dual { .. }) {
            bail!("Dual basis is carried by ISO lots and only ISO lots");
        }
        Ok(Lot {
            id,
            equity_class,
            security,
            acquisition_date,
            shares_acquired,
            basis,
            shares_remaining: shares_acquired,
            source_event_id,
            origin,
        })
    }

    pub fn cost_per_share(&self) -> Decimal {
        self.basis.cost_per_share()
    }

    pub fn amt_cost_per_share(&self) -> Decimal {
        self.basis.amt_cost_per_share()
    }

    pub fn is_exhausted(&self) -> bool {
        self.shares_remaining <= Decimal::ZERO
    }

    /// Spread a wash-sale basis increase across the whole lot
    pub fn add_basis_adjustment(&mut self, total: Decimal) {
        let per_share = total / self.shares_acquired;
        self.basis = match self.basis {
            LotBasis::Regular { cost_per_share } => LotBasis::Regular {
                cost_per_share: cost_per_share + per_share,
            },
            LotBasis::Dual {
                cost_per_share,
                amt_cost_per_share,
            } => LotBasis::Dual {
                cost_per_share: cost_per_share + per_share,
                amt_cost_per_share: amt_cost_per_share + per_share,
            },
        };
    }

    /// First day on which a sale of these shares is long-term
    pub fn long_term_date(&self) -> NaiveDate {
        add_years(self.acquisition_date, 1)
            .succ_opt()
            .unwrap_or(self.acquisition_date)
    }
}

/// Record of a taxable or basis-establishing event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityEvent {
    pub id: String,
    pub event_type: EventType,
    pub equity_class: EquityClass,
    pub security: Security,
    pub date: NaiveDate,
    pub shares: Decimal,
    /// Fair market value per share on the event date
    pub price_per_share: Decimal,
    pub strike_price: Option<Decimal>,
    pub purchase_price: Option<Decimal>,
    pub offering_date: Option<NaiveDate>,
    pub grant_date: Option<NaiveDate>,
    /// FMV per share on the offering date (ESPP only)
    pub fmv_at_offering: Option<Decimal>,
    /// Ordinary income recognized at the event, when the employer
    /// reported one
    pub ordinary_income: Option<Decimal>,
    pub origin: String,
}

/// Raw broker-reported disposition, as imported from a 1099-B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    /// Lot explicitly named by the source document, when present;
    /// reconciliation falls back to FIFO otherwise
    pub lot_id: Option<String>,
    pub security: Security,
    pub sale_date: NaiveDate,
    pub shares: Decimal,
    pub proceeds_per_share: Decimal,
    /// Basis as the broker reported it; frequently zero for equity
    /// compensation
    pub broker_reported_basis: Option<Decimal>,
    /// Wash-sale loss disallowed, as reported on the 1099-B
    pub wash_sale_disallowed: Decimal,
    pub received_1099: bool,
    pub basis_reported_to_irs: bool,
    pub origin: String,
}

impl Sale {
    pub fn total_proceeds(&self) -> Decimal {
        self.proceeds_per_share * self.shares
    }
}

/// Long/short holding classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingPeriod {
    Short,
    Long,
}

impl fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldingPeriod::Short => write!(f, "Short-term"),
            HoldingPeriod::Long => write!(f, "Long-term"),
        }
    }
}

/// Form 8949 reporting box. Short-term sales land in A (basis reported to
/// the IRS), B (1099 received, basis not reported), or C (no 1099);
/// long-term sales in D, E, F respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Form8949Box {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Form8949Box {
    pub fn select(holding: HoldingPeriod, basis_reported: bool, received_1099: bool) -> Self {
        match (holding, basis_reported, received_1099) {
            (HoldingPeriod::Short, true, true) => Form8949Box::A,
            (HoldingPeriod::Short, false, true) => Form8949Box::B,
            (HoldingPeriod::Short, _, false) => Form8949Box::C,
            (HoldingPeriod::Long, true, true) => Form8949Box::D,
            (HoldingPeriod::Long, false, true) => Form8949Box::E,
            (HoldingPeriod::Long, _, false) => Form8949Box::F,
        }
    }
}

impl fmt::Display for Form8949Box {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Column (f) adjustment code on Form 8949
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentCode {
    /// No adjustment required
    None,
    /// Basis shown on the 1099-B is wrong
    B,
    /// Broker reported zero basis to the IRS for a covered security
    E,
    /// Combined basis and wash-sale adjustment
    O,
    /// Wash-sale loss disallowed
    W,
}

impl fmt::Display for AdjustmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustmentCode::None => write!(f, ""),
            AdjustmentCode::B => write!(f, "B"),
            AdjustmentCode::E => write!(f, "e"),
            AdjustmentCode::O => write!(f, "O"),
            AdjustmentCode::W => write!(f, "W"),
        }
    }
}

/// Corrected disposition ready for Form 8949
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleResult {
    pub sale_id: String,
    pub lot_id: String,
    pub security: Security,
    pub acquisition_date: NaiveDate,
    pub sale_date: NaiveDate,
    pub shares: Decimal,
    pub proceeds: Decimal,
    pub broker_reported_basis: Decimal,
    pub corrected_basis: Decimal,
    /// corrected_basis - broker_reported_basis
    pub adjustment_amount: Decimal,
    pub adjustment_code: AdjustmentCode,
    pub holding_period: HoldingPeriod,
    pub category: Form8949Box,
    pub gain_loss: Decimal,
    /// Ordinary income recognized at sale (ESPP and disqualifying ISO
    /// dispositions)
    pub ordinary_income: Decimal,
    /// AMT income adjustment (ISO only; negative for qualifying sales
    /// reversing the exercise-year preference)
    pub amt_adjustment: Decimal,
    pub wash_sale_disallowed: Decimal,
    /// Lot whose basis absorbed the disallowed loss, when the wash-sale
    /// pass found a surviving replacement
    pub wash_replacement_lot: Option<String>,
    pub notes: Vec<String>,
}

/// Annual W-2 wage report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WageStatement {
    pub year: i32,
    pub employer: String,
    /// Box 1
    pub wages: Decimal,
    /// Box 2
    pub federal_withheld: Decimal,
    /// Box 5
    pub medicare_wages: Decimal,
    /// Box 6
    pub medicare_withheld: Decimal,
    /// Box 12 code map (e.g. W -> employer HSA contributions)
    pub box12: BTreeMap<String, Decimal>,
    /// Box 14 free-form map; may carry SDI / VPDI amounts
    pub box14: BTreeMap<String, Decimal>,
    /// Box 16
    pub state_wages: Decimal,
    /// Box 17
    pub state_withheld: Decimal,
}

/// 1099-DIV summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendStatement {
    pub year: i32,
    pub payer: String,
    pub ordinary_dividends: Decimal,
    pub qualified_dividends: Decimal,
    pub capital_gain_distributions: Decimal,
    pub foreign_tax_paid: Decimal,
    pub section_199a_dividends: Decimal,
    pub federal_withheld: Decimal,
}

/// 1099-INT summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestStatement {
    pub year: i32,
    pub payer: String,
    pub interest_income: Decimal,
    pub early_withdrawal_penalty: Decimal,
    /// Interest from U.S. Treasury obligations, exempt from California tax
    pub treasury_interest: Decimal,
    pub federal_withheld: Decimal,
}

/// Form 3921: employer record of one ISO exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseStatement {
    pub year: i32,
    pub grant_date: NaiveDate,
    pub exercise_date: NaiveDate,
    pub strike_per_share: Decimal,
    pub fmv_per_share: Decimal,
    pub shares: Decimal,
}

/// Form 3922: employer record of one ESPP purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseStatement {
    pub year: i32,
    pub offering_date: NaiveDate,
    pub purchase_date: NaiveDate,
    pub fmv_at_offering: Decimal,
    pub fmv_at_purchase: Decimal,
    pub purchase_price_per_share: Decimal,
    pub shares: Decimal,
}

impl PurchaseStatement {
    /// Per-share discount locked in at the offering date
    pub fn offering_discount_per_share(&self) -> Decimal {
        self.fmv_at_offering - self.purchase_price_per_share
    }
}

/// Structured Schedule A inputs supplied by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemizedDeductions {
    pub medical: Decimal,
    pub state_income_tax: Decimal,
    pub real_estate_tax: Decimal,
    pub personal_property_tax: Decimal,
    pub mortgage_interest: Decimal,
    pub mortgage_points: Decimal,
    pub investment_interest: Decimal,
    pub charitable_cash: Decimal,
    pub charitable_noncash: Decimal,
    pub charitable_carryover: Decimal,
    pub casualty_loss: Decimal,
    pub other: Decimal,
}

/// Priority for a strategy recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        };
        write!(f, "{}", name)
    }
}

/// Execution risk attached to a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
        };
        write!(f, "{}", name)
    }
}

/// Grouping used by the strategy report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyCategory {
    CurrentYear,
    EquityCompensation,
    CapitalGains,
    MultiYear,
}

impl fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyCategory::CurrentYear => "Current Year",
            StrategyCategory::EquityCompensation => "Equity Compensation",
            StrategyCategory::CapitalGains => "Capital Gains",
            StrategyCategory::MultiYear => "Multi-Year",
        };
        write!(f, "{}", name)
    }
}

/// One actionable finding from the strategy engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub name: String,
    pub category: StrategyCategory,
    pub priority: Priority,
    /// What the analyzer observed in the taxpayer's data
    pub situation: String,
    /// Why acting changes the liability
    pub mechanism: String,
    pub estimated_savings: Decimal,
    pub action_steps: Vec<String>,
    pub deadline: Option<NaiveDate>,
    pub risk: RiskLevel,
    pub california_note: Option<String>,
    pub citation: String,
    /// Names of other recommendations whose effect interacts with this one
    pub interactions: Vec<String>,
}

/// Advance `date` by whole calendar years, clamping Feb 29 to Feb 28
pub fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    date.checked_add_months(Months::new(12 * years))
        .expect("date arithmetic within supported range")
}

/// Classify a sale's holding period. The clock starts the day after
/// acquisition, so a sale exactly one year out is still short-term.
pub fn holding_period(acquisition_date: NaiveDate, sale_date: NaiveDate) -> HoldingPeriod {
    if sale_date > add_years(acquisition_date, 1) {
        HoldingPeriod::Long
    } else {
        HoldingPeriod::Short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_holding_period_boundary() {
        let acquired = date(2024, 3, 15);
        assert_eq!(
            holding_period(acquired, date(2025, 3, 15)),
            HoldingPeriod::Short
        );
        assert_eq!(
            holding_period(acquired, date(2025, 3, 16)),
            HoldingPeriod::Long
        );
    }

    #[test]
    fn test_holding_period_leap_day() {
        let acquired = date(2024, 2, 29);
        assert_eq!(
            holding_period(acquired, date(2025, 2, 28)),
            HoldingPeriod::Short
        );
        assert_eq!(
            holding_period(acquired, date(2025, 3, 1)),
            HoldingPeriod::Long
        );
    }

    #[test]
    fn test_form_8949_box_partition() {
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Short, true, true),
            Form8949Box::A
        );
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Short, false, true),
            Form8949Box::B
        );
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Short, true, false),
            Form8949Box::C
        );
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Long, true, true),
            Form8949Box::D
        );
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Long, false, true),
            Form8949Box::E
        );
        assert_eq!(
            Form8949Box::select(HoldingPeriod::Long, false, false),
            Form8949Box::F
        );
    }

    #[test]
    fn test_lot_rejects_mismatched_basis() {
        let result = Lot::new(
            "lot-1".to_string(),
            EquityClass::Rsu,
            Security::new("AAPL", "Apple Inc."),
            date(2024, 3, 15),
            dec!(100),
            LotBasis::Dual {
                cost_per_share: dec!(10),
                amt_cost_per_share: dec!(50),
            },
            "evt-1".to_string(),
            "test".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_lot_dual_basis_accessors() {
        let lot = Lot::new(
            "lot-1".to_string(),
            EquityClass::Iso,
            Security::new("ACME", "Acme Corp"),
            date(2024, 1, 15),
            dec!(100),
            LotBasis::Dual {
                cost_per_share: dec!(10),
                amt_cost_per_share: dec!(50),
            },
            "evt-1".to_string(),
            "test".to_string(),
        )
        .unwrap();
        assert_eq!(lot.cost_per_share(), dec!(10));
        assert_eq!(lot.amt_cost_per_share(), dec!(50));
        assert_eq!(lot.shares_remaining, dec!(100));
    }

    #[test]
    fn test_security_normalized_name() {
        let security = Security::new("UNKNOWN", "Acme Widgets, Inc.");
        assert_eq!(security.normalized_name(), "ACME WIDGETS");
        assert!(!security.has_known_ticker());
    }

    #[test]
    fn test_sale_total_proceeds() {
        let sale = Sale {
            id: "sale-1".to_string(),
            lot_id: None,
            security: Security::new("AAPL", "Apple Inc."),
            sale_date: date(2025, 6, 1),
            shares: dec!(100),
            proceeds_per_share: dec!(175),
            broker_reported_basis: Some(dec!(0)),
            wash_sale_disallowed: Decimal::ZERO,
            received_1099: true,
            basis_reported_to_irs: true,
            origin: "test".to_string(),
        };
        assert_eq!(sale.total_proceeds(), dec!(17500));
    }

    #[test]
    fn test_espp_offering_discount() {
        let purchase = PurchaseStatement {
            year: 2024,
            offering_date: date(2023, 8, 15),
            purchase_date: date(2024, 2, 15),
            fmv_at_offering: dec!(110),
            fmv_at_purchase: dec!(100),
            purchase_price_per_share: dec!(85),
            shares: dec!(150),
        };
        assert_eq!(purchase.offering_discount_per_share(), dec!(25));
    }

    #[test]
    fn test_serde_round_trip() {
        let lot = Lot::new(
            "lot-1".to_string(),
            EquityClass::Iso,
            Security::new("ACME", "Acme Corp"),
            date(2024, 1, 15),
            dec!(100),
            LotBasis::Dual {
                cost_per_share: dec!(10),
                amt_cost_per_share: dec!(50),
            },
            "evt-1".to_string(),
            "form3921".to_string(),
        )
        .unwrap();

        let json = serde_json::to_string(&lot).unwrap();
        let back: Lot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lot);
    }
}
