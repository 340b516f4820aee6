use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use csv::Reader;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    DividendStatement, EquityClass, EquityEvent, EventType, ExerciseStatement, InterestStatement,
    Lot, LotBasis, PurchaseStatement, Sale, Security, WageStatement,
};
use crate::store::RecordStore;

// Import adapters. Each adapter turns one file format into canonical
// records; the engines never see a file. Validation returns messages
// instead of failing so a review can show every problem at once.

/// Detected source-document type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    W2,
    Form1099B,
    Form1099Div,
    Form1099Int,
    Form3921,
    Form3922,
    BenefitHistory,
}

impl std::fmt::Display for FormType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FormType::W2 => "W-2",
            FormType::Form1099B => "1099-B",
            FormType::Form1099Div => "1099-DIV",
            FormType::Form1099Int => "1099-INT",
            FormType::Form3921 => "3921",
            FormType::Form3922 => "3922",
            FormType::BenefitHistory => "benefit history",
        };
        write!(f, "{}", name)
    }
}

/// Canonical records produced by one parse
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub form_type: FormType,
    pub tax_year: i32,
    pub wages: Vec<WageStatement>,
    pub dividends: Vec<DividendStatement>,
    pub interest: Vec<InterestStatement>,
    pub exercises: Vec<ExerciseStatement>,
    pub purchases: Vec<PurchaseStatement>,
    pub sales: Vec<Sale>,
    pub events: Vec<EquityEvent>,
    pub lots: Vec<Lot>,
}

impl ImportResult {
    fn empty(form_type: FormType, tax_year: i32) -> Self {
        ImportResult {
            form_type,
            tax_year,
            wages: Vec::new(),
            dividends: Vec::new(),
            interest: Vec::new(),
            exercises: Vec::new(),
            purchases: Vec::new(),
            sales: Vec::new(),
            events: Vec::new(),
            lots: Vec::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.wages.len()
            + self.dividends.len()
            + self.interest.len()
            + self.exercises.len()
            + self.purchases.len()
            + self.sales.len()
            + self.events.len()
            + self.lots.len()
    }
}

/// One file-format adapter
pub trait ImportAdapter {
    /// Identifier used on the command line (`w2`, `1099b`, ...)
    fn source(&self) -> &'static str;
    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult>;
    /// Human-readable structural problems; non-empty means do not persist
    fn validate(&self, result: &ImportResult) -> Vec<String>;
}

/// Look up the adapter for a source identifier
pub fn adapter_for(source: &str) -> Option<Box<dyn ImportAdapter>> {
    match source.to_lowercase().as_str() {
        "w2" => Some(Box::new(W2Adapter)),
        "1099b" => Some(Box::new(Sales1099BAdapter)),
        "1099div" => Some(Box::new(Dividend1099Adapter)),
        "1099int" => Some(Box::new(Interest1099Adapter)),
        "3921" => Some(Box::new(Form3921Adapter)),
        "3922" => Some(Box::new(Form3922Adapter)),
        "benefits" => Some(Box::new(BenefitHistoryAdapter)),
        _ => None,
    }
}

pub const KNOWN_SOURCES: [&str; 7] = ["w2", "1099b", "1099div", "1099int", "3921", "3922", "benefits"];

/// Write every record in an import result through the store
pub fn persist(store: &mut dyn RecordStore, result: ImportResult) -> Result<usize> {
    let count = result.record_count();
    for wage in result.wages {
        store.save_wage(wage)?;
    }
    for dividend in result.dividends {
        store.save_dividend(dividend)?;
    }
    for interest in result.interest {
        store.save_interest(interest)?;
    }
    for exercise in result.exercises {
        store.save_exercise(exercise)?;
    }
    for purchase in result.purchases {
        store.save_purchase(purchase)?;
    }
    for event in result.events {
        store.save_event(event)?;
    }
    for lot in result.lots {
        store.save_lot(lot)?;
    }
    for sale in result.sales {
        store.save_sale(sale)?;
    }
    Ok(count)
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(trimmed).map_err(|_| anyhow!("Invalid {} value: {}", field, value))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid {} date (expected YYYY-MM-DD): {}", field, value))
}

/// Parse a `CODE=AMOUNT;CODE=AMOUNT` map field (W-2 boxes 12 and 14)
fn parse_code_map(field: &str, value: &str) -> Result<BTreeMap<String, Decimal>> {
    let mut map = BTreeMap::new();
    for pair in value.split(';').filter(|p| !p.trim().is_empty()) {
        let (code, amount) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid {} entry (expected CODE=AMOUNT): {}", field, pair))?;
        map.insert(code.trim().to_string(), parse_decimal(field, amount)?);
    }
    Ok(map)
}

fn open_reader(path: &Path) -> Result<Reader<std::fs::File>> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))
}

// ---- W-2 ----

#[derive(Debug, Deserialize)]
struct W2Record {
    employer: String,
    wages: String,
    federal_withheld: String,
    medicare_wages: String,
    medicare_withheld: String,
    state_wages: String,
    state_withheld: String,
    box12: Option<String>,
    box14: Option<String>,
}

struct W2Adapter;

impl ImportAdapter for W2Adapter {
    fn source(&self) -> &'static str {
        "w2"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::W2, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: W2Record = row?;
            result.wages.push(WageStatement {
                year: tax_year,
                employer: record.employer.trim().to_string(),
                wages: parse_decimal("wages", &record.wages)?,
                federal_withheld: parse_decimal("federal_withheld", &record.federal_withheld)?,
                medicare_wages: parse_decimal("medicare_wages", &record.medicare_wages)?,
                medicare_withheld: parse_decimal("medicare_withheld", &record.medicare_withheld)?,
                box12: record
                    .box12
                    .map(|v| parse_code_map("box12", &v))
                    .transpose()?
                    .unwrap_or_default(),
                box14: record
                    .box14
                    .map(|v| parse_code_map("box14", &v))
                    .transpose()?
                    .unwrap_or_default(),
                state_wages: parse_decimal("state_wages", &record.state_wages)?,
                state_withheld: parse_decimal("state_withheld", &record.state_withheld)?,
            });
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, wage) in result.wages.iter().enumerate() {
            if wage.employer.is_empty() {
                messages.push(format!("W-2 row {}: employer is empty", index + 1));
            }
            if wage.wages < Decimal::ZERO {
                messages.push(format!("W-2 row {}: wages are negative", index + 1));
            }
            if wage.medicare_wages < wage.wages {
                messages.push(format!(
                    "W-2 row {}: medicare wages below box-1 wages; check for missing deferrals",
                    index + 1
                ));
            }
        }
        messages
    }
}

// ---- 1099-B ----

#[derive(Debug, Deserialize)]
struct Sale1099BRecord {
    ticker: String,
    name: Option<String>,
    sale_date: String,
    shares: String,
    proceeds_per_share: String,
    cost_basis: Option<String>,
    wash_sale_disallowed: Option<String>,
    basis_reported: Option<String>,
    lot_id: Option<String>,
}

struct Sales1099BAdapter;

impl ImportAdapter for Sales1099BAdapter {
    fn source(&self) -> &'static str {
        "1099b"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::Form1099B, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: Sale1099BRecord = row?;
            let ticker = if record.ticker.trim().is_empty() {
                "UNKNOWN".to_string()
            } else {
                record.ticker.clone()
            };
            let basis_reported = record
                .basis_reported
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "yes" | "y" | "1"))
                .unwrap_or(false);
            result.sales.push(Sale {
                id: Uuid::new_v4().to_string(),
                lot_id: record.lot_id.filter(|v| !v.trim().is_empty()),
                security: Security::new(&ticker, record.name.as_deref().unwrap_or(&ticker)),
                sale_date: parse_date("sale_date", &record.sale_date)?,
                shares: parse_decimal("shares", &record.shares)?,
                proceeds_per_share: parse_decimal("proceeds_per_share", &record.proceeds_per_share)?,
                broker_reported_basis: record
                    .cost_basis
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| parse_decimal("cost_basis", &v))
                    .transpose()?,
                wash_sale_disallowed: record
                    .wash_sale_disallowed
                    .map(|v| parse_decimal("wash_sale_disallowed", &v))
                    .transpose()?
                    .unwrap_or(Decimal::ZERO),
                received_1099: true,
                basis_reported_to_irs: basis_reported,
                origin: "1099b".to_string(),
            });
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, sale) in result.sales.iter().enumerate() {
            if sale.shares <= Decimal::ZERO {
                messages.push(format!(
                    "1099-B row {}: share count is {}; fragmentary rows must carry shares, they are never inferred from proceeds",
                    index + 1,
                    sale.shares
                ));
            }
            if sale.proceeds_per_share < Decimal::ZERO {
                messages.push(format!("1099-B row {}: negative proceeds", index + 1));
            }
            if sale.sale_date.year() != result.tax_year {
                messages.push(format!(
                    "1099-B row {}: sale date {} is outside tax year {}",
                    index + 1,
                    sale.sale_date,
                    result.tax_year
                ));
            }
        }
        messages
    }
}

// ---- 1099-DIV ----

#[derive(Debug, Deserialize)]
struct Dividend1099Record {
    payer: String,
    ordinary_dividends: String,
    qualified_dividends: String,
    capital_gain_distributions: Option<String>,
    foreign_tax_paid: Option<String>,
    section_199a_dividends: Option<String>,
    federal_withheld: Option<String>,
}

struct Dividend1099Adapter;

impl ImportAdapter for Dividend1099Adapter {
    fn source(&self) -> &'static str {
        "1099div"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::Form1099Div, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: Dividend1099Record = row?;
            let optional = |field: &str, value: Option<String>| -> Result<Decimal> {
                value
                    .map(|v| parse_decimal(field, &v))
                    .transpose()
                    .map(|v| v.unwrap_or(Decimal::ZERO))
            };
            result.dividends.push(DividendStatement {
                year: tax_year,
                payer: record.payer.trim().to_string(),
                ordinary_dividends: parse_decimal("ordinary_dividends", &record.ordinary_dividends)?,
                qualified_dividends: parse_decimal("qualified_dividends", &record.qualified_dividends)?,
                capital_gain_distributions: optional(
                    "capital_gain_distributions",
                    record.capital_gain_distributions,
                )?,
                foreign_tax_paid: optional("foreign_tax_paid", record.foreign_tax_paid)?,
                section_199a_dividends: optional(
                    "section_199a_dividends",
                    record.section_199a_dividends,
                )?,
                federal_withheld: optional("federal_withheld", record.federal_withheld)?,
            });
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, dividend) in result.dividends.iter().enumerate() {
            if dividend.qualified_dividends > dividend.ordinary_dividends {
                messages.push(format!(
                    "1099-DIV row {}: qualified dividends exceed ordinary dividends",
                    index + 1
                ));
            }
        }
        messages
    }
}

// ---- 1099-INT ----

#[derive(Debug, Deserialize)]
struct Interest1099Record {
    payer: String,
    interest_income: String,
    early_withdrawal_penalty: Option<String>,
    treasury_interest: Option<String>,
    federal_withheld: Option<String>,
}

struct Interest1099Adapter;

impl ImportAdapter for Interest1099Adapter {
    fn source(&self) -> &'static str {
        "1099int"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::Form1099Int, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: Interest1099Record = row?;
            let optional = |field: &str, value: Option<String>| -> Result<Decimal> {
                value
                    .map(|v| parse_decimal(field, &v))
                    .transpose()
                    .map(|v| v.unwrap_or(Decimal::ZERO))
            };
            result.interest.push(InterestStatement {
                year: tax_year,
                payer: record.payer.trim().to_string(),
                interest_income: parse_decimal("interest_income", &record.interest_income)?,
                early_withdrawal_penalty: optional(
                    "early_withdrawal_penalty",
                    record.early_withdrawal_penalty,
                )?,
                treasury_interest: optional("treasury_interest", record.treasury_interest)?,
                federal_withheld: optional("federal_withheld", record.federal_withheld)?,
            });
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, interest) in result.interest.iter().enumerate() {
            if interest.treasury_interest > interest.interest_income {
                messages.push(format!(
                    "1099-INT row {}: Treasury interest exceeds total interest",
                    index + 1
                ));
            }
        }
        messages
    }
}

// ---- Form 3921 (ISO exercise) ----

#[derive(Debug, Deserialize)]
struct Form3921Record {
    ticker: String,
    name: Option<String>,
    grant_date: String,
    exercise_date: String,
    exercise_price_per_share: String,
    fmv_on_exercise_date: String,
    shares_transferred: String,
}

struct Form3921Adapter;

impl ImportAdapter for Form3921Adapter {
    fn source(&self) -> &'static str {
        "3921"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::Form3921, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: Form3921Record = row?;
            let security = Security::new(
                &record.ticker,
                record.name.as_deref().unwrap_or(&record.ticker),
            );
            let grant_date = parse_date("grant_date", &record.grant_date)?;
            let exercise_date = parse_date("exercise_date", &record.exercise_date)?;
            let strike = parse_decimal("exercise_price_per_share", &record.exercise_price_per_share)?;
            let fmv = parse_decimal("fmv_on_exercise_date", &record.fmv_on_exercise_date)?;
            let shares = parse_decimal("shares_transferred", &record.shares_transferred)?;

            result.exercises.push(ExerciseStatement {
                year: tax_year,
                grant_date,
                exercise_date,
                strike_per_share: strike,
                fmv_per_share: fmv,
                shares,
            });

            let event_id = Uuid::new_v4().to_string();
            result.events.push(EquityEvent {
                id: event_id.clone(),
                event_type: EventType::Exercise,
                equity_class: EquityClass::Iso,
                security: security.clone(),
                date: exercise_date,
                shares,
                price_per_share: fmv,
                strike_price: Some(strike),
                purchase_price: None,
                offering_date: None,
                grant_date: Some(grant_date),
                fmv_at_offering: None,
                ordinary_income: None,
                origin: "3921".to_string(),
            });
            result.lots.push(Lot::new(
                Uuid::new_v4().to_string(),
                EquityClass::Iso,
                security,
                exercise_date,
                shares,
                LotBasis::Dual {
                    cost_per_share: strike,
                    amt_cost_per_share: fmv,
                },
                event_id,
                "3921".to_string(),
            )?);
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, exercise) in result.exercises.iter().enumerate() {
            if exercise.exercise_date < exercise.grant_date {
                messages.push(format!(
                    "3921 row {}: exercise date precedes grant date",
                    index + 1
                ));
            }
            if exercise.shares <= Decimal::ZERO {
                messages.push(format!("3921 row {}: share count must be positive", index + 1));
            }
        }
        messages
    }
}

// ---- Form 3922 (ESPP purchase) ----

#[derive(Debug, Deserialize)]
struct Form3922Record {
    ticker: String,
    name: Option<String>,
    offering_date: String,
    purchase_date: String,
    fmv_on_offering_date: String,
    fmv_on_purchase_date: String,
    purchase_price_per_share: String,
    shares: String,
}

struct Form3922Adapter;

impl ImportAdapter for Form3922Adapter {
    fn source(&self) -> &'static str {
        "3922"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::Form3922, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: Form3922Record = row?;
            let security = Security::new(
                &record.ticker,
                record.name.as_deref().unwrap_or(&record.ticker),
            );
            let offering_date = parse_date("offering_date", &record.offering_date)?;
            let purchase_date = parse_date("purchase_date", &record.purchase_date)?;
            let fmv_offering = parse_decimal("fmv_on_offering_date", &record.fmv_on_offering_date)?;
            let fmv_purchase = parse_decimal("fmv_on_purchase_date", &record.fmv_on_purchase_date)?;
            let price = parse_decimal("purchase_price_per_share", &record.purchase_price_per_share)?;
            let shares = parse_decimal("shares", &record.shares)?;

            result.purchases.push(PurchaseStatement {
                year: tax_year,
                offering_date,
                purchase_date,
                fmv_at_offering: fmv_offering,
                fmv_at_purchase: fmv_purchase,
                purchase_price_per_share: price,
                shares,
            });

            let event_id = Uuid::new_v4().to_string();
            result.events.push(EquityEvent {
                id: event_id.clone(),
                event_type: EventType::Purchase,
                equity_class: EquityClass::Espp,
                security: security.clone(),
                date: purchase_date,
                shares,
                price_per_share: fmv_purchase,
                strike_price: None,
                purchase_price: Some(price),
                offering_date: Some(offering_date),
                grant_date: None,
                fmv_at_offering: Some(fmv_offering),
                ordinary_income: None,
                origin: "3922".to_string(),
            });
            result.lots.push(Lot::new(
                Uuid::new_v4().to_string(),
                EquityClass::Espp,
                security,
                purchase_date,
                shares,
                LotBasis::Regular {
                    cost_per_share: price,
                },
                event_id,
                "3922".to_string(),
            )?);
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, purchase) in result.purchases.iter().enumerate() {
            if purchase.purchase_date < purchase.offering_date {
                messages.push(format!(
                    "3922 row {}: purchase date precedes offering date",
                    index + 1
                ));
            }
            if purchase.fmv_at_offering <= Decimal::ZERO {
                messages.push(format!(
                    "3922 row {}: offering-date FMV is required for the qualifying-disposition test",
                    index + 1
                ));
            }
        }
        messages
    }
}

// ---- Benefit history (vests and other employer events) ----

#[derive(Debug, Deserialize)]
struct BenefitHistoryRecord {
    event_type: String,
    equity_class: String,
    ticker: String,
    name: Option<String>,
    date: String,
    shares: String,
    fmv_per_share: String,
    strike_per_share: Option<String>,
}

struct BenefitHistoryAdapter;

impl ImportAdapter for BenefitHistoryAdapter {
    fn source(&self) -> &'static str {
        "benefits"
    }

    fn parse(&self, path: &Path, tax_year: i32) -> Result<ImportResult> {
        let mut result = ImportResult::empty(FormType::BenefitHistory, tax_year);
        let mut reader = open_reader(path)?;
        for row in reader.deserialize() {
            let record: BenefitHistoryRecord = row?;
            let event_type = match record.event_type.trim().to_uppercase().as_str() {
                "VEST" => EventType::Vest,
                "EXERCISE" => EventType::Exercise,
                "PURCHASE" => EventType::Purchase,
                other => bail!("Unsupported benefit event type: {}", other),
            };
            let equity_class = match record.equity_class.trim().to_uppercase().as_str() {
                "RSU" => EquityClass::Rsu,
                "NSO" => EquityClass::Nso,
                "ESPP" => EquityClass::Espp,
                "ISO" => EquityClass::Iso,
                other => bail!("Unsupported equity class: {}", other),
            };
            let security = Security::new(
                &record.ticker,
                record.name.as_deref().unwrap_or(&record.ticker),
            );
            let date = parse_date("date", &record.date)?;
            let shares = parse_decimal("shares", &record.shares)?;
            let fmv = parse_decimal("fmv_per_share", &record.fmv_per_share)?;
            let strike = record
                .strike_per_share
                .filter(|v| !v.trim().is_empty())
                .map(|v| parse_decimal("strike_per_share", &v))
                .transpose()?;

            let event_id = Uuid::new_v4().to_string();
            result.events.push(EquityEvent {
                id: event_id.clone(),
                event_type,
                equity_class,
                security: security.clone(),
                date,
                shares,
                price_per_share: fmv,
                strike_price: strike,
                purchase_price: None,
                offering_date: None,
                grant_date: None,
                fmv_at_offering: None,
                ordinary_income: match equity_class {
                    // Vest-date FMV and exercise spread hit the W-2
                    EquityClass::Rsu => Some(fmv * shares),
                    EquityClass::Nso => strike.map(|s| (fmv - s) * shares),
                    _ => None,
                },
                origin: "benefits".to_string(),
            });

            // NSO basis carries strike plus the taxed spread, which is
            // just the exercise-date FMV
            let basis = match equity_class {
                EquityClass::Iso => {
                    let strike = strike.ok_or_else(|| {
                        anyhow!("ISO benefit row is missing strike_per_share")
                    })?;
                    LotBasis::Dual {
                        cost_per_share: strike,
                        amt_cost_per_share: fmv,
                    }
                }
                _ => LotBasis::Regular {
                    cost_per_share: fmv,
                },
            };
            result.lots.push(Lot::new(
                Uuid::new_v4().to_string(),
                equity_class,
                security,
                date,
                shares,
                basis,
                event_id,
                "benefits".to_string(),
            )?);
        }
        Ok(result)
    }

    fn validate(&self, result: &ImportResult) -> Vec<String> {
        let mut messages = Vec::new();
        for (index, lot) in result.lots.iter().enumerate() {
            if lot.shares_acquired <= Decimal::ZERO {
                messages.push(format!(
                    "Benefit row {}: share count must be positive",
                    index + 1
                ));
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_w2_parse_with_box14() {
        let file = csv_file(
            "employer,wages,federal_withheld,medicare_wages,medicare_withheld,state_wages,state_withheld,box12,box14\n\
             Acme Corp,150000,25000,155000,2247.50,150000,8000,W=3000,CA VPDI=1378.48\n",
        );
        let adapter = W2Adapter;
        let result = adapter.parse(file.path(), 2024).unwrap();

        assert_eq!(result.wages.len(), 1);
        let wage = &result.wages[0];
        assert_eq!(wage.wages, dec!(150000));
        assert_eq!(wage.box12["W"], dec!(3000));
        assert_eq!(wage.box14["CA VPDI"], dec!(1378.48));
        assert!(adapter.validate(&result).is_empty());
    }

    #[test]
    fn test_1099b_zero_shares_refused() {
        let file = csv_file(
            "ticker,name,sale_date,shares,proceeds_per_share,cost_basis,wash_sale_disallowed,basis_reported,lot_id\n\
             ACME,Acme Corp,2024-06-01,0,175,,,true,\n",
        );
        let adapter = Sales1099BAdapter;
        let result = adapter.parse(file.path(), 2024).unwrap();
        let messages = adapter.validate(&result);

        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("never inferred from proceeds"));
    }

    #[test]
    fn test_1099b_wrong_year_flagged() {
        let file = csv_file(
            "ticker,name,sale_date,shares,proceeds_per_share,cost_basis,wash_sale_disallowed,basis_reported,lot_id\n\
             ACME,Acme Corp,2023-06-01,100,175,0,,true,\n",
        );
        let adapter = Sales1099BAdapter;
        let result = adapter.parse(file.path(), 2024).unwrap();
        let messages = adapter.validate(&result);
        assert!(messages.iter().any(|m| m.contains("outside tax year")));
    }

    #[test]
    fn test_3921_creates_dual_basis_lot() {
        let file = csv_file(
            "ticker,name,grant_date,exercise_date,exercise_price_per_share,fmv_on_exercise_date,shares_transferred\n\
             ACME,Acme Corp,2023-01-01,2024-01-15,10,50,100\n",
        );
        let adapter = Form3921Adapter;
        let result = adapter.parse(file.path(), 2024).unwrap();

        assert_eq!(result.exercises.len(), 1);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.lots.len(), 1);
        let lot = &result.lots[0];
        assert_eq!(lot.equity_class, EquityClass::Iso);
        assert_eq!(lot.cost_per_share(), dec!(10));
        assert_eq!(lot.amt_cost_per_share(), dec!(50));
        assert_eq!(lot.source_event_id, result.events[0].id);
        assert_eq!(result.events[0].grant_date, Some(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        ));
    }

    #[test]
    fn test_3922_carries_offering_data() {
        let file = csv_file(
            "ticker,name,offering_date,purchase_date,fmv_on_offering_date,fmv_on_purchase_date,purchase_price_per_share,shares\n\
             ACME,Acme Corp,2023-08-15,2024-02-15,110,100,85,150\n",
        );
        let adapter = Form3922Adapter;
        let result = adapter.parse(file.path(), 2024).unwrap();

        assert_eq!(result.purchases.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.fmv_at_offering, Some(dec!(110)));
        assert_eq!(event.purchase_price, Some(dec!(85)));
        assert_eq!(result.lots[0].cost_per_share(), dec!(85));
    }

    #[test]
    fn test_benefit_history_vest_lot_basis_is_fmv() {
        let file = csv_file(
            "event_type,equity_class,ticker,name,date,shares,fmv_per_share,strike_per_share\n\
             VEST,RSU,ACME,Acme Corp,2024-03-15,100,150,\n",
        );
        let adapter = BenefitHistoryAdapter;
        let result = adapter.parse(file.path(), 2024).unwrap();

        assert_eq!(result.lots.len(), 1);
        assert_eq!(result.lots[0].cost_per_share(), dec!(150));
        assert_eq!(result.events[0].ordinary_income, Some(dec!(15000)));
    }

    #[test]
    fn test_adapter_lookup() {
        for source in KNOWN_SOURCES {
            assert!(adapter_for(source).is_some(), "missing adapter: {}", source);
        }
        assert!(adapter_for("pdf").is_none());
    }
}
