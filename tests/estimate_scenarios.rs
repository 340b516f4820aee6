mod common;

use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use equity_tax::estimator::{assemble_input, estimate};
use equity_tax::models::{EquityClass, EventType, FilingStatus};
use equity_tax::reconcile::reconcile_year;
use equity_tax::store::RecordStore;

// Reconcile-then-estimate through a real store: the single-filer RSU
// scenario with a zero-reported basis, priced against the 2025 tables.

#[test]
fn rsu_sale_feeds_the_estimate() {
    let (_dir, mut store) = open_store();
    store
        .save_wage(w2(2025, dec!(150000), dec!(25000), dec!(8000)))
        .unwrap();
    save_all(
        &mut store,
        vec![rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150))],
        vec![event(
            "evt-lot-1",
            EventType::Vest,
            EquityClass::Rsu,
            date(2024, 3, 15),
            dec!(100),
            dec!(150),
        )],
        vec![reported_sale("sale-1", date(2025, 6, 1), dec!(100), dec!(175))],
    );

    reconcile_year(&mut store, 2025, false).unwrap();

    let (input, warnings) = assemble_input(&store, 2025, FilingStatus::Single).unwrap();
    assert!(warnings.is_empty());
    let result = estimate(&input).unwrap();

    assert_eq!(result.agi, dec!(152500));
    assert_eq!(result.deduction_used, dec!(15750));
    assert_eq!(result.taxable_income, dec!(136750));
    assert_eq!(result.preferential_income, dec!(2500));
    assert_eq!(result.ordinary_taxable, dec!(134250));
    // 2025 single brackets applied stepwise to 134250
    assert_eq!(result.ordinary_tax, dec!(25067.00));
    // The long-term gain stacks entirely into the 15% bracket
    assert_eq!(result.preferential_tax, dec!(375.00));
    assert_eq!(result.net_investment_income_tax, Decimal::ZERO);
    assert_eq!(result.amt, Decimal::ZERO);
    assert_eq!(result.federal_total_tax, dec!(25442.00));
    assert_eq!(result.federal_balance_due, dec!(442.00));

    // California taxes the same gain at ordinary rates
    assert_eq!(result.ca_agi, dec!(152500));
    assert_eq!(result.ca_taxable_income, dec!(146899));
    assert_eq!(result.ca_base_tax.round_dp(2), dec!(10167.21));
    assert_eq!(result.ca_mental_health_tax, Decimal::ZERO);
    assert_eq!(
        result.ca_balance_due.round_dp(2),
        dec!(10167.21) - dec!(8000)
    );
}

#[test]
fn unreconciled_year_warns_and_estimates_zero_gains() {
    let (_dir, mut store) = open_store();
    store
        .save_wage(w2(2025, dec!(150000), dec!(25000), dec!(8000)))
        .unwrap();

    let (input, warnings) = assemble_input(&store, 2025, FilingStatus::Single).unwrap();
    assert!(warnings.iter().any(|w| w.contains("not been reconciled")));

    let result = estimate(&input).unwrap();
    assert_eq!(result.short_term_gain, Decimal::ZERO);
    assert_eq!(result.long_term_gain, Decimal::ZERO);
}

#[test]
fn missing_wages_warns_and_estimates_zero_wages() {
    let (_dir, store) = open_store();
    let (input, warnings) = assemble_input(&store, 2025, FilingStatus::Single).unwrap();
    assert!(warnings.iter().any(|w| w.contains("zero wages")));

    let result = estimate(&input).unwrap();
    assert_eq!(result.wages, Decimal::ZERO);
    assert_eq!(result.federal_total_tax, Decimal::ZERO);
}

#[test]
fn wash_disallowed_loss_does_not_reduce_income() {
    let (_dir, mut store) = open_store();
    store
        .save_wage(w2(2024, dec!(150000), dec!(25000), dec!(8000)))
        .unwrap();
    // Loss sale with a replacement vest ten days later
    save_all(
        &mut store,
        vec![
            rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150)),
            rsu_lot("lot-2", date(2024, 11, 20), dec!(50), dec!(120)),
        ],
        vec![event(
            "evt-lot-2",
            EventType::Vest,
            EquityClass::Rsu,
            date(2024, 11, 20),
            dec!(50),
            dec!(120),
        )],
        vec![reported_sale("sale-1", date(2024, 11, 10), dec!(100), dec!(130))],
    );
    reconcile_year(&mut store, 2024, false).unwrap();

    let (input, _) = assemble_input(&store, 2024, FilingStatus::Single).unwrap();
    let result = estimate(&input).unwrap();

    // The 2,000 economic loss is fully disallowed, so AGI stays at wages
    assert_eq!(result.short_term_gain, Decimal::ZERO);
    assert_eq!(result.capital_loss_deduction, Decimal::ZERO);
    assert_eq!(result.agi, dec!(150000));
}

#[test]
fn estimate_round_trips_through_serde() {
    let (_dir, mut store) = open_store();
    store
        .save_wage(w2(2024, dec!(150000), dec!(25000), dec!(8000)))
        .unwrap();
    let (input, _) = assemble_input(&store, 2024, FilingStatus::Single).unwrap();
    let result = estimate(&input).unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let back: equity_tax::estimator::TaxEstimate = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}
