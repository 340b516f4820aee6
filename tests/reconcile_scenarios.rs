mod common;

use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use equity_tax::models::{
    AdjustmentCode, EquityClass, EventType, Form8949Box, HoldingPeriod, PurchaseStatement,
};
use equity_tax::reconcile::reconcile_year;
use equity_tax::store::RecordStore;

// End-to-end reconciliation through a real store: records in, corrected
// Form 8949 rows out.

#[test]
fn rsu_zero_basis_full_pipeline() {
    let (_dir, mut store) = open_store();
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

    let outcome = reconcile_year(&mut store, 2025, false).unwrap();
    assert_eq!(outcome.results.len(), 1);

    let result = &outcome.results[0];
    assert_eq!(result.corrected_basis, dec!(15000));
    assert_eq!(result.adjustment_amount, dec!(15000));
    assert_eq!(result.adjustment_code, AdjustmentCode::E);
    assert_eq!(result.holding_period, HoldingPeriod::Long);
    assert_eq!(result.category, Form8949Box::D);
    assert_eq!(result.gain_loss, dec!(2500));
    assert_eq!(result.ordinary_income, Decimal::ZERO);

    // Persisted and queryable by year
    let stored = store.get_sale_results(2025).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], *result);
}

#[test]
fn espp_qualifying_below_offering_discount() {
    let (_dir, mut store) = open_store();
    let purchase = PurchaseStatement {
        year: 2024,
        offering_date: date(2023, 8, 15),
        purchase_date: date(2024, 2, 15),
        fmv_at_offering: dec!(110),
        fmv_at_purchase: dec!(100),
        purchase_price_per_share: dec!(85),
        shares: dec!(150),
    };
    store.save_purchase(purchase).unwrap();
    save_all(
        &mut store,
        vec![espp_lot("lot-1", date(2024, 2, 15), dec!(150), dec!(85))],
        vec![],
        vec![reported_sale("sale-1", date(2026, 9, 1), dec!(150), dec!(125))],
    );

    let outcome = reconcile_year(&mut store, 2026, false).unwrap();
    assert_eq!(outcome.results.len(), 1);

    let result = &outcome.results[0];
    // Ordinary income per share is min(125-85, 110-85) = 25
    assert_eq!(result.ordinary_income, dec!(3750));
    assert_eq!(result.corrected_basis, dec!(16500));
    assert_eq!(result.gain_loss, dec!(2250));
    assert_eq!(result.holding_period, HoldingPeriod::Long);
}

#[test]
fn espp_qualifying_sold_at_loss() {
    let (_dir, mut store) = open_store();
    store
        .save_purchase(PurchaseStatement {
            year: 2024,
            offering_date: date(2023, 8, 15),
            purchase_date: date(2024, 2, 15),
            fmv_at_offering: dec!(110),
            fmv_at_purchase: dec!(100),
            purchase_price_per_share: dec!(85),
            shares: dec!(150),
        })
        .unwrap();
    save_all(
        &mut store,
        vec![espp_lot("lot-1", date(2024, 2, 15), dec!(150), dec!(85))],
        vec![],
        vec![reported_sale("sale-1", date(2026, 9, 1), dec!(150), dec!(80))],
    );

    let outcome = reconcile_year(&mut store, 2026, false).unwrap();
    let result = &outcome.results[0];
    // Sold below the purchase price: no ordinary income at all
    assert_eq!(result.ordinary_income, Decimal::ZERO);
    assert_eq!(result.corrected_basis, dec!(12750));
    assert_eq!(result.gain_loss, dec!(-750));
    assert_eq!(result.holding_period, HoldingPeriod::Long);
}

#[test]
fn iso_qualifying_reverses_amt_preference() {
    let (_dir, mut store) = open_store();
    let mut exercise = event(
        "evt-lot-1",
        EventType::Exercise,
        EquityClass::Iso,
        date(2024, 1, 15),
        dec!(100),
        dec!(50),
    );
    exercise.grant_date = Some(date(2023, 1, 1));
    exercise.strike_price = Some(dec!(10));
    save_all(
        &mut store,
        vec![iso_lot("lot-1", date(2024, 1, 15), dec!(100), dec!(10), dec!(50))],
        vec![exercise],
        vec![reported_sale("sale-1", date(2026, 3, 1), dec!(100), dec!(70))],
    );

    let outcome = reconcile_year(&mut store, 2026, false).unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.corrected_basis, dec!(1000));
    assert_eq!(result.ordinary_income, Decimal::ZERO);
    assert_eq!(result.gain_loss, dec!(6000));
    assert_eq!(result.amt_adjustment, dec!(-4000));
    assert_eq!(result.holding_period, HoldingPeriod::Long);
}

#[test]
fn iso_disqualifying_partial_spread() {
    let (_dir, mut store) = open_store();
    let mut exercise = event(
        "evt-lot-1",
        EventType::Exercise,
        EquityClass::Iso,
        date(2024, 1, 15),
        dec!(100),
        dec!(50),
    );
    exercise.grant_date = Some(date(2023, 1, 1));
    exercise.strike_price = Some(dec!(10));
    save_all(
        &mut store,
        vec![iso_lot("lot-1", date(2024, 1, 15), dec!(100), dec!(10), dec!(50))],
        vec![exercise],
        vec![reported_sale("sale-1", date(2024, 7, 15), dec!(100), dec!(30))],
    );

    let outcome = reconcile_year(&mut store, 2024, false).unwrap();
    let result = &outcome.results[0];
    // Ordinary income per share is min(40 spread, 20 actual gain)
    assert_eq!(result.ordinary_income, dec!(2000));
    assert_eq!(result.corrected_basis, dec!(3000));
    assert_eq!(result.gain_loss, Decimal::ZERO);
    // Minimum-tax gain -2000 against a regular gain of zero
    assert_eq!(result.amt_adjustment, dec!(-2000));
    assert_eq!(result.holding_period, HoldingPeriod::Short);
}

#[test]
fn holding_period_boundary_dates() {
    for (sale_date, expected) in [
        (date(2025, 3, 15), HoldingPeriod::Short),
        (date(2025, 3, 16), HoldingPeriod::Long),
    ] {
        let (_dir, mut store) = open_store();
        save_all(
            &mut store,
            vec![rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150))],
            vec![],
            vec![reported_sale("sale-1", sale_date, dec!(100), dec!(175))],
        );
        let outcome = reconcile_year(&mut store, 2025, false).unwrap();
        assert_eq!(
            outcome.results[0].holding_period, expected,
            "sale on {}",
            sale_date
        );
    }
}

#[test]
fn wash_sale_shifts_loss_into_replacement_vest() {
    let (_dir, mut store) = open_store();
    let replacement_vest = event(
        "evt-lot-2",
        EventType::Vest,
        EquityClass::Rsu,
        date(2024, 11, 20),
        dec!(50),
        dec!(120),
    );
    save_all(
        &mut store,
        vec![
            rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150)),
            rsu_lot("lot-2", date(2024, 11, 20), dec!(50), dec!(120)),
        ],
        vec![replacement_vest],
        vec![reported_sale("sale-1", date(2024, 11, 10), dec!(100), dec!(130))],
    );

    let outcome = reconcile_year(&mut store, 2024, false).unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.gain_loss, dec!(-2000));
    assert_eq!(result.wash_sale_disallowed, dec!(2000));
    assert_eq!(result.adjustment_code, AdjustmentCode::O);
    assert_eq!(result.wash_replacement_lot, Some("lot-2".to_string()));

    // The disallowed loss landed in the replacement lot's basis
    let lots = store.get_lots().unwrap();
    let replacement = lots.iter().find(|l| l.id == "lot-2").unwrap();
    assert_eq!(replacement.cost_per_share(), dec!(160));
}

#[test]
fn forced_rerun_is_idempotent_including_wash_adjustments() {
    let (_dir, mut store) = open_store();
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

    let first = reconcile_year(&mut store, 2024, false).unwrap();
    let second = reconcile_year(&mut store, 2024, true).unwrap();

    assert_eq!(first.results, second.results);

    // Wash basis shift applied exactly once despite the re-run
    let lots = store.get_lots().unwrap();
    let replacement = lots.iter().find(|l| l.id == "lot-2").unwrap();
    assert_eq!(replacement.cost_per_share(), dec!(160));
    let sold = lots.iter().find(|l| l.id == "lot-1").unwrap();
    assert_eq!(sold.shares_remaining, Decimal::ZERO);
    assert_eq!(store.get_sale_results(2024).unwrap().len(), 1);
}

#[test]
fn lot_conservation_across_partial_sales() {
    let (_dir, mut store) = open_store();
    save_all(
        &mut store,
        vec![rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150))],
        vec![],
        vec![
            reported_sale("sale-1", date(2025, 5, 1), dec!(30), dec!(170)),
            reported_sale("sale-2", date(2025, 8, 1), dec!(45), dec!(180)),
        ],
    );

    let outcome = reconcile_year(&mut store, 2025, false).unwrap();
    assert_eq!(outcome.results.len(), 2);

    let lots = store.get_lots().unwrap();
    let consumed: Decimal = outcome.results.iter().map(|r| r.shares).sum();
    assert_eq!(lots[0].shares_remaining + consumed, lots[0].shares_acquired);
    assert_eq!(lots[0].shares_remaining, dec!(25));
}

#[test]
fn basis_identity_holds_for_every_result() {
    let (_dir, mut store) = open_store();
    store
        .save_purchase(PurchaseStatement {
            year: 2024,
            offering_date: date(2023, 8, 15),
            purchase_date: date(2024, 2, 15),
            fmv_at_offering: dec!(110),
            fmv_at_purchase: dec!(100),
            purchase_price_per_share: dec!(85),
            shares: dec!(150),
        })
        .unwrap();
    save_all(
        &mut store,
        vec![
            rsu_lot("lot-1", date(2024, 3, 15), dec!(100), dec!(150)),
            espp_lot("lot-2", date(2024, 2, 15), dec!(150), dec!(85)),
            iso_lot("lot-3", date(2024, 1, 15), dec!(100), dec!(10), dec!(50)),
        ],
        vec![],
        vec![
            reported_sale("sale-1", date(2024, 6, 1), dec!(80), dec!(160)),
            reported_sale("sale-2", date(2024, 7, 1), dec!(120), dec!(95)),
            reported_sale("sale-3", date(2024, 8, 1), dec!(100), dec!(45)),
        ],
    );

    let outcome = reconcile_year(&mut store, 2024, false).unwrap();
    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        assert_eq!(
            result.broker_reported_basis + result.adjustment_amount,
            result.corrected_basis,
            "basis identity violated for sale {}",
            result.sale_id
        );
        assert_eq!(
            result.proceeds - result.corrected_basis,
            result.gain_loss,
            "gain identity violated for sale {}",
            result.sale_id
        );
    }
}
