#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use equity_tax::models::{
    EquityClass, EquityEvent, EventType, Lot, LotBasis, Sale, Security, WageStatement,
};
use equity_tax::store::{JsonStore, RecordStore};
use tempfile::TempDir;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn open_store() -> (TempDir, JsonStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = JsonStore::open(temp_dir.path()).unwrap();
    (temp_dir, store)
}

pub fn security() -> Security {
    Security::new("ACME", "Acme Corp")
}

pub fn rsu_lot(id: &str, acquired: NaiveDate, shares: Decimal, cost: Decimal) -> Lot {
    Lot::new(
        id.to_string(),
        EquityClass::Rsu,
        security(),
        acquired,
        shares,
        LotBasis::Regular {
            cost_per_share: cost,
        },
        format!("evt-{}", id),
        "test".to_string(),
    )
    .unwrap()
}

pub fn iso_lot(
    id: &str,
    exercised: NaiveDate,
    shares: Decimal,
    strike: Decimal,
    fmv: Decimal,
) -> Lot {
    Lot::new(
        id.to_string(),
        EquityClass::Iso,
        security(),
        exercised,
        shares,
        LotBasis::Dual {
            cost_per_share: strike,
            amt_cost_per_share: fmv,
        },
        format!("evt-{}", id),
        "test".to_string(),
    )
    .unwrap()
}

pub fn espp_lot(id: &str, purchased: NaiveDate, shares: Decimal, price: Decimal) -> Lot {
    Lot::new(
        id.to_string(),
        EquityClass::Espp,
        security(),
        purchased,
        shares,
        LotBasis::Regular {
            cost_per_share: price,
        },
        format!("evt-{}", id),
        "test".to_string(),
    )
    .unwrap()
}

pub fn event(
    id: &str,
    event_type: EventType,
    equity_class: EquityClass,
    on: NaiveDate,
    shares: Decimal,
    fmv: Decimal,
) -> EquityEvent {
    EquityEvent {
        id: id.to_string(),
        event_type,
        equity_class,
        security: security(),
        date: on,
        shares,
        price_per_share: fmv,
        strike_price: None,
        purchase_price: None,
        offering_date: None,
        grant_date: None,
        fmv_at_offering: None,
        ordinary_income: None,
        origin: "test".to_string(),
    }
}

pub fn reported_sale(id: &str, on: NaiveDate, shares: Decimal, price: Decimal) -> Sale {
    Sale {
        id: id.to_string(),
        lot_id: None,
        security: security(),
        sale_date: on,
        shares,
        proceeds_per_share: price,
        broker_reported_basis: Some(Decimal::ZERO),
        wash_sale_disallowed: Decimal::ZERO,
        received_1099: true,
        basis_reported_to_irs: true,
        origin: "test".to_string(),
    }
}

pub fn w2(year: i32, wages: Decimal, federal_withheld: Decimal, state_withheld: Decimal) -> WageStatement {
    WageStatement {
        year,
        employer: "Acme Corp".to_string(),
        wages,
        federal_withheld,
        medicare_wages: wages,
        medicare_withheld: wages * dec!(0.0145),
        box12: Default::default(),
        box14: Default::default(),
        state_wages: wages,
        state_withheld,
    }
}

pub fn save_all(
    store: &mut JsonStore,
    lots: Vec<Lot>,
    events: Vec<EquityEvent>,
    sales: Vec<Sale>,
) {
    for e in events {
        store.save_event(e).unwrap();
    }
    for lot in lots {
        store.save_lot(lot).unwrap();
    }
    for sale in sales {
        store.save_sale(sale).unwrap();
    }
}
