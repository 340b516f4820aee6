use anyhow::{bail, Result};
use chrono::Local;
use rust_decimal::Decimal;

use crate::audit::AuditEntry;
use crate::basis::{self, SaleSlice};
use crate::errors::ReconciliationError;
use crate::matcher::{self, MatchPolicy};
use crate::models::{
    EquityClass, EquityEvent, ExerciseStatement, Lot, PurchaseStatement, Sale, SaleResult,
};
use crate::store::{ReconciliationRun, RecordStore};

// Reconciliation orchestrator: the one place that mutates lot share
// counts. Loads records, matches each sale to lots, dispatches to the
// basis-correction engine, runs the wash-sale post-pass, and persists the
// outcome in a single batch at the end. Fatal errors abort before any
// result is written.

/// Outcome of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub year: i32,
    pub results: Vec<SaleResult>,
    pub warnings: Vec<String>,
    /// Per-sale failures (the sale produced no result but the pass
    /// continued)
    pub errors: Vec<String>,
    pub unmatched_sales: Vec<String>,
    pub sales_processed: usize,
}

impl ReconcileOutcome {
    /// Net gain/loss across all results, with disallowed wash losses
    /// added back
    pub fn net_reportable_gain(&self) -> Decimal {
        self.results
            .iter()
            .map(|r| r.gain_loss + r.wash_sale_disallowed.min(-r.gain_loss).max(Decimal::ZERO))
            .sum()
    }
}

/// Reconcile every sale in `year` against the lot inventory.
///
/// A repeat run requires `force`, which clears the year's prior results,
/// restores the shares they consumed, and reverses any wash-sale basis
/// shifts before reprocessing, so the pass is idempotent.
pub fn reconcile_year(
    store: &mut dyn RecordStore,
    year: i32,
    force: bool,
) -> Result<ReconcileOutcome> {
    let mut lots = store.get_lots()?;
    let events = store.get_events()?;
    let purchases = store.get_purchases()?;
    let exercises = store.get_exercises()?;
    let mut sales = store.get_sales(year)?;
    sales.sort_by(|a, b| a.sale_date.cmp(&b.sale_date).then_with(|| a.id.cmp(&b.id)));

    let prior = store.get_sale_results(year)?;
    if !prior.is_empty() {
        if !force {
            bail!(
                "Year {} is already reconciled ({} results); re-run with --force to redo it",
                year,
                prior.len()
            );
        }
        restore_prior_run(&mut lots, &prior);
        let cleared = store.clear_sale_results(year)?;
        store.save_audit_entry(
            AuditEntry::new("reconcile", "clear_prior_results")
                .input("year", year)
                .output("cleared", cleared),
        )?;
    }

    let mut audit_entries: Vec<AuditEntry> = vec![AuditEntry::new("reconcile", "start")
        .input("year", year)
        .input("sales", sales.len())
        .input("lots", lots.len())];

    let mut outcome = ReconcileOutcome {
        year,
        results: Vec::new(),
        warnings: Vec::new(),
        errors: Vec::new(),
        unmatched_sales: Vec::new(),
        sales_processed: sales.len(),
    };

    for sale in &sales {
        process_sale(
            sale,
            &mut lots,
            &events,
            &purchases,
            &exercises,
            &mut outcome,
            &mut audit_entries,
        )?;
    }

    // Wash-sale post-pass over the completed results, across every account
    let wash_warnings = basis::apply_wash_sales(&mut outcome.results, &events, &mut lots);
    if !wash_warnings.is_empty() {
        audit_entries.push(
            AuditEntry::new("reconcile", "wash_sale_pass")
                .input("results", outcome.results.len())
                .output("wash_sales", wash_warnings.len()),
        );
    }
    outcome.warnings.extend(wash_warnings);

    verify_lot_conservation(&lots, &outcome.results)?;

    // Single persistence boundary: results, mutated lots, run summary,
    // audit trail
    for result in &outcome.results {
        store.save_sale_result(result.clone())?;
    }
    for lot in &lots {
        store.save_lot(lot.clone())?;
    }
    store.record_reconciliation_run(ReconciliationRun {
        year,
        run_at: Local::now().to_rfc3339(),
        sales_processed: outcome.sales_processed,
        results_produced: outcome.results.len(),
        warnings: outcome.warnings.clone(),
        unmatched_sales: outcome.unmatched_sales.clone(),
    })?;
    audit_entries.push(
        AuditEntry::new("reconcile", "finish")
            .input("year", year)
            .output("results", outcome.results.len())
            .output("warnings", outcome.warnings.len()),
    );
    for entry in audit_entries {
        store.save_audit_entry(entry)?;
    }

    Ok(outcome)
}

/// Undo the lot mutations recorded by a prior run of the same year
fn restore_prior_run(lots: &mut [Lot], prior: &[SaleResult]) {
    for result in prior {
        if let Some(lot) = lots.iter_mut().find(|l| l.id == result.lot_id) {
            lot.shares_remaining += result.shares;
        }
        if let Some(replacement_id) = &result.wash_replacement_lot {
            if let Some(lot) = lots.iter_mut().find(|l| &l.id == replacement_id) {
                lot.add_basis_adjustment(-result.wash_sale_disallowed);
            }
        }
    }
}

fn process_sale(
    sale: &Sale,
    lots: &mut [Lot],
    events: &[EquityEvent],
    purchases: &[PurchaseStatement],
    exercises: &[ExerciseStatement],
    outcome: &mut ReconcileOutcome,
    audit_entries: &mut Vec<AuditEntry>,
) -> Result<()> {
    let candidates = matcher::candidate_lots(lots, &sale.security);
    if candidates.is_empty() {
        let err = ReconciliationError::LotNotFound {
            sale_id: sale.id.clone(),
            ticker: sale.security.ticker.clone(),
        };
        outcome.warnings.push(err.to_string());
        outcome.unmatched_sales.push(sale.id.clone());
        audit_entries.push(
            AuditEntry::new("reconcile", "match_sale")
                .input("sale_id", &sale.id)
                .output("allocations", 0)
                .note("no candidate lots"),
        );
        return Ok(());
    }

    let policy = match &sale.lot_id {
        Some(id) => MatchPolicy::Specific(vec![id.clone()]),
        None => MatchPolicy::Fifo,
    };
    let matched = matcher::match_sale(&candidates, sale, &policy);
    drop(candidates);

    if matched.unallocated > Decimal::ZERO {
        outcome.warnings.push(
            ReconciliationError::InsufficientShares {
                sale_id: sale.id.clone(),
                missing: matched.unallocated,
            }
            .to_string(),
        );
    }
    if matched.allocations.is_empty() {
        outcome.unmatched_sales.push(sale.id.clone());
        return Ok(());
    }

    audit_entries.push(
        AuditEntry::new("reconcile", "match_sale")
            .input("sale_id", &sale.id)
            .input("shares", sale.shares)
            .output("allocations", matched.allocations.len())
            .output("unallocated", matched.unallocated),
    );

    // Prorate the broker-reported figures across the allocations,
    // keeping the exact totals by giving the final slice the remainder
    let total_broker_basis = sale.broker_reported_basis.unwrap_or(Decimal::ZERO);
    let total_wash = sale.wash_sale_disallowed;
    let mut basis_used = Decimal::ZERO;
    let mut wash_used = Decimal::ZERO;

    let allocation_count = matched.allocations.len();
    for (index, allocation) in matched.allocations.iter().enumerate() {
        let is_last = index + 1 == allocation_count;
        let fraction = allocation.shares / sale.shares;
        let slice_basis = if is_last {
            total_broker_basis - basis_used
        } else {
            total_broker_basis * fraction
        };
        let slice_wash = if is_last {
            total_wash - wash_used
        } else {
            total_wash * fraction
        };
        basis_used += slice_basis;
        wash_used += slice_wash;

        let slice = SaleSlice {
            sale_id: sale.id.clone(),
            sale_date: sale.sale_date,
            shares: allocation.shares,
            proceeds_per_share: sale.proceeds_per_share,
            broker_basis: slice_basis,
            broker_wash_disallowed: slice_wash,
            received_1099: sale.received_1099,
            basis_reported_to_irs: sale.basis_reported_to_irs,
        };

        let lot_index = lots
            .iter()
            .position(|l| l.id == allocation.lot_id)
            .ok_or_else(|| {
                ReconciliationError::Internal(format!(
                    "allocation names unknown lot {}",
                    allocation.lot_id
                ))
            })?;

        let result = match dispatch_equity_class(
            &lots[lot_index],
            &slice,
            events,
            purchases,
            exercises,
            outcome,
        ) {
            Some(result) => result,
            None => continue,
        };
        verify_basis_identity(&result)?;

        audit_entries.push(
            AuditEntry::new("reconcile", "correct_basis")
                .input("sale_id", &sale.id)
                .input("lot_id", &allocation.lot_id)
                .input("equity_class", lots[lot_index].equity_class)
                .input("shares", allocation.shares)
                .output("corrected_basis", result.corrected_basis)
                .output("gain_loss", result.gain_loss)
                .output("code", result.adjustment_code),
        );

        lots[lot_index].shares_remaining -= allocation.shares;
        outcome.results.push(result);
    }

    Ok(())
}

/// Route one (lot, slice) pair to its equity-class handler. Returns None
/// when the sale cannot be corrected (recorded on the outcome).
fn dispatch_equity_class(
    lot: &Lot,
    slice: &SaleSlice,
    events: &[EquityEvent],
    purchases: &[PurchaseStatement],
    exercises: &[ExerciseStatement],
    outcome: &mut ReconcileOutcome,
) -> Option<SaleResult> {
    match lot.equity_class {
        EquityClass::Rsu => Some(basis::rsu_sale(lot, slice)),
        EquityClass::Nso => Some(basis::nso_sale(lot, slice)),
        EquityClass::Espp => match espp_purchase_for(lot, events, purchases) {
            Ok(purchase) => Some(basis::espp_sale(lot, slice, &purchase)),
            Err(err) => {
                outcome.errors.push(err.to_string());
                None
            }
        },
        EquityClass::Iso => {
            let grant_date = iso_grant_date_for(lot, events, exercises);
            let (result, warning) = basis::iso_sale(lot, slice, grant_date);
            if let Some(warning) = warning {
                outcome.warnings.push(warning);
            }
            Some(result)
        }
    }
}

/// Recover the purchase-statement data an ESPP sale needs, from the
/// originating event or a matching Form 3922 record. Absent offering
/// data is fatal for the sale: qualifying status cannot be determined.
fn espp_purchase_for(
    lot: &Lot,
    events: &[EquityEvent],
    purchases: &[PurchaseStatement],
) -> std::result::Result<PurchaseStatement, ReconciliationError> {
    use chrono::Datelike;

    if let Some(event) = events.iter().find(|e| e.id == lot.source_event_id) {
        if let (Some(offering_date), Some(fmv_at_offering), Some(purchase_price)) =
            (event.offering_date, event.fmv_at_offering, event.purchase_price)
        {
            return Ok(PurchaseStatement {
                year: event.date.year(),
                offering_date,
                purchase_date: event.date,
                fmv_at_offering,
                fmv_at_purchase: event.price_per_share,
                purchase_price_per_share: purchase_price,
                shares: event.shares,
            });
        }
    }

    purchases
        .iter()
        .find(|p| p.purchase_date == lot.acquisition_date)
        .cloned()
        .ok_or_else(|| ReconciliationError::MissingEventData {
            lot_id: lot.id.clone(),
            field: "offering date / offering FMV".to_string(),
        })
}

/// ISO grant date, from the originating event or a matching Form 3921
fn iso_grant_date_for(
    lot: &Lot,
    events: &[EquityEvent],
    exercises: &[ExerciseStatement],
) -> Option<chrono::NaiveDate> {
    events
        .iter()
        .find(|e| e.id == lot.source_event_id)
        .and_then(|e| e.grant_date)
        .or_else(|| {
            exercises
                .iter()
                .find(|x| x.exercise_date == lot.acquisition_date)
                .map(|x| x.grant_date)
        })
}

fn verify_basis_identity(result: &SaleResult) -> Result<()> {
    if result.broker_reported_basis + result.adjustment_amount != result.corrected_basis
        || result.proceeds - result.corrected_basis != result.gain_loss
    {
        return Err(ReconciliationError::BasisMismatch {
            lot_id: result.lot_id.clone(),
            broker: result.broker_reported_basis,
            computed: result.corrected_basis,
        }
        .into());
    }
    Ok(())
}

fn verify_lot_conservation(lots: &[Lot], results: &[SaleResult]) -> Result<()> {
    for lot in lots {
        if lot.shares_remaining < Decimal::ZERO {
            return Err(ReconciliationError::Internal(format!(
                "lot {} has negative remaining shares",
                lot.id
            ))
            .into());
        }
        let consumed: Decimal = results
            .iter()
            .filter(|r| r.lot_id == lot.id)
            .map(|r| r.shares)
            .sum();
        if consumed > Decimal::ZERO
            && lot.shares_remaining + consumed > lot.shares_acquired
        {
            return Err(ReconciliationError::Internal(format!(
                "lot {} accounts for more shares than it acquired",
                lot.id
            ))
            .into());
        }
    }
    Ok(())
}
